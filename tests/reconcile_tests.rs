//! Integration tests for the configuration reconciliation step.

mod helpers;

use std::fs;

use helpers::TestEnv;
use sysupgrade::reconcile::reconcile;

#[test]
fn identical_file_leaves_live_untouched_and_stages_nothing() {
    let env = TestEnv::new();
    env.write_release("etc/services", b"port list\n");
    env.write_live("etc/services", b"port list\n");

    let report = reconcile(&env.config).unwrap();

    assert!(report.added.is_empty());
    assert!(report.updated.is_empty());
    assert_eq!(fs::read(env.live_path("etc/services")).unwrap(), b"port list\n");
    assert!(!env.live_path("etc/services.new").exists());
    // Staging is cleaned up.
    assert!(!env.config.staging_config_dir().exists());
}

#[test]
fn differing_file_is_staged_with_merge_suffix() {
    let env = TestEnv::new();
    env.write_release("etc/rc.conf", b"release settings\n");
    env.write_live("etc/rc.conf", b"operator settings\n");

    let report = reconcile(&env.config).unwrap();

    assert_eq!(report.updated, vec![std::path::PathBuf::from("rc.conf")]);
    // The live file is untouched; the release's version sits beside it.
    assert_eq!(
        fs::read(env.live_path("etc/rc.conf")).unwrap(),
        b"operator settings\n"
    );
    assert_eq!(
        fs::read(env.live_path("etc/rc.conf.new")).unwrap(),
        b"release settings\n"
    );
}

#[test]
fn new_file_lands_without_suffix() {
    let env = TestEnv::new();
    env.write_release("etc/newdaemon.conf", b"defaults\n");

    let report = reconcile(&env.config).unwrap();

    assert_eq!(report.added, vec![std::path::PathBuf::from("newdaemon.conf")]);
    assert_eq!(
        fs::read(env.live_path("etc/newdaemon.conf")).unwrap(),
        b"defaults\n"
    );
    assert!(!env.live_path("etc/newdaemon.conf.new").exists());
}

#[test]
fn nested_trees_are_reconciled() {
    let env = TestEnv::new();
    env.write_release("etc/defaults/periodic.conf", b"release\n");
    env.write_live("etc/defaults/periodic.conf", b"local\n");
    env.write_release("etc/newdir/fresh.conf", b"fresh\n");

    let report = reconcile(&env.config).unwrap();

    assert_eq!(report.updated.len(), 1);
    assert!(env.live_path("etc/defaults/periodic.conf.new").exists());
    assert_eq!(
        fs::read(env.live_path("etc/newdir/fresh.conf")).unwrap(),
        b"fresh\n"
    );
}

#[test]
fn excluded_config_files_are_never_staged() {
    let env = TestEnv::new();
    // fstab is in the default exclusion list.
    env.write_release("etc/fstab", b"release fstab\n");
    env.write_live("etc/fstab", b"local fstab\n");

    let report = reconcile(&env.config).unwrap();

    assert!(report.updated.is_empty());
    assert_eq!(fs::read(env.live_path("etc/fstab")).unwrap(), b"local fstab\n");
    assert!(!env.live_path("etc/fstab.new").exists());
}

#[test]
fn rerun_replaces_unresolved_merge_files() {
    let env = TestEnv::new();
    env.write_release("etc/rc.conf", b"release settings\n");
    env.write_live("etc/rc.conf", b"operator settings\n");

    reconcile(&env.config).unwrap();
    // Operator starts editing the staged copy instead of the live file.
    env.write_live("etc/rc.conf.new", b"half-merged edits\n");

    reconcile(&env.config).unwrap();

    // The rerun restores the release's version; edits to the suffixed copy
    // are not preserved (documented re-entrancy hazard).
    assert_eq!(
        fs::read(env.live_path("etc/rc.conf.new")).unwrap(),
        b"release settings\n"
    );
    assert_eq!(
        fs::read(env.live_path("etc/rc.conf")).unwrap(),
        b"operator settings\n"
    );
}

#[test]
fn leftover_staging_directory_is_discarded() {
    let env = TestEnv::new();
    env.write_release("etc/motd", b"hello\n");
    let staging = env.config.staging_config_dir();
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("stale.conf"), b"stale\n").unwrap();

    reconcile(&env.config).unwrap();

    assert!(!env.live_path("etc/stale.conf").exists());
    assert!(!staging.exists());
}

#[test]
fn missing_release_config_tree_is_fatal() {
    let env = TestEnv::new();
    fs::remove_dir_all(env.mount.join("etc")).unwrap();

    let err = reconcile(&env.config).unwrap_err();
    assert_eq!(sysupgrade::errors::exit_code_for(&err), 13);
}
