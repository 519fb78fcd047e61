//! Pre-upgrade backup archives.
//!
//! Two compressed tarballs land in the backup directory: the running kernel
//! and a fixed "world" path set (default: the configuration directory).
//! Overwriting a previous backup is a warning, not an error; an upgrade
//! retried after a failure would otherwise wedge on its own leftovers.

use anyhow::Result;
use std::fs;

use crate::config::Config;
use crate::errors::UpgradeError;
use crate::process::Cmd;

/// Archive the kernel and the configured world paths.
pub fn backup(config: &Config) -> Result<()> {
    fs::create_dir_all(&config.backup_dir)
        .map_err(|e| UpgradeError::Archive(format!("{}: {}", config.backup_dir.display(), e)))?;

    archive(config, "kernel.tar.gz", std::slice::from_ref(&config.kernel), "kernel")?;
    archive(config, "world.tar.gz", &config.backup_paths, "world")?;
    Ok(())
}

fn archive(config: &Config, name: &str, paths: &[String], what: &str) -> Result<()> {
    let output = config.backup_dir.join(name);
    if output.exists() {
        eprintln!(
            "WARNING: overwriting previous {} backup {}",
            what,
            output.display()
        );
    }

    let existing: Vec<&String> = paths
        .iter()
        .filter(|p| config.destdir.join(p).exists())
        .collect();
    if existing.is_empty() {
        println!("Nothing to archive for {} backup.", what);
        return Ok(());
    }

    println!("Archiving {} backup to {}", what, output.display());
    Cmd::new(&config.tar)
        .arg("-czf")
        .arg_path(&output)
        .arg("-C")
        .arg_path(&config.destdir)
        .args(existing)
        .error_msg(format!("{} backup failed", what))
        .run()
        .map_err(|e| UpgradeError::Archive(format!("{}: {:#}", output.display(), e)))?;
    Ok(())
}
