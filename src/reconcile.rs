//! Three-way reconciliation of the configuration directory.
//!
//! The release's configuration tree is staged next to the live one, every
//! staged regular file is compared byte-for-byte against its live
//! counterpart, and the result is partitioned: identical files are dropped,
//! new files land as-is, and conflicting files land under the `.new` merge
//! suffix for the operator to merge by hand. A suffixed file is never
//! auto-merged.
//!
//! Rerunning the step is idempotent up to the operator's merge decisions:
//! an unresolved `.new` file is replaced with the release's version again
//! (with a warning), so edits belong in the live file, not the staged copy.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use walkdir::WalkDir;

use crate::config::{Config, MERGE_SUFFIX};
use crate::errors::UpgradeError;
use crate::exclude::{build_exclusion_file, ExclusionSet};
use crate::fscopy::copy_tree;

/// Outcome of a reconciliation run, in sorted relative-path order.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Files that did not exist live and were installed as-is.
    pub added: Vec<PathBuf>,
    /// Files that differed and were staged under the merge suffix.
    pub updated: Vec<PathBuf>,
}

impl ReconcileReport {
    /// Absolute live paths still carrying the merge suffix.
    pub fn merge_pending(&self, config: &Config) -> Vec<PathBuf> {
        let live = config.live_config_dir();
        self.updated
            .iter()
            .map(|rel| live.join(with_merge_suffix(rel)))
            .collect()
    }
}

/// Reconcile the release's configuration tree into the live one.
pub fn reconcile(config: &Config) -> Result<ReconcileReport> {
    let release_config = config.mount_dir.join(&config.config_dir);
    if !release_config.is_dir() {
        return Err(UpgradeError::MissingFile(format!(
            "release has no configuration tree at {}",
            release_config.display()
        ))
        .into());
    }

    let staging = config.staging_config_dir();
    let live = config.live_config_dir();

    // Leftover staging from an interrupted run is stale; start fresh.
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .map_err(|e| UpgradeError::Copy(format!("{}: {}", staging.display(), e)))?;
    }

    let exclusion_file = build_exclusion_file(config, &config.destdir)?;
    let exclude = ExclusionSet::from_file(exclusion_file.path())?;
    copy_tree(&release_config, &staging, &exclude)
        .map_err(|e| UpgradeError::Copy(format!("staging {}: {:#}", staging.display(), e)))?;

    let mut report = ReconcileReport::default();
    for rel in staged_files(&staging)? {
        let staged = staging.join(&rel);
        let live_file = live.join(&rel);

        if !live_file.exists() {
            report.added.push(rel);
            continue;
        }

        if identical(&staged, &live_file)? {
            fs::remove_file(&staged)
                .map_err(|e| UpgradeError::Copy(format!("{}: {}", staged.display(), e)))?;
            continue;
        }

        let suffixed = with_merge_suffix(&staged);
        fs::rename(&staged, &suffixed)
            .map_err(|e| UpgradeError::Copy(format!("{}: {}", suffixed.display(), e)))?;
        report.updated.push(rel);
    }

    // Everything surviving in staging is meant to land; no exclusions here.
    for pending in report.merge_pending(config) {
        if pending.exists() {
            eprintln!(
                "WARNING: replacing previously staged {} with the release's version",
                pending.display()
            );
        }
    }
    copy_tree(&staging, &live, &ExclusionSet::empty())
        .map_err(|e| UpgradeError::Copy(format!("installing {}: {:#}", live.display(), e)))?;
    fs::remove_dir_all(&staging)
        .map_err(|e| UpgradeError::Copy(format!("{}: {}", staging.display(), e)))?;

    summarize(config, &report);
    Ok(report)
}

/// Every regular file under the staging tree, sorted for deterministic
/// output.
fn staged_files(staging: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(staging).sort_by_file_name() {
        let entry =
            entry.map_err(|e| UpgradeError::Copy(format!("{}: {}", staging.display(), e)))?;
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(staging)
                .expect("walkdir yields paths under its root")
                .to_path_buf();
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

fn identical(a: &Path, b: &Path) -> Result<bool> {
    let read = |p: &Path| {
        fs::read(p).map_err(|e| UpgradeError::Copy(format!("{}: {}", p.display(), e)))
    };
    Ok(read(a)? == read(b)?)
}

fn with_merge_suffix(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(MERGE_SUFFIX);
    path.with_file_name(name)
}

fn summarize(config: &Config, report: &ReconcileReport) {
    for rel in &report.added {
        println!("  new: {}", config.live_config_dir().join(rel).display());
    }
    let pending = report.merge_pending(config);
    if pending.is_empty() {
        println!("Configuration merged cleanly.");
        return;
    }
    println!("The following files need a manual merge before reboot:");
    for path in &pending {
        println!("  {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_merge_suffix() {
        assert_eq!(
            with_merge_suffix(Path::new("/etc.new/rc.conf")),
            PathBuf::from("/etc.new/rc.conf.new")
        );
        assert_eq!(
            with_merge_suffix(Path::new("defaults/periodic")),
            PathBuf::from("defaults/periodic.new")
        );
    }
}
