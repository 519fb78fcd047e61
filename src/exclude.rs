//! Exclusion planning for the copy steps.
//!
//! A small fixed set of live files (fstab, passwd, ...) must never be
//! overwritten by any copy this tool performs. The planner turns the
//! configured relative list into a temp file of absolute destination paths,
//! rewriting configuration-directory entries into the reconciliation staging
//! convention (`etc/fstab` -> `etc.new/fstab`) so that protected files are
//! not even staged for merge.
//!
//! The file is regenerated for every copy invocation because the roots can
//! change between resumed runs; it is deleted when the caller drops it.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::NamedTempFile;

use crate::config::{Config, MERGE_SUFFIX};
use crate::errors::UpgradeError;

/// Build the exclusion file for a copy rooted at `root`.
///
/// One absolute path per line. Dropping the returned handle removes the
/// file.
pub fn build_exclusion_file(config: &Config, root: &Path) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()
        .map_err(|e| UpgradeError::TempFile(format!("exclusion list: {}", e)))?;

    for entry in &config.exclude_list {
        let rewritten = rewrite_entry(entry, &config.config_dir);
        let absolute = root.join(rewritten);
        writeln!(file, "{}", absolute.display())
            .map_err(|e| UpgradeError::TempFile(format!("exclusion list: {}", e)))?;
    }

    Ok(file)
}

/// Rewrite a configuration-directory entry into the staging convention.
fn rewrite_entry(entry: &str, config_dir: &str) -> PathBuf {
    let staged_prefix = format!("{}.{}", config_dir, MERGE_SUFFIX);
    match Path::new(entry).strip_prefix(config_dir) {
        Ok(rest) => Path::new(&staged_prefix).join(rest),
        Err(_) => PathBuf::from(entry),
    }
}

/// Parsed exclusion list, used by the copy routines to refuse overwrites.
#[derive(Debug, Default)]
pub struct ExclusionSet {
    paths: HashSet<PathBuf>,
}

impl ExclusionSet {
    /// Load an exclusion file written by [`build_exclusion_file`].
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| UpgradeError::TempFile(format!("{}: {}", path.display(), e)))?;
        let paths = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();
        Ok(Self { paths })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// True when `path` or any of its ancestors is excluded.
    pub fn contains(&self, path: &Path) -> bool {
        path.ancestors().any(|p| self.paths.contains(p))
    }
}
