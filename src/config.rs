//! Configuration for the upgrade pipeline.
//!
//! Reads an optional KEY=value configuration file (`-c`), with environment
//! variables taking precedence over the file. Every tunable has a default,
//! so a bare invocation works on a stock system. The loaded `Config` is
//! built once at startup and passed by reference into every component.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::errors::UpgradeError;

/// Suffix used for everything staged for operator review: the configuration
/// staging directory (`etc.new`), files needing manual merge (`rc.conf.new`),
/// and the preferred obsolete-manifest override (`obsolete.mk.new`).
pub const MERGE_SUFFIX: &str = "new";

/// Upgrade configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the filesystem being upgraded (default: "/").
    pub destdir: PathBuf,
    /// Where the release image is mounted (created if absent).
    pub mount_dir: PathBuf,
    /// Scratch directory for fetched images and staging trees.
    pub cache_dir: PathBuf,
    /// Where kernel/world backup archives land.
    pub backup_dir: PathBuf,

    /// Configuration directory, relative to the root (default: "etc").
    pub config_dir: String,
    /// Top-level trees bulk-installed from the release, relative paths.
    pub install_list: Vec<String>,
    /// Live files the bulk copy must never overwrite, relative paths.
    pub exclude_list: Vec<String>,
    /// Obsolete-file manifest, relative to the root.
    pub obsolete_manifest: String,
    /// Variable names evaluated from the manifest.
    pub obsolete_vars: Vec<String>,

    /// Kernel image path, relative to the root (default: "boot/vmlinuz").
    pub kernel: String,
    /// Paths archived into the world backup, relative to the root.
    pub backup_paths: Vec<String>,
    /// Partition of the attached image that gets mounted (default: "p1").
    pub partition_suffix: String,
    /// Expected SHA-256 of the release image, verified when set.
    pub image_sha256: Option<String>,
    /// Group new users are provisioned into while their real group does
    /// not exist yet.
    pub sentinel_group: String,
    /// Database rebuild commands run by the postinstall step.
    pub rebuild_cmds: Vec<String>,

    /// Tool paths, overridable for odd installations.
    pub losetup: String,
    pub mount: String,
    pub umount: String,
    pub tar: String,
    pub mtree: String,
    pub chattr: String,
    pub fetch: String,
    pub groupadd: String,
    pub useradd: String,
    pub usermod: String,
}

impl Config {
    /// Load configuration from an optional file plus the environment.
    ///
    /// A `-c` file that cannot be read is an error: the operator asked for
    /// it explicitly.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut vars = HashMap::new();

        if let Some(path) = config_file {
            let content = fs::read_to_string(path)
                .map_err(|e| UpgradeError::Config(format!("{}: {}", path.display(), e)))?;
            parse_config(&content, &mut vars);
        }

        // Environment variables override the file.
        for (key, value) in std::env::vars() {
            vars.insert(key, value);
        }

        Ok(Self::from_vars(&vars))
    }

    fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str, default: &str| -> String {
            vars.get(key).cloned().unwrap_or_else(|| default.to_string())
        };
        let get_path =
            |key: &str, default: &str| -> PathBuf { PathBuf::from(get(key, default)) };
        let get_list = |key: &str, default: &[&str]| -> Vec<String> {
            match vars.get(key) {
                Some(v) => v.split_whitespace().map(str::to_string).collect(),
                None => default.iter().map(|s| s.to_string()).collect(),
            }
        };

        Self {
            destdir: get_path("DESTDIR", "/"),
            mount_dir: get_path("MOUNT_DIR", "/mnt/sysupgrade"),
            cache_dir: get_path("CACHE_DIR", "/var/cache/sysupgrade"),
            backup_dir: get_path("BACKUP_DIR", "/var/backups/sysupgrade"),

            config_dir: get("CONFIG_DIR", "etc"),
            install_list: get_list("INSTALL_LIST", &["bin", "sbin", "lib", "libexec", "usr"]),
            exclude_list: get_list(
                "EXCLUDE_LIST",
                &[
                    "etc/fstab",
                    "etc/hosts",
                    "etc/passwd",
                    "etc/group",
                    "etc/shadow",
                    "etc/machine-id",
                    "etc/resolv.conf",
                ],
            ),
            obsolete_manifest: get("OBSOLETE_MANIFEST", "etc/upgrade-obsolete.mk"),
            obsolete_vars: get_list("OBSOLETE_VARS", &["OBSOLETE_FILES", "OBSOLETE_DIRS"]),

            kernel: get("KERNEL", "boot/vmlinuz"),
            backup_paths: get_list("BACKUP_PATHS", &["etc"]),
            partition_suffix: get("PARTITION_SUFFIX", "p1"),
            image_sha256: vars.get("IMAGE_SHA256").cloned().filter(|s| !s.is_empty()),
            sentinel_group: get("SENTINEL_GROUP", "nogroup"),
            rebuild_cmds: match vars.get("REBUILD_CMDS") {
                Some(v) => v.split(',').map(|s| s.trim().to_string()).collect(),
                None => ["ldconfig", "mandb -q", "pwconv", "grpconv", "newaliases"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },

            losetup: get("LOSETUP", "losetup"),
            mount: get("MOUNT", "mount"),
            umount: get("UMOUNT", "umount"),
            tar: get("TAR", "tar"),
            mtree: get("MTREE", "mtree"),
            chattr: get("CHATTR", "chattr"),
            fetch: get("FETCH", "curl"),
            groupadd: get("GROUPADD", "groupadd"),
            useradd: get("USERADD", "useradd"),
            usermod: get("USERMOD", "usermod"),
        }
    }

    /// Configuration directory on the live system (e.g. `/etc`).
    pub fn live_config_dir(&self) -> PathBuf {
        self.destdir.join(&self.config_dir)
    }

    /// Staging directory for configuration reconciliation (e.g. `/etc.new`).
    pub fn staging_config_dir(&self) -> PathBuf {
        self.destdir
            .join(format!("{}.{}", self.config_dir, MERGE_SUFFIX))
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  DESTDIR:    {}", self.destdir.display());
        println!("  MOUNT_DIR:  {}", self.mount_dir.display());
        println!("  CACHE_DIR:  {}", self.cache_dir.display());
        println!("  BACKUP_DIR: {}", self.backup_dir.display());
        println!("  CONFIG_DIR: {}", self.config_dir);
        println!("  INSTALL_LIST: {}", self.install_list.join(" "));
        println!("  EXCLUDE_LIST: {}", self.exclude_list.join(" "));
        println!("  OBSOLETE_MANIFEST: {}", self.obsolete_manifest);
        println!("  KERNEL:     {}", self.kernel);
    }
}

/// Parse KEY=value lines into the variable map.
///
/// Comments and blank lines are skipped; surrounding quotes on values are
/// stripped.
fn parse_config(content: &str, vars: &mut HashMap<String, String>) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            vars.insert(key.to_string(), value.to_string());
        }
    }
}
