//! Shared test utilities: a scratch root, mount tree, and config wired to
//! temporary directories so no test touches the real system.

use std::fs;
use std::path::{Path, PathBuf};

use sysupgrade::config::Config;
use tempfile::TempDir;

/// Test environment simulating a live root plus a mounted release image.
pub struct TestEnv {
    /// Kept alive for the lifetime of the environment.
    pub _temp_dir: TempDir,
    /// Simulated live root (the config's DESTDIR).
    pub root: PathBuf,
    /// Simulated mounted release tree (the config's MOUNT_DIR).
    pub mount: PathBuf,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path().join("root");
        let mount = temp_dir.path().join("mnt");
        fs::create_dir_all(root.join("etc")).expect("failed to create root");
        fs::create_dir_all(mount.join("etc")).expect("failed to create mount");

        let mut config = Config::load(None).expect("default config");
        config.destdir = root.clone();
        config.mount_dir = mount.clone();
        config.cache_dir = temp_dir.path().join("cache");
        config.backup_dir = temp_dir.path().join("backup");
        // Keep template handling inert; the tool does not exist in CI.
        config.mtree = "mtree_tool_that_does_not_exist".to_string();

        Self {
            _temp_dir: temp_dir,
            root,
            mount,
            config,
        }
    }

    /// Write a file in the live root, creating parents.
    pub fn write_live(&self, rel: &str, content: &[u8]) {
        write_with_dirs(&self.root.join(rel), content);
    }

    /// Write a file in the release tree, creating parents.
    pub fn write_release(&self, rel: &str, content: &[u8]) {
        write_with_dirs(&self.mount.join(rel), content);
    }

    pub fn live_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

pub fn write_with_dirs(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent dirs");
    }
    fs::write(path, content).expect("failed to write file");
}
