//! Kernel installation with a single kept rollback copy.
//!
//! The live kernel is rotated to `<kernel>.old` (replacing any older
//! rotation) before the release kernel is copied in. That one rotation is
//! the only rollback this tool supports.

use anyhow::Result;
use std::fs;

use crate::config::Config;
use crate::errors::UpgradeError;
use crate::exclude::ExclusionSet;
use crate::fscopy::{copy_file, copy_tree};

/// Install the release kernel, keeping the previous one as `.old`.
pub fn install_kernel(config: &Config) -> Result<()> {
    let src = config.mount_dir.join(&config.kernel);
    if !src.exists() {
        return Err(UpgradeError::MissingFile(format!(
            "release has no kernel at {}",
            src.display()
        ))
        .into());
    }

    let dst = config.destdir.join(&config.kernel);
    if dst.exists() {
        let old = config.destdir.join(format!("{}.old", config.kernel));
        if old.exists() {
            if old.is_dir() {
                fs::remove_dir_all(&old)
            } else {
                fs::remove_file(&old)
            }
            .map_err(|e| UpgradeError::Copy(format!("{}: {}", old.display(), e)))?;
        }
        fs::rename(&dst, &old)
            .map_err(|e| UpgradeError::Copy(format!("{}: {}", old.display(), e)))?;
        println!("Previous kernel kept as {}", old.display());
    }

    println!("Installing kernel {}", dst.display());
    let copied = if src.is_dir() {
        copy_tree(&src, &dst, &ExclusionSet::empty())
    } else {
        copy_file(&src, &dst)
    };
    copied.map_err(|e| UpgradeError::Copy(format!("{}: {:#}", dst.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> Config {
        let mut config = Config::load(None).unwrap();
        config.destdir = tmp.path().join("root");
        config.mount_dir = tmp.path().join("mnt");
        config
    }

    #[test]
    fn test_installs_and_rotates_once() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        fs::create_dir_all(config.mount_dir.join("boot")).unwrap();
        fs::create_dir_all(config.destdir.join("boot")).unwrap();
        fs::write(config.mount_dir.join("boot/vmlinuz"), b"v3").unwrap();
        fs::write(config.destdir.join("boot/vmlinuz"), b"v2").unwrap();
        fs::write(config.destdir.join("boot/vmlinuz.old"), b"v1").unwrap();

        install_kernel(&config).unwrap();

        assert_eq!(fs::read(config.destdir.join("boot/vmlinuz")).unwrap(), b"v3");
        // Only one backup is kept; v1 is gone.
        assert_eq!(
            fs::read(config.destdir.join("boot/vmlinuz.old")).unwrap(),
            b"v2"
        );
    }

    #[test]
    fn test_missing_release_kernel_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        fs::create_dir_all(&config.mount_dir).unwrap();

        let err = install_kernel(&config).unwrap_err();
        assert_eq!(crate::errors::exit_code_for(&err), 13);
    }

    #[test]
    fn test_fresh_install_without_live_kernel() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        fs::create_dir_all(config.mount_dir.join("boot")).unwrap();
        fs::write(config.mount_dir.join("boot/vmlinuz"), b"v3").unwrap();

        install_kernel(&config).unwrap();
        assert_eq!(fs::read(config.destdir.join("boot/vmlinuz")).unwrap(), b"v3");
        assert!(!config.destdir.join("boot/vmlinuz.old").exists());
    }
}
