//! Recursive tree copy used by the install and reconcile steps.
//!
//! Deterministic (sorted) walk, preserves permission bits and ownership,
//! recreates symlinks, and refuses to write any destination path present in
//! the exclusion set. Existing destination files outside the exclusion set
//! are overwritten; that is what a bulk install is.

use std::fs;
use std::os::unix::fs::{chown, lchown, symlink, MetadataExt};
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::exclude::ExclusionSet;

/// Copy the tree rooted at `src` into `dst`, skipping excluded destinations.
///
/// `dst` itself is created if needed. An excluded directory prunes its whole
/// subtree.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &ExclusionSet) -> Result<()> {
    let mut walker = WalkDir::new(src).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("walking {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields paths under its root");
        let target = dst.join(rel);

        if exclude.contains(&target) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
            preserve_attrs(entry.path(), &target, false)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("reading link {}", entry.path().display()))?;
            remove_existing(&target)?;
            symlink(&link, &target)
                .with_context(|| format!("linking {}", target.display()))?;
            preserve_attrs(entry.path(), &target, true)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Copy a single file, preserving permission bits and ownership.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
    preserve_attrs(src, dst, false)
}

fn preserve_attrs(src: &Path, dst: &Path, is_symlink: bool) -> Result<()> {
    let meta = fs::symlink_metadata(src)
        .with_context(|| format!("stat {}", src.display()))?;
    if is_symlink {
        lchown(dst, Some(meta.uid()), Some(meta.gid()))
            .with_context(|| format!("chown {}", dst.display()))?;
    } else {
        fs::set_permissions(dst, meta.permissions())
            .with_context(|| format!("chmod {}", dst.display()))?;
        chown(dst, Some(meta.uid()), Some(meta.gid()))
            .with_context(|| format!("chown {}", dst.display()))?;
    }
    Ok(())
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("replacing {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_copies_files_dirs_and_symlinks() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file"), b"payload").unwrap();
        symlink("sub/file", src.join("link")).unwrap();

        copy_tree(&src, &dst, &ExclusionSet::empty()).unwrap();

        assert_eq!(fs::read(dst.join("sub/file")).unwrap(), b"payload");
        assert_eq!(
            fs::read_link(dst.join("link")).unwrap(),
            Path::new("sub/file")
        );
    }

    #[test]
    fn test_preserves_mode_bits() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("tool"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(src.join("tool"), fs::Permissions::from_mode(0o755)).unwrap();

        copy_tree(&src, &dst, &ExclusionSet::empty()).unwrap();

        let mode = fs::metadata(dst.join("tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_excluded_destination_survives() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("fstab"), b"release fstab").unwrap();
        fs::write(src.join("motd"), b"release motd").unwrap();
        fs::write(dst.join("fstab"), b"local fstab").unwrap();

        let file = {
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            writeln!(f, "{}", dst.join("fstab").display()).unwrap();
            f
        };
        let exclude = ExclusionSet::from_file(file.path()).unwrap();
        assert!(!exclude.is_empty());

        copy_tree(&src, &dst, &exclude).unwrap();

        assert_eq!(fs::read(dst.join("fstab")).unwrap(), b"local fstab");
        assert_eq!(fs::read(dst.join("motd")).unwrap(), b"release motd");
    }

    #[test]
    fn test_overwrites_unprotected_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("binary"), b"v2").unwrap();
        fs::write(dst.join("binary"), b"v1").unwrap();

        copy_tree(&src, &dst, &ExclusionSet::empty()).unwrap();
        assert_eq!(fs::read(dst.join("binary")).unwrap(), b"v2");
    }
}
