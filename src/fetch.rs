//! Release image acquisition.
//!
//! The image argument is either a local file or an http(s) URL. URLs are
//! downloaded into the cache directory with the configured fetch tool; in
//! either case an expected SHA-256, when configured, is verified in-process
//! before the image is handed to the mount step. A corrupt download is
//! deleted so a retry starts clean.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::errors::UpgradeError;
use crate::process::Cmd;

/// Resolve the image argument to a local file, fetching and verifying as
/// needed.
pub fn resolve_image(config: &Config, image: &str) -> Result<PathBuf> {
    let path = if image.starts_with("http://") || image.starts_with("https://") {
        fetch(config, image)?
    } else {
        let path = PathBuf::from(image);
        if !path.is_file() {
            return Err(UpgradeError::MissingFile(format!("image file {}", image)).into());
        }
        path
    };

    if let Some(expected) = &config.image_sha256 {
        verify_checksum(&path, expected)?;
    }
    Ok(path)
}

fn fetch(config: &Config, url: &str) -> Result<PathBuf> {
    fs::create_dir_all(&config.cache_dir)
        .map_err(|e| UpgradeError::Fetch(format!("{}: {}", config.cache_dir.display(), e)))?;

    let name = url
        .rsplit('/')
        .find(|seg| !seg.is_empty())
        .unwrap_or("release.img");
    let dest = config.cache_dir.join(name);

    if dest.is_file() {
        println!("Image already fetched: {}", dest.display());
        return Ok(dest);
    }

    println!("Fetching {}", url);
    Cmd::new(&config.fetch)
        .args(["-fL", "--progress-bar", "-o"])
        .arg_path(&dest)
        .arg(url)
        .run_streaming()
        .map_err(|e| UpgradeError::Fetch(format!("{}: {:#}", url, e)))?;

    Ok(dest)
}

/// Verify the SHA-256 of a file, deleting it on mismatch.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    println!("Verifying SHA-256 of {}", path.display());
    let actual = sha256_file(path)
        .map_err(|e| UpgradeError::Checksum(format!("{}: {}", path.display(), e)))?;

    if !actual.eq_ignore_ascii_case(expected.trim()) {
        let _ = fs::remove_file(path);
        return Err(UpgradeError::Checksum(format!(
            "{}\n  expected: {}\n  actual:   {}\n  (corrupt file deleted)",
            path.display(),
            expected,
            actual
        ))
        .into());
    }
    println!("Checksum OK.");
    Ok(())
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // sha256 of the ASCII bytes "release image contents"
    const CONTENT: &[u8] = b"release image contents";

    fn content_digest() -> String {
        let digest = Sha256::digest(CONTENT);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_checksum_match() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("image");
        fs::write(&path, CONTENT).unwrap();

        verify_checksum(&path, &content_digest()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_checksum_mismatch_deletes_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("image");
        fs::write(&path, CONTENT).unwrap();

        let err = verify_checksum(&path, &"0".repeat(64)).unwrap_err();
        assert_eq!(crate::errors::exit_code_for(&err), 5);
        assert!(!path.exists());
    }

    #[test]
    fn test_local_image_must_exist() {
        let mut config = Config::load(None).unwrap();
        config.image_sha256 = None;
        let err = resolve_image(&config, "/nonexistent/release.img").unwrap_err();
        assert_eq!(crate::errors::exit_code_for(&err), 13);
    }
}
