//! Failure taxonomy for the upgrade pipeline.
//!
//! Every failure category carries a stable exit code so that automation can
//! tell a mount failure from a copy failure from a bad manifest. Components
//! construct the matching variant at the point of failure and let it bubble
//! through `anyhow`; `main` pulls the first `UpgradeError` out of the chain
//! and exits with its code.

use thiserror::Error;

/// Categorized upgrade failure with a stable exit code.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("bad argument: {0}")]
    Argument(String),

    #[error("cannot read configuration: {0}")]
    Config(String),

    #[error("cannot create temporary file: {0}")]
    TempFile(String),

    #[error("checksum mismatch: {0}")]
    Checksum(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("mount failed: {0}")]
    Mount(String),

    #[error("unmount failed: {0}")]
    Unmount(String),

    #[error("virtual device operation failed: {0}")]
    VirtualDevice(String),

    #[error("archive failed: {0}")]
    Archive(String),

    #[error("manifest evaluation failed: {0}")]
    Manifest(String),

    #[error("copy failed: {0}")]
    Copy(String),

    #[error("required file missing: {0}")]
    MissingFile(String),

    #[error("account management failed: {0}")]
    Accounts(String),
}

impl UpgradeError {
    /// Stable process exit code for this failure category.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpgradeError::Usage(_) => 1,
            UpgradeError::Argument(_) => 2,
            UpgradeError::Config(_) => 3,
            UpgradeError::TempFile(_) => 4,
            UpgradeError::Checksum(_) => 5,
            UpgradeError::Fetch(_) => 6,
            UpgradeError::Mount(_) => 7,
            UpgradeError::Unmount(_) => 8,
            UpgradeError::VirtualDevice(_) => 9,
            UpgradeError::Archive(_) => 10,
            UpgradeError::Manifest(_) => 11,
            UpgradeError::Copy(_) => 12,
            UpgradeError::MissingFile(_) => 13,
            UpgradeError::Accounts(_) => 14,
        }
    }
}

/// Find the exit code for an error chain.
///
/// Returns the code of the innermost `UpgradeError` in the chain, or 1 when
/// the chain carries no categorized failure.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<UpgradeError>())
        .map(UpgradeError::exit_code)
        .last()
        .unwrap_or(1)
}
