//! sysupgrade library exports.
//!
//! The binary is thin; everything lives here so integration tests can
//! exercise the components directly.

pub mod accounts;
pub mod backup;
pub mod config;
pub mod errors;
pub mod exclude;
pub mod fetch;
pub mod fscopy;
pub mod install;
pub mod kernel;
pub mod mount;
pub mod postinstall;
pub mod process;
pub mod reconcile;
pub mod steps;
pub mod sweep;
