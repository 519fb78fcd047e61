//! Post-upgrade system database rebuilds.
//!
//! A fixed, configurable sequence of rebuild commands (shared-library
//! cache, man-page index, password databases, mail aliases). Targets vary
//! in which of these exist, so a command whose binary is absent is skipped
//! with a notice; a present command that fails aborts the run.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::process::{tool_exists, Cmd};

/// Run the configured rebuild commands in order.
pub fn rebuild_databases(config: &Config) -> Result<()> {
    for line in &config.rebuild_cmds {
        let mut parts = line.split_whitespace();
        let program = match parts.next() {
            Some(p) => p,
            None => continue,
        };
        if !tool_exists(program) {
            println!("Skipping {} (not installed)", program);
            continue;
        }
        println!("Rebuilding: {}", line);
        Cmd::new(program)
            .args(parts)
            .run()
            .with_context(|| format!("database rebuild '{}' failed", line))?;
    }
    Ok(())
}
