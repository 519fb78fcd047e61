//! Bulk installation of the release's top-level trees into the live root.
//!
//! The configuration directory is deliberately not installable here: it is
//! owned by the reconciliation step, which merges instead of clobbering.
//! Finding it in the install list is an operator configuration wart, so it
//! warns and skips rather than failing the upgrade.

use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::errors::UpgradeError;
use crate::exclude::{build_exclusion_file, ExclusionSet};
use crate::fscopy::copy_tree;
use crate::process::{tool_exists, Cmd};

/// Directory-structure templates shipped in the release, applied before
/// files are layered on top so ownership/permission baselines exist.
/// (template file under <mount>/etc/mtree, target subtree under the root)
const MTREE_TEMPLATES: &[(&str, &str)] = &[
    ("root.dist", "."),
    ("usr.dist", "usr"),
    ("var.dist", "var"),
    ("include.dist", "usr/include"),
];

/// Install every tree in the configured install list from the mounted
/// release into the live root.
pub fn install(config: &Config) -> Result<()> {
    rematerialize_templates(config)?;

    let exclusion_file = build_exclusion_file(config, &config.destdir)?;
    let exclude = ExclusionSet::from_file(exclusion_file.path())?;

    for entry in &config.install_list {
        let entry = entry.trim_matches('/');
        if entry == config.config_dir {
            eprintln!(
                "WARNING: {} is in the install list but is never bulk-installed; \
                 it is handled by the configuration merge step",
                entry
            );
            continue;
        }

        let src = config.mount_dir.join(entry);
        if !src.exists() {
            return Err(UpgradeError::MissingFile(format!(
                "release has no {} (looked at {})",
                entry,
                src.display()
            ))
            .into());
        }

        let dst = config.destdir.join(entry);
        println!("Installing /{}", entry);
        copy_tree(&src, &dst, &exclude)
            .map_err(|e| UpgradeError::Copy(format!("/{}: {:#}", entry, e)))?;
    }

    Ok(())
}

/// Apply the release's mtree templates to the live root and its subtrees.
///
/// Skipped quietly when the mtree tool or the template files are absent;
/// a template that exists but fails to apply is fatal.
fn rematerialize_templates(config: &Config) -> Result<()> {
    if !tool_exists(&config.mtree) {
        return Ok(());
    }

    let template_dir = config.mount_dir.join(&config.config_dir).join("mtree");
    for (template, subtree) in MTREE_TEMPLATES {
        let file = template_dir.join(template);
        if !file.exists() {
            continue;
        }
        let target = config.destdir.join(subtree);
        println!("Applying directory template {}", template);
        run_mtree(config, &file, &target)
            .map_err(|e| UpgradeError::Copy(format!("mtree {}: {:#}", template, e)))?;
    }
    Ok(())
}

fn run_mtree(config: &Config, template: &Path, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)?;
    Cmd::new(&config.mtree)
        .args(["-deU", "-f"])
        .arg_path(template)
        .arg("-p")
        .arg_path(target)
        .run()?;
    Ok(())
}
