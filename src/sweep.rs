//! Obsolete-file removal driven by an evaluated manifest.
//!
//! The manifest is a make-include-style file shipped in the release (and
//! merged through the configuration step, so an operator-reviewed `.new`
//! override is preferred when present). Two named list variables are
//! evaluated into paths; each existing path is removed from the target
//! root, clearing immutability flags first. Formatted manual pages get
//! their `cat<N>` companion swept alongside the `man<N>` source. Absent
//! paths are silently skipped: the manifest describes every file any past
//! release may have shipped, not this host's inventory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::{Config, MERGE_SUFFIX};
use crate::errors::UpgradeError;
use crate::process::{tool_exists, Cmd};

/// Remove every obsolete path named by the manifest.
pub fn sweep(config: &Config) -> Result<()> {
    let manifest = resolve_manifest(config)?;
    println!("Evaluating obsolete-file manifest {}", manifest.display());

    let content = fs::read_to_string(&manifest)
        .map_err(|e| UpgradeError::Manifest(format!("{}: {}", manifest.display(), e)))?;
    let paths = evaluate_manifest(&content, &config.obsolete_vars)?;

    let mut removed = 0usize;
    for entry in &paths {
        let target = config.destdir.join(entry.trim_start_matches('/'));
        removed += remove_path(config, &target)?;
        if let Some(cat) = formatted_page_companion(&target) {
            removed += remove_path(config, &cat)?;
        }
    }
    println!("Removed {} obsolete paths.", removed);
    Ok(())
}

/// Pick the manifest to evaluate: an operator-reviewed override (merge
/// suffix) wins over the installed default.
fn resolve_manifest(config: &Config) -> Result<PathBuf> {
    let base = config.destdir.join(&config.obsolete_manifest);
    let override_path = {
        let mut name = base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push('.');
        name.push_str(MERGE_SUFFIX);
        base.with_file_name(name)
    };

    if override_path.is_file() {
        return Ok(override_path);
    }
    if base.is_file() {
        return Ok(base);
    }
    Err(UpgradeError::Manifest(format!(
        "no manifest at {} (or {})",
        base.display(),
        override_path.display()
    ))
    .into())
}

/// Remove one path if it exists, logging first. Returns how many entries
/// were actually removed (0 or 1).
fn remove_path(config: &Config, target: &Path) -> Result<usize> {
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(UpgradeError::Copy(format!("{}: {}", target.display(), e)).into())
        }
    };

    println!("Removing {}", target.display());
    clear_immutable(config, target);

    let result = if meta.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    };
    result.map_err(|e| UpgradeError::Copy(format!("{}: {}", target.display(), e)))?;
    Ok(1)
}

/// Best-effort recursive clear of the immutable attribute. Not every
/// filesystem supports attributes, so a failure here is not a sweep
/// failure; the subsequent removal reports the real problem if one exists.
fn clear_immutable(config: &Config, target: &Path) {
    if !tool_exists(&config.chattr) {
        return;
    }
    let _ = Cmd::new(&config.chattr)
        .args(["-R", "-i"])
        .arg_path(target)
        .allow_fail()
        .run();
}

/// For a page under a numbered man section, the parallel formatted-cache
/// path (`.../man1/foo.1` -> `.../cat1/foo.1`).
pub fn formatted_page_companion(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?;
    let section = parent.file_name()?.to_str()?;
    let digits = section.strip_prefix("man")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let cat_dir = parent.with_file_name(format!("cat{}", digits));
    Some(cat_dir.join(path.file_name()?))
}

/// Evaluate the named list variables from a make-include-style manifest.
///
/// Supports comments, `=`/`+=`/`?=`/`:=` assignments, backslash
/// continuations, and `${VAR}`/`$(VAR)` references to variables defined in
/// the same file. The result is flattened in definition order with blanks
/// and duplicates filtered out.
pub fn evaluate_manifest(content: &str, var_names: &[String]) -> Result<Vec<String>> {
    let assignments = parse_assignments(content)?;

    let mut seen = std::collections::HashSet::new();
    let mut paths = Vec::new();
    for name in var_names {
        let words = match assignments.get(name.as_str()) {
            Some(words) => words,
            None => continue,
        };
        for word in words {
            let expanded = expand(word, &assignments, 0)?;
            for path in expanded.split_whitespace() {
                if path.is_empty() {
                    continue;
                }
                if seen.insert(path.to_string()) {
                    paths.push(path.to_string());
                }
            }
        }
    }
    Ok(paths)
}

fn parse_assignments(content: &str) -> Result<HashMap<String, Vec<String>>> {
    let mut vars: HashMap<String, Vec<String>> = HashMap::new();

    // Fold continuation lines first.
    let mut logical_lines: Vec<String> = Vec::new();
    let mut pending = String::new();
    for line in content.lines() {
        let trimmed = line.trim_end();
        if let Some(stripped) = trimmed.strip_suffix('\\') {
            pending.push_str(stripped);
            pending.push(' ');
            continue;
        }
        pending.push_str(trimmed);
        logical_lines.push(std::mem::take(&mut pending));
    }
    if !pending.is_empty() {
        logical_lines.push(pending);
    }

    for line in logical_lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (lhs, rhs) = match line.split_once('=') {
            Some(parts) => parts,
            None => {
                return Err(UpgradeError::Manifest(format!(
                    "not an assignment: {:?}",
                    line
                ))
                .into())
            }
        };

        let (name, op_append) = match lhs.trim_end().strip_suffix('+') {
            Some(name) => (name.trim(), true),
            None => (
                lhs.trim_end()
                    .trim_end_matches([':', '?'])
                    .trim(),
                false,
            ),
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(UpgradeError::Manifest(format!(
                "bad variable name in: {:?}",
                line
            ))
            .into());
        }

        let words: Vec<String> = rhs.split_whitespace().map(str::to_string).collect();
        let slot = vars.entry(name.to_string()).or_default();
        if !op_append {
            slot.clear();
        }
        slot.extend(words);
    }

    Ok(vars)
}

fn expand(word: &str, vars: &HashMap<String, Vec<String>>, depth: u8) -> Result<String> {
    if depth > 8 {
        return Err(UpgradeError::Manifest(format!(
            "variable expansion too deep at {:?}",
            word
        ))
        .into());
    }
    if !word.contains('$') {
        return Ok(word.to_string());
    }

    let mut out = String::new();
    let chars: Vec<char> = word.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() && (chars[i + 1] == '{' || chars[i + 1] == '(') {
            let close = if chars[i + 1] == '{' { '}' } else { ')' };
            let start = i + 2;
            let end = chars[start..]
                .iter()
                .position(|c| *c == close)
                .map(|p| start + p)
                .ok_or_else(|| {
                    UpgradeError::Manifest(format!("unterminated reference in {:?}", word))
                })?;
            let name: String = chars[start..end].iter().collect();
            if let Some(words) = vars.get(&name) {
                let mut expanded = Vec::with_capacity(words.len());
                for w in words {
                    expanded.push(expand(w, vars, depth + 1)?);
                }
                out.push_str(&expanded.join(" "));
            }
            i = end + 1;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Ok(out)
}
