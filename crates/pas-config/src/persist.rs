//! Crash-safe document persistence
//!
//! Writes go to a temp file in the target directory and are renamed into
//! place. The previous file is first copied to `<name>-YYYYmmddHHMMSS.json`
//! and old copies beyond the keep count are pruned.
//!
//! Two processes saving the same document concurrently are not serialized;
//! the rename only guarantees that neither leaves a torn file.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> Result<()> {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Create the config root (0700) if it does not exist yet
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory {:?}", dir))?;
        restrict(dir, 0o700)?;
    }
    Ok(())
}

/// Atomically replace `path` with `content` (0600)
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;

    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    restrict(tmp.path(), 0o600)?;

    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {:?}", path))?;

    Ok(())
}

fn backup_path(path: &Path, ts: &str, counter: u64) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "json".to_string());

    if counter == 0 {
        path.with_file_name(format!("{}-{}.{}", stem, ts, ext))
    } else {
        path.with_file_name(format!("{}-{}-{}.{}", stem, ts, counter, ext))
    }
}

/// Document a backup file belongs to (`name-YYYYmmddHHMMSS[-N].ext` -> `name.ext`)
///
/// Only the file name is inspected; the document may not exist.
pub fn backup_source(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy().to_string();
    let ext = path.extension()?.to_string_lossy().to_string();
    let pattern = Regex::new(r"^(.+)-\d{14}(?:-\d+)?$").ok()?;
    let base = pattern.captures(&stem)?.get(1)?.as_str().to_string();
    Some(path.with_file_name(format!("{}.{}", base, ext)))
}

/// Existing backups of `path` as `(timestamp, counter, path)`
fn existing_backups(path: &Path) -> Result<Vec<(String, u64, PathBuf)>> {
    let Some(dir) = path.parent() else {
        return Ok(vec![]);
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "json".to_string());

    let pattern = Regex::new(&format!(
        r"^{}-(\d{{14}})(?:-(\d+))?\.{}$",
        regex::escape(&stem),
        regex::escape(&ext)
    ))?;

    let mut backups = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(caps) = pattern.captures(&name) {
            let counter = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            backups.push((caps[1].to_string(), counter, entry.path()));
        }
    }

    Ok(backups)
}

/// Copy `path` to a timestamped sibling and prune old backups
///
/// Returns the backup path, or `None` when there was nothing to back up.
pub fn backup_with_timestamp(path: &Path, keep: usize) -> Result<Option<PathBuf>> {
    if keep == 0 || !path.is_file() {
        return Ok(None);
    }

    let ts = chrono::Local::now().format(BACKUP_TIMESTAMP_FORMAT).to_string();

    // Same-second backups get a counter above any already taken
    let mut backups = existing_backups(path)?;
    let counter = backups
        .iter()
        .filter(|(t, _, _)| *t == ts)
        .map(|(_, c, _)| c + 1)
        .max()
        .unwrap_or(0);
    let backup = backup_path(path, &ts, counter);

    fs::copy(path, &backup)
        .with_context(|| format!("Failed to back up {:?}", path))?;
    restrict(&backup, 0o600)?;
    backups.push((ts, counter, backup.clone()));

    // Newest first
    backups.sort_by(|a, b| (&b.0, b.1).cmp(&(&a.0, a.1)));
    for (_, _, old) in backups.into_iter().skip(keep) {
        if let Err(e) = fs::remove_file(&old) {
            tracing::debug!("Could not prune backup {:?}: {}", old, e);
        }
    }

    Ok(Some(backup))
}

/// True if any string in `value` equals one of `needles`
fn holds_any(value: &Value, needles: &[String]) -> bool {
    match value {
        Value::String(s) => needles.iter().any(|n| n == s),
        Value::Array(items) => items.iter().any(|v| holds_any(v, needles)),
        Value::Object(obj) => obj.values().any(|v| holds_any(v, needles)),
        _ => false,
    }
}

/// Delete backups of `path` that still hold any of `secrets` in plaintext
///
/// Returns the number of backups removed.
pub fn remove_backups_containing(path: &Path, secrets: &[String]) -> Result<usize> {
    if secrets.is_empty() {
        return Ok(0);
    }

    let mut removed = 0;
    for (_, _, backup) in existing_backups(path)? {
        let content = fs::read_to_string(&backup)
            .with_context(|| format!("Failed to read backup {:?}", backup))?;
        let leaks = match serde_json::from_str::<Value>(&content) {
            Ok(value) => holds_any(&value, secrets),
            Err(_) => secrets.iter().any(|s| content.contains(s.as_str())),
        };
        if leaks {
            fs::remove_file(&backup)
                .with_context(|| format!("Failed to remove backup {:?}", backup))?;
            tracing::debug!("Removed backup {:?} holding a migrated secret", backup);
            removed += 1;
        }
    }

    Ok(removed)
}
