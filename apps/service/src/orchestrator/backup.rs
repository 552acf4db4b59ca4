use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

/// Filename prefix for rotated copies
const BACKUP_PREFIX: &str = "termwatch-";

/// Copy the live database file into the backup directory and prune old
/// copies down to `keep`. Blocking; callers run it off the async runtime.
pub fn backup_database(db_path: &Path, backup_dir: &Path, keep: usize) -> Result<PathBuf> {
    std::fs::create_dir_all(backup_dir)
        .with_context(|| format!("failed to create backup dir {}", backup_dir.display()))?;

    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let target = backup_dir.join(format!("{BACKUP_PREFIX}{stamp}.db"));
    std::fs::copy(db_path, &target)
        .with_context(|| format!("failed to copy {} to {}", db_path.display(), target.display()))?;

    info!(target = %target.display(), "database backup written");
    prune_backups(backup_dir, keep)?;

    Ok(target)
}

/// Delete the oldest rotated copies beyond `keep`. Timestamped names sort
/// chronologically, so a plain sort is enough.
fn prune_backups(backup_dir: &Path, keep: usize) -> Result<()> {
    let mut backups: Vec<PathBuf> = std::fs::read_dir(backup_dir)
        .with_context(|| format!("failed to list backup dir {}", backup_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(BACKUP_PREFIX) && name.ends_with(".db"))
                .unwrap_or(false)
        })
        .collect();

    backups.sort();

    let excess = backups.len().saturating_sub(keep.max(1));
    for old in backups.into_iter().take(excess) {
        match std::fs::remove_file(&old) {
            Ok(()) => info!(backup = %old.display(), "pruned old backup"),
            Err(error) => warn!(backup = %old.display(), %error, "failed to prune old backup"),
        }
    }

    Ok(())
}
