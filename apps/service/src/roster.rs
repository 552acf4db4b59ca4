use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::database::Storage;
use crate::database::models::Terminal;

/// Roster collaborator: supplies the set of terminals to poll.
///
/// The orchestrator takes one snapshot per run and never re-fetches
/// mid-run; identifier lifecycle (addition/removal) lives behind this seam.
#[async_trait]
pub trait Roster: Send + Sync {
    async fn list_terminals(&self) -> Result<Vec<Terminal>>;
}

/// Roster backed by the terminals table.
pub struct StorageRoster {
    storage: Arc<dyn Storage>,
}

impl StorageRoster {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Roster for StorageRoster {
    async fn list_terminals(&self) -> Result<Vec<Terminal>> {
        self.storage.list_terminals().await
    }
}

/// Import newline-separated TPNs into the terminals table.
///
/// Blank lines and `#` comments are ignored; malformed entries are skipped
/// with a warning. Returns the number of newly created terminals — existing
/// TPNs are left untouched, history stays attributable.
pub async fn load_tpns_from_file(path: &Path, storage: &dyn Storage) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read TPN file {}", path.display()))?;

    let mut created = 0;
    for line in raw.lines() {
        let tpn = line.trim();
        if tpn.is_empty() || tpn.starts_with('#') {
            continue;
        }
        if !tpn.chars().all(|c| c.is_ascii_alphanumeric()) {
            warn!(tpn, "skipping malformed TPN");
            continue;
        }
        if storage.insert_terminal_if_missing(tpn, None).await? {
            created += 1;
        }
    }

    info!(path = %path.display(), created, "TPN roster file imported");
    Ok(created)
}
