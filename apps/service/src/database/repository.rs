use anyhow::Result;
use async_trait::async_trait;
use libsql::params;

use super::models::{StatusCheck, Terminal};
use crate::checks::types::TerminalStatus;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Storage trait for the terminal and check tables.
///
/// `append_checks` is atomic for the whole batch: either every outcome of a
/// run is visible or none is.
#[async_trait]
pub trait Storage: Send + Sync {
    /// All known terminals, ordered by TPN
    async fn list_terminals(&self) -> Result<Vec<Terminal>>;

    /// Create a terminal on first sight; returns true if a row was created
    async fn insert_terminal_if_missing(&self, tpn: &str, merchant_id: Option<&str>)
    -> Result<bool>;

    /// Append one run's outcomes in a single transaction
    async fn append_checks(&self, checks: &[StatusCheck]) -> Result<()>;

    /// Read back how many checks were persisted for a run
    async fn count_checks_for_run(&self, run_id: &str) -> Result<u64>;

    /// Most recent checks for one terminal, newest first
    async fn recent_checks(&self, tpn: &str, limit: usize) -> Result<Vec<StatusCheck>>;
}

/// LibSQL storage implementation
pub struct LibsqlStorage {
    pool: LibsqlPool,
}

impl LibsqlStorage {
    /// Create a new storage instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl Storage for LibsqlStorage {
    async fn list_terminals(&self) -> Result<Vec<Terminal>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT id, tpn, merchant_id, created_at FROM terminals ORDER BY tpn", ())
            .await?;

        let mut terminals = Vec::new();
        while let Some(row) = rows.next().await? {
            terminals.push(Terminal {
                id: Some(row.get(0)?),
                tpn: row.get(1)?,
                merchant_id: row.get(2)?,
                created_at: Terminal::i64_to_timestamp(row.get(3)?),
            });
        }

        Ok(terminals)
    }

    async fn insert_terminal_if_missing(
        &self,
        tpn: &str,
        merchant_id: Option<&str>,
    ) -> Result<bool> {
        let conn = self.get_conn().await?;
        let created_at = Terminal::timestamp_to_i64(chrono::Utc::now());

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO terminals (tpn, merchant_id, created_at) VALUES (?, ?, ?)",
                params![tpn, merchant_id, created_at],
            )
            .await?;

        Ok(inserted > 0)
    }

    async fn append_checks(&self, checks: &[StatusCheck]) -> Result<()> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        for check in checks {
            tx.execute(
                "INSERT INTO status_checks
                    (terminal_id, checked_at, status, raw_response, error, http_status, latency_ms, run_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    check.terminal_id,
                    Terminal::timestamp_to_i64(check.checked_at),
                    check.status.to_string(),
                    check.raw_response.clone(),
                    check.error.clone(),
                    check.http_status.map(|code| code as i64),
                    check.latency_ms as i64,
                    check.run_id.clone()
                ],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count_checks_for_run(&self, run_id: &str) -> Result<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM status_checks WHERE run_id = ?", params![run_id])
            .await?;

        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)? as u64,
            None => 0,
        };

        Ok(count)
    }

    async fn recent_checks(&self, tpn: &str, limit: usize) -> Result<Vec<StatusCheck>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT c.id, c.terminal_id, c.checked_at, c.status, c.raw_response,
                        c.error, c.http_status, c.latency_ms, c.run_id
                 FROM status_checks c
                 JOIN terminals t ON t.id = c.terminal_id
                 WHERE t.tpn = ?
                 ORDER BY c.checked_at DESC, c.id DESC
                 LIMIT ?",
                params![tpn, limit as i64],
            )
            .await?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(3)?;
            checks.push(StatusCheck {
                id: Some(row.get(0)?),
                terminal_id: row.get(1)?,
                checked_at: Terminal::i64_to_timestamp(row.get(2)?),
                status: TerminalStatus::from_db(&status),
                raw_response: row.get(4)?,
                error: row.get(5)?,
                http_status: row.get::<Option<i64>>(6)?.map(|code| code as u16),
                latency_ms: row.get::<i64>(7)? as u64,
                run_id: row.get(8)?,
            });
        }

        Ok(checks)
    }
}
