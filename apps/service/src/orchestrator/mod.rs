/// Orchestrator module - the batch-check engine
///
/// Drives one batch run end to end: roster snapshot, bounded concurrent
/// fan-out, selective second pass, merge, atomic persistence, and post-write
/// verification. The scheduler and the manual API path both enter through
/// the overlap guard, so at most one batch runs system-wide.
pub mod backup;
pub mod guard;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use guard::{RunGuard, RunPermit};
pub use scheduler::{Scheduler, SchedulerStatus};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::checks::merge::merge;
use crate::checks::prober::{HttpProber, Prober};
use crate::checks::types::Outcome;
use crate::config::Config;
use crate::database::models::{StatusCheck, Terminal};
use crate::database::{LibsqlStorage, Storage, initialize_database};
use crate::pool::LibsqlPool;
use crate::roster::{Roster, StorageRoster, load_tpns_from_file};

/// Settle delay between the first pass and the selective re-probe; long
/// enough for transient gateway load to clear.
const REPROBE_DELAY: Duration = Duration::from_secs(2);

/// Outcome of a manual trigger request.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("a check run is already in progress")]
    Conflict,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Main orchestrator for the termwatch service
pub struct Orchestrator {
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    roster: Arc<dyn Roster>,
    prober: Arc<dyn Prober>,
    guard: Arc<RunGuard>,
    scheduler: Arc<Scheduler>,
}

impl Orchestrator {
    /// Create and start: initialize the schema, import the roster file,
    /// spawn the scheduler, run the eager catch-up if the first slot of the
    /// day has not passed, then serve the operator API until shutdown.
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let orchestrator = Arc::new(Self::new(config, pool).await?);

        if let Some(tpn_file) = orchestrator.config.database.tpn_file.clone() {
            load_tpns_from_file(&tpn_file, orchestrator.storage.as_ref()).await?;
        }

        tokio::spawn(orchestrator.scheduler.clone().run(orchestrator.clone()));

        if orchestrator.scheduler.before_first_check_today(Utc::now()) {
            info!("running initial check before the first scheduled slot of the day");
            let eager = orchestrator.clone();
            tokio::spawn(async move { eager.scheduled_batch().await });
        }

        crate::api::serve(orchestrator).await
    }

    async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        let config = Arc::new(config);

        let conn = pool.get().await?;
        info!("Initializing database schema...");
        initialize_database(&conn).await?;
        drop(conn);

        let storage: Arc<dyn Storage> = Arc::new(LibsqlStorage::new_from_pool(pool));
        let roster: Arc<dyn Roster> = Arc::new(StorageRoster::new(storage.clone()));

        let limiter = Arc::new(Semaphore::new(config.probe.concurrent_requests.max(1)));
        let prober: Arc<dyn Prober> =
            Arc::new(HttpProber::new(config.probe.to_probe_config(), limiter)?);

        let scheduler = Arc::new(Scheduler::new(
            &config.schedule.check_times()?,
            config.schedule.maintenance()?,
            config.schedule.tz()?,
        ));

        Ok(Self { config, storage, roster, prober, guard: RunGuard::new(), scheduler })
    }

    /// Assemble an orchestrator from pre-built parts; the test seam.
    #[cfg(test)]
    fn from_parts(
        config: Arc<Config>,
        storage: Arc<dyn Storage>,
        roster: Arc<dyn Roster>,
        prober: Arc<dyn Prober>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self { config, storage, roster, prober, guard: RunGuard::new(), scheduler }
    }

    /// One full batch run. Callers must already hold the run permit.
    async fn run_batch(&self) -> Result<String> {
        let run_id = Uuid::new_v4().to_string();
        info!(run_id, "starting check run");

        // Stable snapshot for the whole run; roster changes land next run.
        let terminals = self.roster.list_terminals().await?;
        if terminals.is_empty() {
            warn!(run_id, "roster is empty, nothing to check");
            return Ok(run_id);
        }
        info!(run_id, count = terminals.len(), "probing terminals");

        let mut outcomes = self.probe_all(&terminals).await;

        // Second, smaller pass over everything that was neither Online nor
        // Offline; transient gateway load often clears within seconds.
        let retry_indices: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| !outcome.status.is_credible())
            .map(|(index, _)| index)
            .collect();

        if !retry_indices.is_empty() {
            info!(run_id, count = retry_indices.len(), "re-probing non-credible outcomes");
            tokio::time::sleep(REPROBE_DELAY).await;

            let subset: Vec<Terminal> =
                retry_indices.iter().map(|&index| terminals[index].clone()).collect();
            let second_pass = self.probe_all(&subset).await;

            for (&index, second) in retry_indices.iter().zip(second_pass) {
                let first = outcomes[index].clone();
                outcomes[index] = merge(first, Some(second));
            }
        }

        let rows: Vec<StatusCheck> = terminals
            .iter()
            .zip(&outcomes)
            .filter_map(|(terminal, outcome)| {
                terminal.id.map(|id| StatusCheck::from_outcome(id, outcome, &run_id))
            })
            .collect();

        self.storage.append_checks(&rows).await?;

        // Post-write verification: a mismatch is observable history, not a
        // reason to fail a run whose write already committed.
        let saved = self.storage.count_checks_for_run(&run_id).await?;
        if saved == rows.len() as u64 {
            info!(run_id, saved, "check run persisted and verified");
        } else {
            warn!(
                run_id,
                saved,
                expected = rows.len(),
                "persisted check count does not match probed terminals"
            );
        }

        Ok(run_id)
    }

    async fn probe_all(&self, terminals: &[Terminal]) -> Vec<Outcome> {
        join_all(terminals.iter().map(|terminal| self.prober.probe(&terminal.tpn))).await
    }

    /// Manual trigger path: rejected with `Conflict` while a run is in
    /// flight anywhere in the process.
    pub async fn trigger_batch_run(&self) -> Result<String, TriggerError> {
        let Some(_permit) = self.guard.try_acquire() else {
            return Err(TriggerError::Conflict);
        };
        let run_id = self.run_batch().await?;
        Ok(run_id)
    }

    /// Scheduled trigger path: conflicts are logged and skipped by design.
    pub async fn scheduled_batch(&self) {
        let Some(_permit) = self.guard.try_acquire() else {
            warn!("check already in progress, skipping scheduled run");
            return;
        };
        if let Err(error) = self.run_batch().await {
            error!(error = format!("{error:#}"), "scheduled check run failed");
        }
    }

    /// Nightly maintenance: back up the database file and rotate old copies.
    /// Failures are logged, never fatal to the service.
    pub async fn run_maintenance(&self) {
        let db_path = self.config.database.path.clone();
        let backup_dir = self.config.database.backup_dir.clone();
        let keep = self.config.database.backup_keep;

        let result =
            tokio::task::spawn_blocking(move || backup::backup_database(&db_path, &backup_dir, keep))
                .await;

        match result {
            Ok(Ok(target)) => info!(target = %target.display(), "nightly backup completed"),
            Ok(Err(error)) => error!(error = format!("{error:#}"), "nightly backup failed"),
            Err(error) => error!(%error, "nightly backup task panicked"),
        }
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_fire_time(Utc::now())
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status(Utc::now())
    }

    pub fn run_in_progress(&self) -> bool {
        self.guard.is_held()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
