/// Integration tests for the batch-check engine
///
/// These cover the run pipeline end to end against a scratch database:
/// fan-out, second-pass merge, persistence + verification, overlap guard
/// admission, and roster file import.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tempfile::{TempDir, tempdir};

use crate::checks::prober::Prober;
use crate::checks::types::{Outcome, TerminalStatus};
use crate::config::Config;
use crate::database::models::{StatusCheck, Terminal};
use crate::database::{LibsqlStorage, Storage, initialize_database};
use crate::orchestrator::{Orchestrator, Scheduler, TriggerError};
use crate::pool::{LibsqlManager, LibsqlPool};
use crate::roster::{Roster, StorageRoster, load_tpns_from_file};

/// Helper to create a pooled scratch database; the TempDir guard keeps the
/// file alive for the duration of the test.
async fn create_test_pool() -> Result<(LibsqlPool, TempDir)> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test.db");

    let database = libsql::Builder::new_local(&db_path).build().await?;
    let manager = LibsqlManager::new(database);
    let pool: LibsqlPool = deadpool::managed::Pool::builder(manager)
        .config(deadpool::managed::PoolConfig::default())
        .build()?;

    let conn = pool.get().await?;
    initialize_database(&conn).await?;
    drop(conn);

    Ok((pool, temp_dir))
}

/// Prober stub driven by a per-TPN script of statuses; each probe consumes
/// the next entry, repeating the last one once the script runs out.
struct StubProber {
    script: Mutex<HashMap<String, VecDeque<TerminalStatus>>>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Duration,
}

impl StubProber {
    fn new(script: &[(&str, &[TerminalStatus])]) -> Self {
        let script = script
            .iter()
            .map(|(tpn, statuses)| (tpn.to_string(), statuses.iter().copied().collect()))
            .collect();
        Self { script: Mutex::new(script), calls: Mutex::new(HashMap::new()), delay: Duration::ZERO }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self, tpn: &str) -> u32 {
        self.calls.lock().unwrap().get(tpn).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Prober for StubProber {
    async fn probe(&self, tpn: &str) -> Outcome {
        *self.calls.lock().unwrap().entry(tpn.to_string()).or_insert(0) += 1;

        let status = {
            let mut script = self.script.lock().unwrap();
            match script.get_mut(tpn) {
                Some(statuses) if statuses.len() > 1 => statuses.pop_front().unwrap(),
                Some(statuses) => statuses.front().copied().unwrap_or(TerminalStatus::Online),
                None => TerminalStatus::Online,
            }
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match status {
            TerminalStatus::Error => {
                Outcome::new(tpn).failed("Timeout: scripted".to_string(), 1).with_attempts(3)
            }
            status => Outcome::new(tpn)
                .answered(status, status.to_string(), 200, 1)
                .with_attempts(1),
        }
    }
}

/// Storage wrapper whose batch write always fails; everything else passes
/// through to the real implementation.
struct FailingStorage {
    inner: LibsqlStorage,
}

#[async_trait]
impl Storage for FailingStorage {
    async fn list_terminals(&self) -> Result<Vec<Terminal>> {
        self.inner.list_terminals().await
    }

    async fn insert_terminal_if_missing(
        &self,
        tpn: &str,
        merchant_id: Option<&str>,
    ) -> Result<bool> {
        self.inner.insert_terminal_if_missing(tpn, merchant_id).await
    }

    async fn append_checks(&self, _checks: &[StatusCheck]) -> Result<()> {
        Err(anyhow!("disk full"))
    }

    async fn count_checks_for_run(&self, run_id: &str) -> Result<u64> {
        self.inner.count_checks_for_run(run_id).await
    }

    async fn recent_checks(&self, tpn: &str, limit: usize) -> Result<Vec<StatusCheck>> {
        self.inner.recent_checks(tpn, limit).await
    }
}

fn make_orchestrator(storage: Arc<dyn Storage>, prober: Arc<dyn Prober>) -> Arc<Orchestrator> {
    let config = Arc::new(Config::default());
    let scheduler = Arc::new(Scheduler::new(
        &config.schedule.check_times().unwrap(),
        config.schedule.maintenance().unwrap(),
        config.schedule.tz().unwrap(),
    ));
    let roster: Arc<dyn Roster> = Arc::new(StorageRoster::new(storage.clone()));
    Arc::new(Orchestrator::from_parts(config, storage, roster, prober, scheduler))
}

async fn seed_terminals(storage: &dyn Storage, tpns: &[&str]) {
    for tpn in tpns {
        storage.insert_terminal_if_missing(tpn, None).await.unwrap();
    }
}

#[tokio::test]
async fn run_batch_persists_one_outcome_per_terminal() -> Result<()> {
    let (pool, _dir) = create_test_pool().await?;
    let storage: Arc<dyn Storage> = Arc::new(LibsqlStorage::new_from_pool(pool));
    seed_terminals(storage.as_ref(), &["1001", "1002", "1003"]).await;

    let prober = Arc::new(StubProber::new(&[
        ("1001", &[TerminalStatus::Online]),
        ("1002", &[TerminalStatus::Offline]),
        ("1003", &[TerminalStatus::Online]),
    ]));
    let orchestrator = make_orchestrator(storage.clone(), prober);

    let run_id = orchestrator.trigger_batch_run().await.unwrap();

    assert_eq!(storage.count_checks_for_run(&run_id).await?, 3);

    let checks = storage.recent_checks("1002", 5).await?;
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].status, TerminalStatus::Offline);
    assert_eq!(checks[0].run_id, run_id);
    assert_eq!(checks[0].http_status, Some(200));

    Ok(())
}

#[tokio::test]
async fn second_pass_replaces_only_credible_outcomes() -> Result<()> {
    let (pool, _dir) = create_test_pool().await?;
    let storage: Arc<dyn Storage> = Arc::new(LibsqlStorage::new_from_pool(pool));
    seed_terminals(storage.as_ref(), &["2001", "2002", "2003"]).await;

    // 2001 recovers on the re-probe, 2002 stays broken, 2003 is clean.
    let prober = Arc::new(StubProber::new(&[
        ("2001", &[TerminalStatus::Error, TerminalStatus::Offline]),
        ("2002", &[TerminalStatus::Unknown, TerminalStatus::Error]),
        ("2003", &[TerminalStatus::Online]),
    ]));
    let orchestrator = make_orchestrator(storage.clone(), prober.clone());

    let run_id = orchestrator.trigger_batch_run().await.unwrap();
    assert_eq!(storage.count_checks_for_run(&run_id).await?, 3);

    // Credible second answer replaces the first.
    assert_eq!(storage.recent_checks("2001", 1).await?[0].status, TerminalStatus::Offline);
    // A second error does not displace the first Unknown.
    assert_eq!(storage.recent_checks("2002", 1).await?[0].status, TerminalStatus::Unknown);
    assert_eq!(storage.recent_checks("2003", 1).await?[0].status, TerminalStatus::Online);

    // Exactly the non-credible subset was probed twice.
    assert_eq!(prober.calls("2001"), 2);
    assert_eq!(prober.calls("2002"), 2);
    assert_eq!(prober.calls("2003"), 1);

    Ok(())
}

#[tokio::test]
async fn empty_roster_yields_a_run_with_zero_outcomes() -> Result<()> {
    let (pool, _dir) = create_test_pool().await?;
    let storage: Arc<dyn Storage> = Arc::new(LibsqlStorage::new_from_pool(pool));

    let prober = Arc::new(StubProber::new(&[]));
    let orchestrator = make_orchestrator(storage.clone(), prober);

    let run_id = orchestrator.trigger_batch_run().await.unwrap();
    assert!(!run_id.is_empty());
    assert_eq!(storage.count_checks_for_run(&run_id).await?, 0);

    Ok(())
}

#[tokio::test]
async fn concurrent_manual_triggers_admit_exactly_one() -> Result<()> {
    let (pool, _dir) = create_test_pool().await?;
    let storage: Arc<dyn Storage> = Arc::new(LibsqlStorage::new_from_pool(pool));
    seed_terminals(storage.as_ref(), &["3001"]).await;

    let prober = Arc::new(
        StubProber::new(&[("3001", &[TerminalStatus::Online])])
            .with_delay(Duration::from_millis(300)),
    );
    let orchestrator = make_orchestrator(storage, prober);

    let first = orchestrator.clone();
    let winner = tokio::spawn(async move { first.trigger_batch_run().await });

    // Give the spawned run time to claim the permit.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let loser = orchestrator.trigger_batch_run().await;
    assert!(matches!(loser, Err(TriggerError::Conflict)));
    assert!(orchestrator.run_in_progress());

    let run_id = winner.await.unwrap().unwrap();
    assert!(!run_id.is_empty());

    // Once the run finished the slot is free again.
    assert!(!orchestrator.run_in_progress());
    orchestrator.trigger_batch_run().await.unwrap();

    Ok(())
}

#[tokio::test]
async fn guard_is_released_after_a_failed_run() -> Result<()> {
    let (pool, _dir) = create_test_pool().await?;
    let inner = LibsqlStorage::new_from_pool(pool);
    let storage: Arc<dyn Storage> = Arc::new(FailingStorage { inner });
    seed_terminals(storage.as_ref(), &["4001"]).await;

    let prober = Arc::new(StubProber::new(&[("4001", &[TerminalStatus::Online])]));
    let orchestrator = make_orchestrator(storage, prober);

    let result = orchestrator.trigger_batch_run().await;
    assert!(matches!(result, Err(TriggerError::Failed(_))));

    // A second attempt must hit the storage failure again, not a Conflict:
    // the permit was released despite the error.
    let result = orchestrator.trigger_batch_run().await;
    assert!(matches!(result, Err(TriggerError::Failed(_))));

    Ok(())
}

#[tokio::test]
async fn roster_file_import_creates_unseen_terminals_once() -> Result<()> {
    let (pool, dir) = create_test_pool().await?;
    let storage: Arc<dyn Storage> = Arc::new(LibsqlStorage::new_from_pool(pool));

    let tpn_file = dir.path().join("tpns.txt");
    std::fs::write(&tpn_file, "1001\n\n# fleet two\nbad tpn!\n1002\n1001\n")?;

    let created = load_tpns_from_file(&tpn_file, storage.as_ref()).await?;
    assert_eq!(created, 2);

    // Re-import is a no-op; known terminals are never recreated or removed.
    let created = load_tpns_from_file(&tpn_file, storage.as_ref()).await?;
    assert_eq!(created, 0);

    let terminals = storage.list_terminals().await?;
    let tpns: Vec<&str> = terminals.iter().map(|t| t.tpn.as_str()).collect();
    assert_eq!(tpns, vec!["1001", "1002"]);

    Ok(())
}
