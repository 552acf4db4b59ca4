use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checks::types::{Outcome, TerminalStatus};

/// Terminal model - one monitored payment terminal, keyed by its TPN.
///
/// Terminals are created on first sight and never deleted by the engine, so
/// check history stays attributable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminal {
    pub id: Option<i64>,
    pub tpn: String,
    /// External merchant profile reference, if the roster supplied one
    pub merchant_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Terminal {
    /// Create a new terminal record for an unseen TPN
    pub fn new(tpn: impl Into<String>) -> Self {
        Self { id: None, tpn: tpn.into(), merchant_id: None, created_at: Utc::now() }
    }

    /// Convert a UTC timestamp to the stored Unix-seconds form
    pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
        time.timestamp()
    }

    /// Convert stored Unix seconds back to a UTC timestamp
    pub fn i64_to_timestamp(timestamp: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(timestamp, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// StatusCheck model - one persisted observation of one terminal.
///
/// Rows are append-only; a row belongs to exactly one run and is never
/// mutated after the batch write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCheck {
    pub id: Option<i64>,
    pub terminal_id: i64,
    pub checked_at: DateTime<Utc>,
    pub status: TerminalStatus,
    pub raw_response: Option<String>,
    pub error: Option<String>,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    pub run_id: String,
}

impl StatusCheck {
    /// Build the persisted row for a probe outcome
    pub fn from_outcome(terminal_id: i64, outcome: &Outcome, run_id: &str) -> Self {
        Self {
            id: None,
            terminal_id,
            checked_at: outcome.checked_at,
            status: outcome.status,
            raw_response: outcome.raw_response.clone(),
            error: outcome.error.clone(),
            http_status: outcome.http_status,
            latency_ms: outcome.latency_ms,
            run_id: run_id.to_string(),
        }
    }
}
