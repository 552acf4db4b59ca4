use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a payment terminal as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TerminalStatus {
    Online,
    Offline,
    Disconnect,
    Error,
    Unknown,
}

impl TerminalStatus {
    /// Online/Offline are the two answers we take at face value; everything
    /// else is eligible for the second-pass re-probe.
    pub fn is_credible(self) -> bool {
        matches!(self, TerminalStatus::Online | TerminalStatus::Offline)
    }

    /// Parse the stored text form back into the enum.
    pub fn from_db(value: &str) -> Self {
        match value {
            "ONLINE" => TerminalStatus::Online,
            "OFFLINE" => TerminalStatus::Offline,
            "DISCONNECT" => TerminalStatus::Disconnect,
            "ERROR" => TerminalStatus::Error,
            _ => TerminalStatus::Unknown,
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalStatus::Online => write!(f, "ONLINE"),
            TerminalStatus::Offline => write!(f, "OFFLINE"),
            TerminalStatus::Disconnect => write!(f, "DISCONNECT"),
            TerminalStatus::Error => write!(f, "ERROR"),
            TerminalStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One observed outcome for one terminal.
///
/// A prober always produces an `Outcome`; every failure mode is encoded in
/// the fields rather than surfaced as an error.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Terminal protocol number that was probed
    pub tpn: String,

    /// When the observation completed
    pub checked_at: DateTime<Utc>,

    /// Classified status
    pub status: TerminalStatus,

    /// Truncated raw response body, if any response was received
    pub raw_response: Option<String>,

    /// Error description (transport failure or non-200 response)
    pub error: Option<String>,

    /// HTTP status code of the last received response
    pub http_status: Option<u16>,

    /// Total time spent on this terminal across all attempts
    pub latency_ms: u64,

    /// How many HTTP attempts were made (diagnostic only, not persisted)
    pub attempts: u32,
}

impl Outcome {
    /// Create a new outcome shell for a terminal
    pub fn new(tpn: impl Into<String>) -> Self {
        Self {
            tpn: tpn.into(),
            checked_at: Utc::now(),
            status: TerminalStatus::Unknown,
            raw_response: None,
            error: None,
            http_status: None,
            latency_ms: 0,
            attempts: 0,
        }
    }

    /// Mark as answered: an HTTP response was received and classified
    pub fn answered(
        mut self,
        status: TerminalStatus,
        raw: String,
        code: u16,
        latency_ms: u64,
    ) -> Self {
        self.status = status;
        self.raw_response = Some(raw);
        self.http_status = Some(code);
        self.latency_ms = latency_ms;
        self
    }

    /// Mark as failed after the attempt budget was exhausted
    pub fn failed(mut self, error: String, latency_ms: u64) -> Self {
        self.status = TerminalStatus::Error;
        self.error = Some(error);
        self.latency_ms = latency_ms;
        self
    }

    /// Attach an error description without changing the status
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// Record the number of attempts made
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// What a single HTTP attempt produced.
///
/// Retry policy is driven by matching on the variant: a received response is
/// terminal regardless of its status code, a transport failure may retry.
#[derive(Debug)]
pub enum AttemptOutcome {
    Received { code: u16, body: String },
    Transport { error: String },
}
