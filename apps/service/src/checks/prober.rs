use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::debug;

use super::parser::{MAX_RESPONSE_LEN, classify, truncate};
use super::types::{AttemptOutcome, Outcome, TerminalStatus};

/// Tunables for the HTTP prober. Defaults mirror the production gateway
/// settings; tests shrink the delays.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Status endpoint, queried as `<base_url>?tpn=<tpn>`
    pub base_url: String,
    /// Per-attempt request timeout
    pub timeout_seconds: u64,
    /// Attempt budget per terminal, transport failures only
    pub max_retries: u32,
    /// Upper bound of the uniform start jitter
    pub jitter_ms: u64,
    /// Backoff unit: attempt n sleeps `2^n * base + uniform(0, base)`
    pub backoff_base_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://spinpos.net/spin/GetTerminalStatus".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            jitter_ms: 500,
            backoff_base_ms: 1000,
        }
    }
}

/// Prober trait: one status observation per call.
///
/// Implementations never fail; every failure mode is encoded in the returned
/// `Outcome` so one bad terminal can never poison a batch.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, tpn: &str) -> Outcome;
}

/// HTTP prober against the terminal status gateway.
pub struct HttpProber {
    client: reqwest::Client,
    config: ProbeConfig,
    limiter: Arc<Semaphore>,
}

impl HttpProber {
    /// Create a prober sharing the batch-wide concurrency limiter.
    pub fn new(config: ProbeConfig, limiter: Arc<Semaphore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config, limiter })
    }

    async fn attempt(&self, url: &str) -> AttemptOutcome {
        match self.client.get(url).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                match response.text().await {
                    Ok(body) => AttemptOutcome::Received { code, body },
                    Err(error) => {
                        AttemptOutcome::Transport { error: format!("Body read error: {error}") }
                    }
                }
            }
            Err(error) if error.is_timeout() => {
                AttemptOutcome::Transport { error: format!("Timeout: {error}") }
            }
            Err(error) => AttemptOutcome::Transport { error: format!("Request error: {error}") },
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.max(1);
        let jitter = rand::thread_rng().gen_range(0..base);
        Duration::from_millis(base * 2u64.pow(attempt) + jitter)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, tpn: &str) -> Outcome {
        // Desynchronize the burst of concurrent starts against the gateway.
        if self.config.jitter_ms > 0 {
            let jitter = rand::thread_rng().gen_range(0..=self.config.jitter_ms);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        // The slot is held for the whole attempt budget, not per request.
        let _slot = match self.limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Outcome::new(tpn).failed("concurrency limiter closed".to_string(), 0);
            }
        };

        let url = format!("{}?tpn={}", self.config.base_url, tpn);
        let start = Instant::now();
        let mut last_error: Option<String> = None;

        for attempt in 0..self.config.max_retries {
            match self.attempt(&url).await {
                AttemptOutcome::Received { code, body } => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    let status = classify(&body);
                    let raw = truncate(&body, MAX_RESPONSE_LEN);

                    if code == 200 {
                        return Outcome::new(tpn)
                            .answered(status, raw, code, latency_ms)
                            .with_attempts(attempt + 1);
                    }

                    // An answered-but-unexpected response is terminal: a
                    // server that gave an answer is not hammered again for
                    // giving one we disliked. A non-200 body with no
                    // recognizable status text is a real error.
                    let status = if status == TerminalStatus::Unknown {
                        TerminalStatus::Error
                    } else {
                        status
                    };
                    return Outcome::new(tpn)
                        .answered(status, raw, code, latency_ms)
                        .with_error(format!("HTTP {code}"))
                        .with_attempts(attempt + 1);
                }
                AttemptOutcome::Transport { error } => {
                    debug!(tpn, attempt, %error, "transport failure");
                    last_error = Some(error);
                    if attempt + 1 < self.config.max_retries {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        Outcome::new(tpn)
            .failed(last_error.unwrap_or_else(|| "Unknown error".to_string()), latency_ms)
            .with_attempts(self.config.max_retries)
    }
}
