//! Network transport
//!
//! Broadcast and poll calls against a peer's knowledge-network API, plus a
//! bounded retry policy for the calls made during bootstrap.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{Error, Result};
use crate::protocol::{
    Event, EventsPayload, NodeRid, PollEvents, BROADCAST_EVENTS_PATH, POLL_EVENTS_PATH,
};

/// Outbound calls to a peer's knowledge-network API rooted at `url`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast_events(&self, url: &str, events: Vec<Event>) -> Result<()>;

    async fn poll_events(&self, url: &str, rid: &NodeRid) -> Result<Vec<Event>>;
}

// ─────────────────────────────────────────────────────────────────
// HTTP Transport
// ─────────────────────────────────────────────────────────────────

/// JSON-over-HTTP transport with a per-request timeout.
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(crate::version::build_info().user_agent())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    async fn post<B, R>(&self, base: &str, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", base.trim_end_matches('/'), path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ConnectionTimeout {
                        url: url.clone(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    Error::connection_failed(&url, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TransportRejected {
                url,
                status: status.as_u16(),
            });
        }

        response.json::<R>().await.map_err(|e| Error::ProtocolMalformed {
            message: format!("{}: {}", url, e),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn broadcast_events(&self, url: &str, events: Vec<Event>) -> Result<()> {
        let _: serde_json::Value = self
            .post(url, BROADCAST_EVENTS_PATH, &EventsPayload { events })
            .await?;
        Ok(())
    }

    async fn poll_events(&self, url: &str, rid: &NodeRid) -> Result<Vec<Event>> {
        let request = PollEvents {
            rid: rid.clone(),
            limit: None,
        };
        let payload: EventsPayload = self.post(url, POLL_EVENTS_PATH, &request).await?;
        Ok(payload.events)
    }
}

// ─────────────────────────────────────────────────────────────────
// Retry Policy
// ─────────────────────────────────────────────────────────────────

/// Bounded exponential retry for retryable transport errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_delay,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.max_delay);
                    warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transport error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
