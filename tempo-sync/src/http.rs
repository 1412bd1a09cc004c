//! HTTP/JSON implementations of [`ReferenceClock`] and [`InstanceClient`].
//!
//! Calls are made with a blocking `ureq` agent on the tokio blocking pool.
//! Each request carries `min(agent timeout, caller budget)`, so the blocking
//! call has ended by the time the caller stops waiting for it.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use tempo_core::Instance;

use crate::client::{InstanceClient, ReferenceClock};
use crate::error::ClientError;

/// Default reference endpoint.
pub const TIMEAPI_URL: &str = "https://timeapi.io/api/time/current/zone?timeZone=UTC";

#[derive(Debug, Deserialize)]
struct TimeBody {
    time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeApiBody {
    date_time: String,
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Talks to instances over `GET /time` and `POST /sync`.
#[derive(Debug, Clone)]
pub struct HttpInstanceClient {
    agent: ureq::Agent,
    timeout: Duration,
}

impl HttpInstanceClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            timeout,
        }
    }
}

#[async_trait]
impl InstanceClient for HttpInstanceClient {
    async fn get_time(
        &self,
        instance: &Instance,
        budget: Duration,
    ) -> Result<DateTime<Utc>, ClientError> {
        let agent = self.agent.clone();
        let url = format!("{}/time", instance.base_url());
        let timeout = self.timeout.min(budget);
        blocking(move || {
            let response = agent
                .get(&url)
                .timeout(timeout)
                .call()
                .map_err(|e| map_ureq_error(e, timeout))?;
            let body: TimeBody = response
                .into_json()
                .map_err(|e| ClientError::malformed(e.to_string()))?;
            parse_timestamp(&body.time)
        })
        .await
    }

    async fn apply_correction(
        &self,
        instance: &Instance,
        seconds: f64,
        budget: Duration,
    ) -> Result<(), ClientError> {
        let agent = self.agent.clone();
        let url = format!("{}/sync", instance.base_url());
        let timeout = self.timeout.min(budget);
        blocking(move || {
            agent
                .post(&url)
                .timeout(timeout)
                .send_json(json!({ "offset": seconds }))
                .map(|_| ())
                .map_err(|e| map_ureq_error(e, timeout))
        })
        .await
    }
}

/// timeapi.io-compatible reference: `GET <url>` → `{"dateTime": "..."}`.
#[derive(Debug, Clone)]
pub struct TimeApiReference {
    agent: ureq::Agent,
    url: String,
    timeout: Duration,
}

impl TimeApiReference {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReferenceClock for TimeApiReference {
    async fn now(&self) -> Result<DateTime<Utc>, ClientError> {
        let agent = self.agent.clone();
        let url = self.url.clone();
        let timeout = self.timeout;
        blocking(move || {
            let response = agent.get(&url).call().map_err(|e| map_ureq_error(e, timeout))?;
            let body: TimeApiBody = response
                .into_json()
                .map_err(|e| ClientError::malformed(e.to_string()))?;
            parse_timestamp(&body.date_time)
        })
        .await
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// The coordinator's own wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemReference;

#[async_trait]
impl ReferenceClock for SystemReference {
    async fn now(&self) -> Result<DateTime<Utc>, ClientError> {
        Ok(Utc::now())
    }

    fn describe(&self) -> String {
        "system clock".to_string()
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ClientError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| ClientError::malformed(format!("bad timestamp '{raw}': {e}")))
}

async fn blocking<T, F>(call: F) -> Result<T, ClientError>
where
    F: FnOnce() -> Result<T, ClientError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|err| ClientError::transport(format!("http task join error: {err}")))?
}

fn map_ureq_error(err: ureq::Error, timeout: Duration) -> ClientError {
    match err {
        ureq::Error::Status(status, response) => ClientError::Rejected {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => {
            let timed_out = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<io::Error>())
                .map(|io| matches!(io.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
                .unwrap_or(false);
            if timed_out {
                ClientError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }
            } else {
                ClientError::transport(transport.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_timestamp("2024-05-01T12:00:00.500+02:00").expect("parse");
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T10:00:00.500+00:00");
    }

    #[test]
    fn parses_naive_timeapi_format() {
        let parsed = parse_timestamp("2024-05-01T12:34:56.1234567").expect("parse");
        assert_eq!(parsed.timestamp(), 1_714_566_896);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert!(matches!(err, ClientError::Malformed { .. }));
    }

    #[tokio::test]
    async fn system_reference_is_close_to_now() {
        let now = SystemReference.now().await.expect("now");
        assert!((Utc::now() - now).num_seconds().abs() < 5);
    }
}
