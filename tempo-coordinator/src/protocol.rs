use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tempo_core::Instance;
use tempo_sync::RoundReport;

use crate::error::CoordinatorError;

/// JSON envelope returned by every coordinator endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Error envelope that still carries a payload (e.g. per-instance failures).
    pub fn error_with_data(code: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::error(code, message)
        }
    }

    pub fn into_data(self) -> Result<Value, CoordinatorError> {
        if self.ok {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        Err(match self.error {
            Some(ApiError { code, message }) => CoordinatorError::Api { code, message },
            None => CoordinatorError::Protocol("error response without details".to_string()),
        })
    }
}

/// Blocking client for the coordinator façade, used by the CLI.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base: String,
    agent: ureq::Agent,
}

impl CoordinatorClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            base,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Send one request and decode the envelope, whatever the HTTP status.
    pub fn send_request(&self, method: &str, path: &str) -> Result<ApiResponse, CoordinatorError> {
        let url = format!("{}{path}", self.base);
        let request = self.agent.request(method, &url);
        let result = if method == "POST" {
            request.send_json(json!({}))
        } else {
            request.call()
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(match transport.kind() {
                    ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns => {
                        CoordinatorError::CoordinatorNotRunning {
                            url: self.base.clone(),
                        }
                    }
                    _ => CoordinatorError::Protocol(format!("{method} {url}: {transport}")),
                })
            }
        };

        let status = response.status();
        response.into_json::<ApiResponse>().map_err(|err| {
            CoordinatorError::Protocol(format!(
                "{method} {url} returned {status} without a valid envelope: {err}"
            ))
        })
    }

    fn data<T: DeserializeOwned>(&self, method: &str, path: &str) -> Result<T, CoordinatorError> {
        let data = self.send_request(method, path)?.into_data()?;
        Ok(serde_json::from_value(data)?)
    }

    pub fn launch(&self) -> Result<Instance, CoordinatorError> {
        self.data("POST", "/launch")
    }

    pub fn instances(&self) -> Result<Vec<Instance>, CoordinatorError> {
        self.data("GET", "/instances")
    }

    pub fn sync_clocks(&self) -> Result<RoundReport, CoordinatorError> {
        self.data("POST", "/sync-clocks")
    }

    pub fn logs(&self) -> Result<Vec<String>, CoordinatorError> {
        let data: Value = self.data("GET", "/logs")?;
        Ok(serde_json::from_value(
            data.get("logs").cloned().unwrap_or(Value::Array(Vec::new())),
        )?)
    }

    pub fn world_time(&self) -> Result<DateTime<Utc>, CoordinatorError> {
        let data: Value = self.data("GET", "/worldtime")?;
        let raw = data
            .get("datetime")
            .and_then(Value::as_str)
            .ok_or_else(|| CoordinatorError::Protocol("worldtime without datetime".to_string()))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| CoordinatorError::Protocol(format!("bad datetime {raw:?}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_maps_to_api_error() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"ok":false,"error":{"code":"round_in_progress","message":"busy"}}"#,
        )
        .expect("parse");
        match response.into_data() {
            Err(CoordinatorError::Api { code, message }) => {
                assert_eq!(code, "round_in_progress");
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ok_envelope_omits_error() {
        let json = serde_json::to_value(ApiResponse::ok(json!([1, 2]))).expect("json");
        assert_eq!(json, json!({ "ok": true, "data": [1, 2] }));
    }

    #[test]
    fn unreachable_coordinator_is_reported_as_not_running() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = CoordinatorClient::new(format!("http://{addr}/"), Duration::from_secs(2));
        let err = client.instances().unwrap_err();
        assert!(
            matches!(err, CoordinatorError::CoordinatorNotRunning { .. }),
            "got: {err}"
        );
    }
}
