//! Machine-readable outcome of one synchronization round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tempo_core::InstanceId;

use crate::error::ClientError;

/// Stage at which an instance dropped out of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Reading the instance's clock failed (`PollFailed`). The instance was
    /// excluded from the average and received no correction.
    #[serde(rename = "poll_failed")]
    Poll,
    /// Sending the correction failed (`SyncFailed`).
    #[serde(rename = "sync_failed")]
    Dispatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundFailure {
    pub instance: InstanceId,
    pub stage: FailureStage,
    pub reason: ClientError,
}

/// One successfully polled instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSample {
    pub instance: InstanceId,
    pub observed_time: DateTime<Utc>,
    /// `observed_time - reference_time`, seconds.
    pub offset: f64,
    /// `average_offset - offset`, seconds to add to the instance clock.
    pub correction: f64,
    /// Whether the instance acknowledged the correction.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u64,
    pub started_at: DateTime<Utc>,
    pub reference_time: DateTime<Utc>,
    pub average_offset: f64,
    /// Polled instances, registry order.
    pub samples: Vec<InstanceSample>,
    /// Poll failures then dispatch failures, each in registry order.
    pub failures: Vec<RoundFailure>,
    pub duration_ms: u64,
}

impl RoundReport {
    pub fn applied_count(&self) -> usize {
        self.samples.iter().filter(|s| s.applied).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn sample_for(&self, id: &InstanceId) -> Option<&InstanceSample> {
        self.samples.iter().find(|s| &s.instance == id)
    }

    pub fn failures_for<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> impl Iterator<Item = &'a RoundFailure> + 'a {
        self.failures.iter().filter(move |f| &f.instance == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_serializes_with_stage_and_reason() {
        let failure = RoundFailure {
            instance: InstanceId::new("10.0.0.2", 5002),
            stage: FailureStage::Poll,
            reason: ClientError::Timeout { after_ms: 5000 },
        };
        let value = serde_json::to_value(&failure).expect("serialize");
        assert_eq!(
            value,
            json!({
                "instance": {"host": "10.0.0.2", "port": 5002},
                "stage": "poll_failed",
                "reason": {"kind": "timeout", "after_ms": 5000},
            })
        );
    }

    #[test]
    fn dispatch_stage_name() {
        let value = serde_json::to_value(FailureStage::Dispatch).expect("serialize");
        assert_eq!(value, json!("sync_failed"));
    }
}
