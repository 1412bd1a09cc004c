//! Clock synchronization rounds.
//!
//! A round is fetch-reference → poll-all → compute → dispatch-all:
//!
//! 1. One reference timestamp. If it cannot be fetched the round fails with
//!    [`SyncError::ReferenceUnavailable`] before any instance is contacted.
//! 2. Every registered instance is polled concurrently. Failures are recorded
//!    and the instance is left out of the rest of the round.
//! 3. Offsets are averaged over the instances that answered. Nobody answered
//!    means [`SyncError::NoReachableInstances`].
//! 4. Each polled instance gets `average - offset`. A failed dispatch is
//!    recorded and does not hold up the others.
//!
//! Only one round runs at a time; a second request while one is in flight
//! fails with [`SyncError::RoundInProgress`]. Every call is bounded by the
//! per-call timeout and by the round deadline, so round latency is bounded by
//! the deadline rather than by the sum of instance latencies.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use tempo_core::{EventLog, Instance, InstanceId, InstanceRegistry};

use crate::client::{InstanceClient, ReferenceClock};
use crate::error::{ClientError, SyncError};
use crate::offsets;
use crate::report::{FailureStage, InstanceSample, RoundFailure, RoundReport};

/// Tunables for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for any single poll or dispatch call.
    #[serde(with = "millis")]
    pub call_timeout: Duration,
    /// Upper bound for the whole round.
    #[serde(with = "millis")]
    pub round_deadline: Duration,
    /// Calls in flight at once.
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            round_deadline: Duration::from_secs(15),
            max_concurrency: 16,
        }
    }
}

pub struct SyncEngine {
    registry: InstanceRegistry,
    reference: Arc<dyn ReferenceClock>,
    client: Arc<dyn InstanceClient>,
    events: EventLog,
    config: EngineConfig,
    in_flight: Mutex<()>,
    rounds: AtomicU64,
}

impl SyncEngine {
    pub fn new(
        registry: InstanceRegistry,
        reference: Arc<dyn ReferenceClock>,
        client: Arc<dyn InstanceClient>,
        events: EventLog,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            reference,
            client,
            events,
            config,
            in_flight: Mutex::new(()),
            rounds: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reference(&self) -> &Arc<dyn ReferenceClock> {
        &self.reference
    }

    /// Rounds started so far (including failed ones).
    pub fn rounds_started(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Fetch the reference time with the per-call timeout.
    pub async fn reference_time(&self) -> Result<DateTime<Utc>, ClientError> {
        let deadline = Instant::now() + self.config.call_timeout;
        bounded(deadline, self.config.call_timeout, self.reference.now()).await
    }

    /// Run one synchronization round.
    pub async fn run_round(&self) -> Result<RoundReport, SyncError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| SyncError::RoundInProgress)?;

        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        let started_at = Utc::now();
        let deadline = started + self.config.round_deadline;
        self.events.record(format!("Sync round {round} started"));

        let reference_time = match bounded(
            deadline.min(started + self.config.call_timeout),
            self.config.call_timeout,
            self.reference.now(),
        )
        .await
        {
            Ok(time) => time,
            Err(err) => {
                self.events.record(format!(
                    "Sync round {round} aborted: reference time from {} unavailable: {err}",
                    self.reference.describe()
                ));
                return Err(SyncError::ReferenceUnavailable(err));
            }
        };

        let instances = self.registry.list();
        let mut failures = Vec::new();

        // Poll.
        let mut polls = {
            let client = Arc::clone(&self.client);
            keyed(
                self.fan_out(
                    instances.iter().cloned().map(|i| (i, ())).collect(),
                    deadline,
                    move |instance, (), budget| {
                        let client = Arc::clone(&client);
                        async move { client.get_time(&instance, budget).await }
                    },
                )
                .await,
            )
        };

        let mut polled: Vec<(Instance, DateTime<Utc>, f64)> = Vec::new();
        for instance in &instances {
            let id = instance.id();
            match take_result(&mut polls, &id) {
                Ok(observed) => {
                    let offset = offsets::offset_seconds(observed, reference_time);
                    self.events
                        .record(format!("Instance {id} time {observed} (offset {offset:+.3}s)"));
                    polled.push((instance.clone(), observed, offset));
                }
                Err(reason) => {
                    self.events
                        .record(format!("Error getting time from instance {id}: {reason}"));
                    failures.push(RoundFailure {
                        instance: id,
                        stage: FailureStage::Poll,
                        reason,
                    });
                }
            }
        }

        let observed_offsets: Vec<f64> = polled.iter().map(|(_, _, offset)| *offset).collect();
        let Some((average_offset, corrections)) = offsets::corrections(&observed_offsets) else {
            self.events.record(format!(
                "Sync round {round} aborted: no reachable instances ({} registered)",
                instances.len()
            ));
            return Err(SyncError::NoReachableInstances { failures });
        };

        // Dispatch.
        let jobs: Vec<(Instance, f64)> = polled
            .iter()
            .zip(&corrections)
            .map(|((instance, _, _), correction)| (instance.clone(), *correction))
            .collect();
        let mut dispatched = {
            let client = Arc::clone(&self.client);
            keyed(
                self.fan_out(jobs, deadline, move |instance, correction, budget| {
                    let client = Arc::clone(&client);
                    async move {
                        client
                            .apply_correction(&instance, correction, budget)
                            .await
                    }
                })
                .await,
            )
        };

        let mut samples = Vec::with_capacity(polled.len());
        for ((instance, observed_time, offset), correction) in polled.into_iter().zip(corrections) {
            let id = instance.id();
            let applied = match take_result(&mut dispatched, &id) {
                Ok(()) => {
                    self.events.record(format!(
                        "Synchronized instance {id} with correction {correction:+.3} seconds"
                    ));
                    true
                }
                Err(reason) => {
                    self.events
                        .record(format!("Error synchronizing instance {id}: {reason}"));
                    failures.push(RoundFailure {
                        instance: id.clone(),
                        stage: FailureStage::Dispatch,
                        reason,
                    });
                    false
                }
            };
            samples.push(InstanceSample {
                instance: id,
                observed_time,
                offset,
                correction,
                applied,
            });
        }

        let report = RoundReport {
            round,
            started_at,
            reference_time,
            average_offset,
            samples,
            failures,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.events.record(format!(
            "Sync round {round} completed: {} corrected, {} failed, average offset {:+.3}s",
            report.applied_count(),
            report.failures.len(),
            report.average_offset
        ));
        tracing::info!(
            round,
            applied = report.applied_count(),
            failed = report.failures.len(),
            average_offset = report.average_offset,
            duration_ms = report.duration_ms,
            "sync round completed",
        );
        Ok(report)
    }

    /// Run `call` for every job with bounded concurrency; results keyed by
    /// instance identity.
    ///
    /// `call` starts only once a permit is held and receives what is left of
    /// `min(call timeout, round deadline)`, so the client can stop its own
    /// I/O by then instead of running on after the round has moved on.
    async fn fan_out<A, T, F, Fut>(
        &self,
        jobs: Vec<(Instance, A)>,
        deadline: Instant,
        call: F,
    ) -> Vec<(InstanceId, Result<T, ClientError>)>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(Instance, A, Duration) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let call_timeout = self.config.call_timeout;
        let mut set = JoinSet::new();

        for (instance, arg) in jobs {
            let id = instance.id();
            let permits = Arc::clone(&permits);
            let call = call.clone();
            set.spawn(async move {
                let result = match tokio::time::timeout_at(deadline, permits.acquire_owned()).await
                {
                    Ok(Ok(_permit)) => {
                        let call_deadline = deadline.min(Instant::now() + call_timeout);
                        let budget = call_deadline.saturating_duration_since(Instant::now());
                        if budget.is_zero() {
                            Err(timed_out(call_timeout))
                        } else {
                            bounded(call_deadline, call_timeout, call(instance, arg, budget)).await
                        }
                    }
                    Ok(Err(_)) => Err(ClientError::transport("fan-out semaphore closed")),
                    Err(_) => Err(timed_out(call_timeout)),
                };
                (id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(err) => tracing::warn!(error = %err, "sync call task failed"),
            }
        }
        results
    }
}

fn keyed<T>(
    results: Vec<(InstanceId, Result<T, ClientError>)>,
) -> HashMap<InstanceId, Result<T, ClientError>> {
    results.into_iter().collect()
}

/// A missing entry means the task died before reporting.
fn take_result<T>(
    results: &mut HashMap<InstanceId, Result<T, ClientError>>,
    id: &InstanceId,
) -> Result<T, ClientError> {
    results
        .remove(id)
        .unwrap_or_else(|| Err(ClientError::transport("call task did not complete")))
}

async fn bounded<T, Fut>(deadline: Instant, call_timeout: Duration, fut: Fut) -> Result<T, ClientError>
where
    Fut: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(timed_out(call_timeout)),
    }
}

fn timed_out(call_timeout: Duration) -> ClientError {
    ClientError::Timeout {
        after_ms: call_timeout.as_millis() as u64,
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
