//! Bounded, timestamped event log with live fan-out.
//!
//! Every notable event becomes one line `[<RFC3339>] <message>`. Lines are
//! kept in a ring buffer (oldest evicted first) and pushed to subscribers over
//! a broadcast channel. Delivery is best-effort: a slow subscriber loses the
//! lines it lagged behind on, and a dropped subscriber has no effect here.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Default number of lines retained.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Per-subscriber backlog before lines are dropped.
const BROADCAST_BACKLOG: usize = 256;

#[derive(Debug)]
struct Inner {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    tx: broadcast::Sender<String>,
}

/// Cloneable handle to a shared event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<Inner>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(BROADCAST_BACKLOG);
        Self {
            inner: Arc::new(Inner {
                lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity,
                tx,
            }),
        }
    }

    /// Timestamp `message`, retain it and push it to live subscribers.
    /// Returns the stored line.
    pub fn record(&self, message: impl AsRef<str>) -> String {
        let message = message.as_ref();
        tracing::info!(target: "tempo::events", "{message}");
        let mut lines = self.inner.lines.lock();
        // Stamped under the lock so timestamps never run backwards in the ring.
        let line = format!(
            "[{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message
        );
        if lines.len() == self.inner.capacity {
            lines.pop_front();
        }
        lines.push_back(line.clone());
        // Sent under the lock so subscribers see lines in ring order. No
        // receivers is fine.
        let _ = self.inner.tx.send(line.clone());
        drop(lines);
        line
    }

    /// All retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lines.lock().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inner.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
