//! In-memory instance registry.
//!
//! # Invariants
//!
//! - No two registered instances share the same `(host, port)`.
//! - Ports are unique across the registry: the used-port set has exactly one
//!   entry per registered instance.
//! - A port handed out by [`InstanceRegistry::allocate_port`] is neither used
//!   nor reserved at allocation time. It only joins the used-port set when the
//!   reservation is committed with [`InstanceRegistry::register_reserved`].
//!
//! All state lives behind a single lock, so concurrent launches are
//! serialized. The registry is volatile; nothing is persisted.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;

use crate::error::RegistryError;
use crate::types::{Instance, InstanceId, PortRange};

/// Random probes tried before falling back to a scan of the free ports.
pub const MAX_PORT_SAMPLES: usize = 32;

#[derive(Debug, Default)]
struct RegistryState {
    /// Kept sorted by `seq`.
    instances: Vec<Instance>,
    ids: HashSet<InstanceId>,
    used: BTreeMap<u16, InstanceId>,
    reserved: BTreeSet<u16>,
    next_seq: u64,
}

impl RegistryState {
    fn is_taken(&self, port: u16) -> bool {
        self.used.contains_key(&port) || self.reserved.contains(&port)
    }

    fn check_free(&self, id: &InstanceId) -> Result<(), RegistryError> {
        if self.ids.contains(id) {
            return Err(RegistryError::DuplicateInstance { id: id.clone() });
        }
        if let Some(holder) = self.used.get(&id.port) {
            return Err(RegistryError::PortInUse {
                port: id.port,
                holder: holder.clone(),
            });
        }
        Ok(())
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert(&mut self, id: InstanceId, seq: u64) -> Instance {
        let instance = Instance {
            host: id.host.clone(),
            port: id.port,
            seq,
            registered_at: Utc::now(),
        };
        let pos = self.instances.partition_point(|i| i.seq < seq);
        self.instances.insert(pos, instance.clone());
        self.used.insert(id.port, id.clone());
        self.ids.insert(id);
        instance
    }

    fn pick_free_port(&self, range: PortRange) -> Option<u16> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_PORT_SAMPLES {
            let port = rng.gen_range(range.min..=range.max);
            if !self.is_taken(port) {
                return Some(port);
            }
        }
        // Dense range: walk the complement from a random starting point.
        let start = rng.gen_range(range.min..=range.max);
        (start..=range.max)
            .chain(range.min..start)
            .find(|port| !self.is_taken(*port))
    }
}

/// Shared handle to the fleet registry. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance that was started outside the launch flow.
    pub fn register(&self, host: impl Into<String>, port: u16) -> Result<Instance, RegistryError> {
        let id = InstanceId::new(host, port);
        let mut state = self.state.lock();
        state.check_free(&id)?;
        if state.reserved.contains(&port) {
            return Err(RegistryError::PortReserved { port });
        }
        let seq = state.take_seq();
        let instance = state.insert(id, seq);
        tracing::info!(instance = %instance, seq, "instance registered");
        Ok(instance)
    }

    /// Reserve a free port in `range`.
    ///
    /// The port is held out of the pool until the reservation is committed
    /// or released; dropping it releases it. Worst case is one pass over the
    /// range, so the call always terminates.
    pub fn allocate_port(&self, range: PortRange) -> Result<PortReservation, RegistryError> {
        if range.is_empty() {
            return Err(RegistryError::InvalidPortRange { range });
        }
        let mut state = self.state.lock();
        let taken = state.used.range(range.min..=range.max).count()
            + state.reserved.range(range.min..=range.max).count();
        if taken >= range.len() {
            return Err(RegistryError::PortSpaceExhausted { range });
        }
        let port = state
            .pick_free_port(range)
            .ok_or(RegistryError::PortSpaceExhausted { range })?;
        state.reserved.insert(port);
        let seq = state.take_seq();
        tracing::debug!(port, seq, "port reserved");
        Ok(PortReservation {
            port,
            seq,
            state: Some(Arc::clone(&self.state)),
        })
    }

    /// Commit a reservation as a registered instance on `host`.
    ///
    /// The instance takes the reservation's sequence number, so `list()`
    /// reflects the order ports were allocated in, not the order launches
    /// completed.
    pub fn register_reserved(
        &self,
        host: impl Into<String>,
        mut reservation: PortReservation,
    ) -> Result<Instance, RegistryError> {
        let id = InstanceId::new(host, reservation.port);
        reservation.state = None;
        let mut state = self.state.lock();
        state.reserved.remove(&id.port);
        state.check_free(&id)?;
        let instance = state.insert(id, reservation.seq);
        tracing::info!(instance = %instance, seq = instance.seq, "instance registered");
        Ok(instance)
    }

    /// Registered instances in registration order.
    pub fn list(&self) -> Vec<Instance> {
        self.state.lock().instances.clone()
    }

    /// Ports held by registered instances. Reservations are not included.
    pub fn used_ports(&self) -> BTreeSet<u16> {
        self.state.lock().used.keys().copied().collect()
    }

    /// Ports held by in-flight launches.
    pub fn reserved_ports(&self) -> BTreeSet<u16> {
        self.state.lock().reserved.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A port held for an in-flight launch.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    seq: u64,
    /// `None` once committed or released.
    state: Option<Arc<Mutex<RegistryState>>>,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Return the port to the pool.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(state) = self.state.take() {
            state.lock().reserved.remove(&self.port);
            tracing::debug!(port = self.port, "port reservation released");
        }
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.release_inner();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
