//! Cluster View
//!
//! Live mapping from server id to status, services and read bandwidth,
//! plus the busy-marker side table used to keep a master out of two
//! recoveries at once.
//!
//! Membership changes arrive through a change queue. Draining the queue with
//! `get_change` is what applies a change to the working snapshot, so a reader
//! sees a change only after the coordinator has consumed it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ids::{RecoveryId, ServerId};

/// A capability a server can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    /// Holds tablets and can rebuild a partition
    Master,
    /// Stores segment replicas
    Backup,
    /// Accepts membership updates
    Membership,
}

impl Service {
    fn bit(self) -> u8 {
        match self {
            Service::Master => 0b001,
            Service::Backup => 0b010,
            Service::Membership => 0b100,
        }
    }
}

/// Set of services offered by one server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceMask {
    bits: u8,
}

impl ServiceMask {
    /// Mask containing exactly the given services.
    pub fn of(services: &[Service]) -> Self {
        Self {
            bits: services.iter().fold(0, |bits, s| bits | s.bit()),
        }
    }

    pub fn has(&self, service: Service) -> bool {
        self.bits & service.bit() != 0
    }
}

/// Liveness of a server as last reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Up,
    Crashed,
}

/// Change kinds carried by the membership queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerChangeEvent {
    Added,
    Crashed,
    Removed,
}

/// Everything the coordinator knows about one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDetails {
    pub server_id: ServerId,
    pub locator: String,
    pub services: ServiceMask,
    /// Benchmarked backup read throughput, used to spread replica reads
    pub expected_read_mbytes_per_sec: u32,
    pub status: ServerStatus,
    /// Closed replicas of this server's segments below this id are stale.
    /// Zero disables filtering.
    pub min_open_segment_id: u64,
}

impl ServerDetails {
    /// Details for a live server with no stale-replica threshold.
    pub fn up(
        server_id: ServerId,
        locator: impl Into<String>,
        services: ServiceMask,
        expected_read_mbytes_per_sec: u32,
    ) -> Self {
        Self {
            server_id,
            locator: locator.into(),
            services,
            expected_read_mbytes_per_sec,
            status: ServerStatus::Up,
            min_open_segment_id: 0,
        }
    }
}

/// Busy marker for a server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerAssignment {
    /// Free to take a partition
    #[default]
    Idle,
    /// Rebuilding a partition for the given attempt
    Busy(RecoveryId),
}

impl ServerAssignment {
    pub fn is_idle(&self) -> bool {
        matches!(self, ServerAssignment::Idle)
    }

    pub fn recovery_id(&self) -> Option<RecoveryId> {
        match self {
            ServerAssignment::Idle => None,
            ServerAssignment::Busy(id) => Some(*id),
        }
    }
}

#[derive(Debug)]
struct Entry {
    details: ServerDetails,
    assignment: ServerAssignment,
}

#[derive(Debug, Default)]
struct ViewState {
    servers: BTreeMap<ServerId, Entry>,
    pending: VecDeque<(ServerDetails, ServerChangeEvent)>,
}

/// Shared cluster membership snapshot
///
/// Mutated concurrently by membership activity; every method takes the lock
/// for the duration of one call only.
#[derive(Debug, Default)]
pub struct ClusterView {
    state: RwLock<ViewState>,
}

impl ClusterView {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ViewState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // CHANGE QUEUE
    // =========================================================================

    /// Queue a membership change. It takes effect when drained.
    pub fn enqueue_change(&self, details: ServerDetails, event: ServerChangeEvent) {
        self.write().pending.push_back((details, event));
    }

    /// Pop the oldest queued change and apply it to the snapshot.
    pub fn get_change(&self) -> Option<(ServerDetails, ServerChangeEvent)> {
        let mut state = self.write();
        let (details, event) = state.pending.pop_front()?;
        let id = details.server_id;
        match event {
            ServerChangeEvent::Added => {
                let assignment = state
                    .servers
                    .get(&id)
                    .map(|entry| entry.assignment)
                    .unwrap_or_default();
                state.servers.insert(
                    id,
                    Entry {
                        details: details.clone(),
                        assignment,
                    },
                );
            }
            ServerChangeEvent::Crashed => {
                // The entry stays so its busy marker can still be resolved.
                match state.servers.get_mut(&id) {
                    Some(entry) => entry.details.status = ServerStatus::Crashed,
                    None => {
                        let mut crashed = details.clone();
                        crashed.status = ServerStatus::Crashed;
                        state.servers.insert(
                            id,
                            Entry {
                                details: crashed,
                                assignment: ServerAssignment::Idle,
                            },
                        );
                    }
                }
            }
            ServerChangeEvent::Removed => {
                state.servers.remove(&id);
            }
        }
        Some((details, event))
    }

    /// Drain and apply every queued change, oldest first.
    pub fn drain_changes(&self) -> Vec<(ServerDetails, ServerChangeEvent)> {
        std::iter::from_fn(|| self.get_change()).collect()
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    pub fn details(&self, server_id: ServerId) -> Option<ServerDetails> {
        self.read()
            .servers
            .get(&server_id)
            .map(|entry| entry.details.clone())
    }

    /// Live servers offering `service`, in ascending id order.
    pub fn servers_with_service(&self, service: Service) -> Vec<ServerId> {
        self.read()
            .servers
            .values()
            .filter(|entry| {
                entry.details.status == ServerStatus::Up && entry.details.services.has(service)
            })
            .map(|entry| entry.details.server_id)
            .collect()
    }

    pub fn expected_read_mbytes_per_sec(&self, server_id: ServerId) -> Option<u32> {
        self.read()
            .servers
            .get(&server_id)
            .map(|entry| entry.details.expected_read_mbytes_per_sec)
    }

    /// Returns false if the server is unknown.
    pub fn set_expected_read_mbytes_per_sec(&self, server_id: ServerId, mbytes: u32) -> bool {
        match self.write().servers.get_mut(&server_id) {
            Some(entry) => {
                entry.details.expected_read_mbytes_per_sec = mbytes;
                true
            }
            None => false,
        }
    }

    /// Stale-replica threshold for a crashed server's segments (0 if unknown).
    pub fn min_open_segment_id(&self, server_id: ServerId) -> u64 {
        self.read()
            .servers
            .get(&server_id)
            .map(|entry| entry.details.min_open_segment_id)
            .unwrap_or(0)
    }

    /// Returns false if the server is unknown.
    pub fn set_min_open_segment_id(&self, server_id: ServerId, segment_id: u64) -> bool {
        match self.write().servers.get_mut(&server_id) {
            Some(entry) => {
                entry.details.min_open_segment_id = segment_id;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // BUSY MARKERS
    // =========================================================================

    /// Busy marker for a server; unknown servers read as idle.
    pub fn assignment(&self, server_id: ServerId) -> ServerAssignment {
        self.read()
            .servers
            .get(&server_id)
            .map(|entry| entry.assignment)
            .unwrap_or_default()
    }

    /// Overwrite a busy marker. Returns false if the server is unknown.
    pub fn set_assignment(&self, server_id: ServerId, assignment: ServerAssignment) -> bool {
        match self.write().servers.get_mut(&server_id) {
            Some(entry) => {
                entry.assignment = assignment;
                true
            }
            None => false,
        }
    }

    /// Pick a random live, idle master and mark it busy for `recovery_id`.
    ///
    /// Choosing and marking happen under one write lock, so two attempts can
    /// never claim the same master.
    pub fn claim_idle_master<R: Rng + ?Sized>(
        &self,
        recovery_id: RecoveryId,
        rng: &mut R,
    ) -> Option<ServerId> {
        let mut state = self.write();
        let idle: Vec<ServerId> = state
            .servers
            .values()
            .filter(|entry| {
                entry.details.status == ServerStatus::Up
                    && entry.details.services.has(Service::Master)
                    && entry.assignment.is_idle()
            })
            .map(|entry| entry.details.server_id)
            .collect();
        let chosen = *idle.choose(rng)?;
        if let Some(entry) = state.servers.get_mut(&chosen) {
            entry.assignment = ServerAssignment::Busy(recovery_id);
        }
        Some(chosen)
    }

    /// Clear a busy marker only if it still belongs to `recovery_id`.
    pub fn release_if_owned(&self, server_id: ServerId, recovery_id: RecoveryId) -> bool {
        match self.write().servers.get_mut(&server_id) {
            Some(entry) if entry.assignment == ServerAssignment::Busy(recovery_id) => {
                entry.assignment = ServerAssignment::Idle;
                true
            }
            _ => false,
        }
    }

    /// Clear every busy marker owned by `recovery_id`; returns the freed servers.
    pub fn release_all(&self, recovery_id: RecoveryId) -> Vec<ServerId> {
        let mut state = self.write();
        let mut released = Vec::new();
        for entry in state.servers.values_mut() {
            if entry.assignment == ServerAssignment::Busy(recovery_id) {
                entry.assignment = ServerAssignment::Idle;
                released.push(entry.details.server_id);
            }
        }
        released
    }

    /// Servers currently marked busy for `recovery_id`.
    pub fn busy_servers(&self, recovery_id: RecoveryId) -> Vec<ServerId> {
        self.read()
            .servers
            .values()
            .filter(|entry| entry.assignment == ServerAssignment::Busy(recovery_id))
            .map(|entry| entry.details.server_id)
            .collect()
    }
}
