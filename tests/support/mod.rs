//! Shared fixtures for recovery integration tests
//!
//! Scripted peers stand in for backups and recovery masters; every call they
//! receive is recorded for assertions.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tablet_recovery::cluster::{
    ClusterView, RecoveryId, ServerAssignment, ServerChangeEvent, ServerDetails, ServerId,
    Service, ServiceMask, Tablet, TabletMap, TabletStatus,
};
use tablet_recovery::recovery::{
    LogDigest, Recovery, RecoveryConfig, RecoveryContext, RecoveryOwner,
};
use tablet_recovery::rpc::{
    BackupClient, LogDigestPayload, MasterClient, RecoverRequest, RecoveryCompleteRequest,
    RpcError, RpcFuture, StartReadingDataRequest, StartReadingDataResponse, OPEN_SEGMENT_LENGTH,
};

pub const OPEN: u32 = OPEN_SEGMENT_LENGTH;

pub const CRASHED: ServerId = ServerId::new(99, 0);

pub fn server(index: u32) -> ServerId {
    ServerId::new(index, 0)
}

// =============================================================================
// Scripted backups
// =============================================================================

/// Backups answering from a per-backup script
#[derive(Default)]
pub struct ScriptedBackups {
    responses: Mutex<BTreeMap<ServerId, StartReadingDataResponse>>,
    fallback: Mutex<Option<StartReadingDataResponse>>,
    failing: Mutex<BTreeSet<ServerId>>,
    hanging: Mutex<BTreeSet<ServerId>>,
    queries: Mutex<Vec<(ServerId, StartReadingDataRequest)>>,
    completions: Mutex<Vec<(ServerId, RecoveryCompleteRequest)>>,
}

impl ScriptedBackups {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, backup: u32, response: StartReadingDataResponse) {
        self.responses.lock().unwrap().insert(server(backup), response);
    }

    /// Reply used for every backup without a script of its own.
    pub fn respond_all(&self, response: StartReadingDataResponse) {
        *self.fallback.lock().unwrap() = Some(response);
    }

    pub fn fail(&self, backup: u32) {
        self.failing.lock().unwrap().insert(server(backup));
    }

    /// Never answer queries about `crashed_server_id`.
    pub fn hang_for(&self, crashed_server_id: ServerId) {
        self.hanging.lock().unwrap().insert(crashed_server_id);
    }

    pub fn queries(&self) -> Vec<(ServerId, StartReadingDataRequest)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<(ServerId, RecoveryCompleteRequest)> {
        self.completions.lock().unwrap().clone()
    }
}

impl BackupClient for ScriptedBackups {
    fn start_reading_data(
        &self,
        backup_id: ServerId,
        request: StartReadingDataRequest,
    ) -> RpcFuture<'_, StartReadingDataResponse> {
        let crashed_server_id = request.crashed_server_id;
        self.queries.lock().unwrap().push((backup_id, request));
        if self.hanging.lock().unwrap().contains(&crashed_server_id) {
            return Box::pin(std::future::pending());
        }
        let outcome = if self.failing.lock().unwrap().contains(&backup_id) {
            Err(RpcError::Unreachable {
                server: backup_id,
                reason: "connection refused".to_string(),
            })
        } else {
            let scripted = self.responses.lock().unwrap().get(&backup_id).cloned();
            let fallback = self.fallback.lock().unwrap().clone();
            Ok(scripted.or(fallback).unwrap_or_default())
        };
        Box::pin(async move {
            tokio::task::yield_now().await;
            outcome
        })
    }

    fn recovery_complete(
        &self,
        backup_id: ServerId,
        request: RecoveryCompleteRequest,
    ) -> RpcFuture<'_, ()> {
        self.completions.lock().unwrap().push((backup_id, request));
        Box::pin(async { Ok(()) })
    }
}

/// Give spawned tasks on the test runtime a chance to run.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Wait up to two seconds for `condition` to hold.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..2000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    condition()
}

// =============================================================================
// Recording masters
// =============================================================================

/// Masters that accept every partition unless told to refuse
#[derive(Default)]
pub struct RecordingMasters {
    requests: Mutex<Vec<(ServerId, RecoverRequest)>>,
    refusing: Mutex<BTreeSet<ServerId>>,
    refuse_all: Mutex<bool>,
}

impl RecordingMasters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, master: u32) {
        self.refusing.lock().unwrap().insert(server(master));
    }

    pub fn refuse_all(&self) {
        *self.refuse_all.lock().unwrap() = true;
    }

    pub fn requests(&self) -> Vec<(ServerId, RecoverRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

impl MasterClient for RecordingMasters {
    fn recover(&self, master_id: ServerId, request: RecoverRequest) -> RpcFuture<'_, ()> {
        self.requests.lock().unwrap().push((master_id, request));
        let refused = *self.refuse_all.lock().unwrap()
            || self.refusing.lock().unwrap().contains(&master_id);
        Box::pin(async move {
            tokio::task::yield_now().await;
            if refused {
                Err(RpcError::Unreachable {
                    server: master_id,
                    reason: "session closed".to_string(),
                })
            } else {
                Ok(())
            }
        })
    }
}

// =============================================================================
// Owner recorder
// =============================================================================

/// Records owner callbacks in the order they arrive
#[derive(Default)]
pub struct OwnerRecorder {
    calls: Mutex<Vec<(&'static str, RecoveryId)>>,
}

impl OwnerRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|(name, _)| *name).collect()
    }
}

impl RecoveryOwner for OwnerRecorder {
    fn recovery_finished(&self, recovery: &Recovery) {
        self.calls
            .lock()
            .unwrap()
            .push(("recovery_finished", recovery.recovery_id()));
    }

    fn destroy_and_free_recovery(&self, recovery: &Recovery) {
        self.calls
            .lock()
            .unwrap()
            .push(("destroy_and_free_recovery", recovery.recovery_id()));
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Inventory reply; the first `primaries` records are primaries.
pub fn inventory(segments: &[(u64, u32)], primaries: u32) -> StartReadingDataResponse {
    StartReadingDataResponse {
        segment_id_and_length: segments.to_vec(),
        primary_segment_count: primaries,
        log_digest: None,
    }
}

/// Attach a digest found in a 100-byte replica of `segment_id`.
pub fn with_digest(
    mut response: StartReadingDataResponse,
    segment_id: u64,
    segment_ids: &[u64],
) -> StartReadingDataResponse {
    response.log_digest = Some(LogDigestPayload {
        segment_id,
        segment_length: 100,
        bytes: LogDigest::new(segment_ids.to_vec()).to_bytes(),
    });
    response
}

/// Add servers `1..=count` offering `services`, each reading 100 MB/s.
pub fn add_servers(cluster: &ClusterView, count: u32, services: &[Service]) {
    for i in 1..=count {
        cluster.enqueue_change(
            ServerDetails::up(
                server(i),
                format!("mock:host=server{}", i),
                ServiceMask::of(services),
                100,
            ),
            ServerChangeEvent::Added,
        );
    }
    cluster.drain_changes();
}

/// Add one server with an explicit index.
pub fn add_server(cluster: &ClusterView, index: u32, services: &[Service]) {
    cluster.enqueue_change(
        ServerDetails::up(
            server(index),
            format!("mock:host=server{}", index),
            ServiceMask::of(services),
            100,
        ),
        ServerChangeEvent::Added,
    );
    cluster.drain_changes();
}

pub fn crash(cluster: &ClusterView, index: u32) {
    if let Some(details) = cluster.details(server(index)) {
        cluster.enqueue_change(details, ServerChangeEvent::Crashed);
    }
}

pub fn mark_busy(cluster: &ClusterView, index: u32, recovery_id: u64) {
    cluster.set_assignment(
        server(index),
        ServerAssignment::Busy(RecoveryId::new(recovery_id)),
    );
}

pub fn add_tablet(tablets: &TabletMap, start: u64, end: u64) {
    tablets.add_tablet(Tablet::new(123, start, end, CRASHED, TabletStatus::Recovering));
}

/// Seeded, with a strict load-time ordering of replicas.
pub fn strict_config() -> RecoveryConfig {
    RecoveryConfig {
        rng_seed: Some(1),
        ..RecoveryConfig::default()
    }
    .without_jitter()
}

/// Two tablets per partition, regardless of size.
pub fn two_per_partition() -> RecoveryConfig {
    let mut config = strict_config();
    config.partitioning.max_tablets_per_partition = 2;
    config.partitioning.default_tablet_bytes = 1;
    config
}

/// Everything a recovery needs, with handles kept for assertions
pub struct Harness {
    pub cluster: Arc<ClusterView>,
    pub tablets: Arc<TabletMap>,
    pub backups: Arc<ScriptedBackups>,
    pub masters: Arc<RecordingMasters>,
    pub ctx: RecoveryContext,
}

impl Harness {
    pub fn new(config: RecoveryConfig) -> Self {
        let cluster = Arc::new(ClusterView::new());
        let tablets = Arc::new(TabletMap::new());
        let backups = ScriptedBackups::new();
        let masters = RecordingMasters::new();
        let ctx = RecoveryContext::new(
            config,
            Arc::clone(&cluster),
            Arc::clone(&tablets),
            backups.clone(),
            masters.clone(),
        );
        Self {
            cluster,
            tablets,
            backups,
            masters,
            ctx,
        }
    }

    pub fn recovery(&self, recovery_id: u64) -> Recovery {
        Recovery::new(self.ctx.clone(), RecoveryId::new(recovery_id), CRASHED, None)
    }

    pub fn owned_recovery(&self, recovery_id: u64, owner: Arc<OwnerRecorder>) -> Recovery {
        Recovery::new(
            self.ctx.clone(),
            RecoveryId::new(recovery_id),
            CRASHED,
            Some(owner),
        )
    }
}
