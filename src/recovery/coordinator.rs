//! Recovery attempt state machine
//!
//! One `Recovery` per attempt to rebuild a crashed server's tablets.
//!
//! ```text
//! SETUP -> START_BACKUPS -> START_RECOVERY_MASTERS -> WAIT_FOR_RECOVERY_MASTERS
//!       -> [BROADCAST_RECOVERY_COMPLETE ->] DONE
//! ```
//!
//! Invariants:
//! - Only the driver's turn mutates an attempt; methods take `&mut self`
//! - Each assigned master is counted once, success or failure
//! - Busy markers are released when every partition is accounted for
//! - Backups are told about completion only if every partition succeeded
//! - The owner hears `recovery_finished` then `destroy_and_free_recovery`,
//!   exactly once, when the attempt reaches DONE

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::runtime::Handle;
use uuid::Uuid;

use super::backup_query::{BackupQueryResult, BackupQueryTask};
use super::broadcast::CompletionBroadcastTask;
use super::config::RecoveryConfig;
use super::errors::{RecoveryError, RecoveryResult};
use super::log_digest::{find_log_digest, verify_log_complete};
use super::master_assignment::MasterAssignmentTask;
use super::partition::{Partition, TabletPartitioner};
use super::replica_map::build_replica_map;
use super::task_queue::{Task, TaskFuture};
use crate::cluster::{ClusterView, RecoveryId, ServerId, Service, Tablet, TabletMap};
use crate::observability::{Logger, RecoveryEvent, RecoveryMetrics};
use crate::rpc::{
    BackupClient, MasterClient, RecoverRequest, RecoveryCompleteRequest, ReplicaMapEntry,
    StartReadingDataRequest,
};

/// Where an attempt is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    Setup,
    StartBackups,
    StartRecoveryMasters,
    WaitForRecoveryMasters,
    BroadcastRecoveryComplete,
    Done,
}

impl RecoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStatus::Setup => "SETUP",
            RecoveryStatus::StartBackups => "START_BACKUPS",
            RecoveryStatus::StartRecoveryMasters => "START_RECOVERY_MASTERS",
            RecoveryStatus::WaitForRecoveryMasters => "WAIT_FOR_RECOVERY_MASTERS",
            RecoveryStatus::BroadcastRecoveryComplete => "BROADCAST_RECOVERY_COMPLETE",
            RecoveryStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Told when an attempt finishes
pub trait RecoveryOwner: Send + Sync {
    /// The attempt reached DONE; inspect its outcome.
    fn recovery_finished(&self, recovery: &Recovery);

    /// The attempt may now be discarded.
    fn destroy_and_free_recovery(&self, recovery: &Recovery);
}

/// Collaborators shared by every attempt
#[derive(Clone)]
pub struct RecoveryContext {
    pub config: RecoveryConfig,
    pub cluster: Arc<ClusterView>,
    pub tablets: Arc<TabletMap>,
    pub backups: Arc<dyn BackupClient>,
    pub masters: Arc<dyn MasterClient>,
    pub metrics: Arc<RecoveryMetrics>,
}

impl RecoveryContext {
    /// Context with a fresh metrics registry.
    pub fn new(
        config: RecoveryConfig,
        cluster: Arc<ClusterView>,
        tablets: Arc<TabletMap>,
        backups: Arc<dyn BackupClient>,
        masters: Arc<dyn MasterClient>,
    ) -> Self {
        Self {
            config,
            cluster,
            tablets,
            backups,
            masters,
            metrics: Arc::new(RecoveryMetrics::new()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MasterSlot {
    partition_id: u32,
    outcome: Option<bool>,
}

/// One attempt to recover a crashed server
pub struct Recovery {
    ctx: RecoveryContext,
    owner: Option<Arc<dyn RecoveryOwner>>,
    recovery_id: RecoveryId,
    crashed_server_id: ServerId,
    attempt_token: Uuid,
    status: RecoveryStatus,
    scheduled: bool,
    partitions: Option<Vec<Partition>>,
    replica_map: Vec<ReplicaMapEntry>,
    masters: BTreeMap<ServerId, MasterSlot>,
    successful_recovery_masters: u32,
    unsuccessful_recovery_masters: u32,
    failure: Option<RecoveryError>,
    rng: StdRng,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Recovery {
    /// Create an attempt in SETUP. It does nothing until scheduled.
    pub fn new(
        ctx: RecoveryContext,
        recovery_id: RecoveryId,
        crashed_server_id: ServerId,
        owner: Option<Arc<dyn RecoveryOwner>>,
    ) -> Self {
        let rng = match ctx.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            ctx,
            owner,
            recovery_id,
            crashed_server_id,
            attempt_token: Uuid::new_v4(),
            status: RecoveryStatus::Setup,
            scheduled: false,
            partitions: None,
            replica_map: Vec::new(),
            masters: BTreeMap::new(),
            successful_recovery_masters: 0,
            unsuccessful_recovery_masters: 0,
            failure: None,
            rng,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn recovery_id(&self) -> RecoveryId {
        self.recovery_id
    }

    pub fn crashed_server_id(&self) -> ServerId {
        self.crashed_server_id
    }

    /// Token sent with every backup query of this attempt.
    pub fn attempt_token(&self) -> Uuid {
        self.attempt_token
    }

    pub fn status(&self) -> RecoveryStatus {
        self.status
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Ask the driver to advance this attempt on its next turn.
    pub fn schedule(&mut self) {
        self.scheduled = true;
    }

    pub fn num_partitions(&self) -> u32 {
        self.partitions.as_ref().map_or(0, |p| p.len() as u32)
    }

    pub fn partitions(&self) -> &[Partition] {
        self.partitions.as_deref().unwrap_or(&[])
    }

    pub fn replica_map(&self) -> &[ReplicaMapEntry] {
        &self.replica_map
    }

    pub fn successful_recovery_masters(&self) -> u32 {
        self.successful_recovery_masters
    }

    pub fn unsuccessful_recovery_masters(&self) -> u32 {
        self.unsuccessful_recovery_masters
    }

    /// Why the attempt ended before assigning masters, if it did.
    pub fn failure(&self) -> Option<&RecoveryError> {
        self.failure.as_ref()
    }

    /// Masters given a partition by this attempt, in id order.
    pub fn assigned_masters(&self) -> Vec<ServerId> {
        self.masters.keys().copied().collect()
    }

    pub fn partition_for_master(&self, master_id: ServerId) -> Option<&Partition> {
        let slot = self.masters.get(&master_id)?;
        self.partitions()
            .iter()
            .find(|partition| partition.id == slot.partition_id)
    }

    /// Partitions whose master reported success, with that master.
    pub fn recovered_partitions(&self) -> Vec<(ServerId, &Partition)> {
        self.masters
            .iter()
            .filter(|(_, slot)| slot.outcome == Some(true))
            .filter_map(|(&master_id, _)| {
                self.partition_for_master(master_id)
                    .map(|partition| (master_id, partition))
            })
            .collect()
    }

    /// True once DONE or broadcasting with every partition recovered.
    pub fn was_completely_successful(&self) -> bool {
        matches!(
            self.status,
            RecoveryStatus::BroadcastRecoveryComplete | RecoveryStatus::Done
        ) && self.failure.is_none()
            && self.unsuccessful_recovery_masters == 0
            && self.successful_recovery_masters == self.num_partitions()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Time from creation to DONE, or to now if still running.
    pub fn elapsed(&self) -> Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// The crashed server's tablets, tagged with their partitions.
    pub fn tablets_to_recover(&self) -> Vec<Tablet> {
        self.partitions()
            .iter()
            .flat_map(|partition| partition.tablets.iter().cloned())
            .collect()
    }

    fn log_fields(&self) -> [(&'static str, String); 2] {
        [
            ("recovery_id", self.recovery_id.to_string()),
            ("crashed_server", self.crashed_server_id.to_string()),
        ]
    }

    fn log(&self, severity: LogLevel, event: RecoveryEvent, extra: &[(&str, String)]) {
        let base = self.log_fields();
        let fields: Vec<(&str, &str)> = base
            .iter()
            .chain(extra.iter())
            .map(|(key, value)| (*key, value.as_str()))
            .collect();
        match severity {
            LogLevel::Trace => Logger::trace(event, &fields),
            LogLevel::Info => Logger::info(event, &fields),
            LogLevel::Warn => Logger::warn(event, &fields),
        }
    }

    // =========================================================================
    // SETUP
    // =========================================================================

    /// Split the crashed server's tablets into partitions.
    ///
    /// Reads the tablet directory on the first call only; later calls return
    /// the same count.
    pub fn partition_tablets(&mut self) -> u32 {
        if let Some(partitions) = &self.partitions {
            return partitions.len() as u32;
        }

        let mut tablets = self.ctx.tablets.tablets_for_server(self.crashed_server_id);
        let partitions =
            TabletPartitioner::new(self.ctx.config.partitioning.clone()).partition(&mut tablets);
        for tablet in &tablets {
            self.ctx.tablets.set_partition(tablet);
        }
        let count = partitions.len() as u32;
        self.partitions = Some(partitions);

        self.log(
            LogLevel::Info,
            RecoveryEvent::PartitionsCreated,
            &[
                ("tablets", tablets.len().to_string()),
                ("partitions", count.to_string()),
            ],
        );
        count
    }

    // =========================================================================
    // BACKUPS
    // =========================================================================

    /// Query every backup, choose the log digest and build the replica map.
    ///
    /// Fails without a usable digest or when the digest names segments no
    /// reachable backup holds. Unreachable backups only shrink the inventory.
    pub async fn start_backups(&mut self) -> RecoveryResult<()> {
        self.partition_tablets();

        let backups = self.ctx.cluster.servers_with_service(Service::Backup);
        let min_open_segment_id = self.ctx.cluster.min_open_segment_id(self.crashed_server_id);
        self.log(
            LogLevel::Info,
            RecoveryEvent::BackupsQueried,
            &[
                ("backups", backups.len().to_string()),
                ("attempt_token", self.attempt_token.to_string()),
            ],
        );

        let request = StartReadingDataRequest {
            recovery_id: self.recovery_id,
            attempt_token: self.attempt_token,
            crashed_server_id: self.crashed_server_id,
            partitions: self.tablets_to_recover(),
        };
        let mut tasks: Vec<BackupQueryTask> = backups
            .iter()
            .map(|&backup_id| BackupQueryTask::new(backup_id, request.clone(), min_open_segment_id))
            .collect();

        let client = Arc::clone(&self.ctx.backups);
        let outcomes = join_all(tasks.iter_mut().map(|task| task.send(client.as_ref()))).await;
        for outcome in &outcomes {
            self.ctx.metrics.increment_backup_queries_sent();
            if outcome.is_err() {
                self.ctx.metrics.increment_backup_queries_failed();
            }
        }

        let mut results: Vec<BackupQueryResult> = tasks
            .into_iter()
            .map(|mut task| {
                task.filter_out_invalid_replicas();
                task.into_result()
            })
            .collect();

        let Some(selected) = find_log_digest(&results) else {
            self.log(
                LogLevel::Warn,
                RecoveryEvent::NoLogDigest,
                &[(
                    "message",
                    "No log digest among replicas on available backups. Will retry recovery later."
                        .to_string(),
                )],
            );
            return Err(RecoveryError::NoLogDigest);
        };

        self.log(
            LogLevel::Info,
            RecoveryEvent::HeadOfLogSelected,
            &[
                ("segment_id", selected.head_segment_id.to_string()),
                ("segment_length", selected.head_segment_length.to_string()),
                ("digest_segments", selected.digest.len().to_string()),
            ],
        );

        for result in &mut results {
            result.retain_consistent_with_head(
                selected.head_segment_id,
                selected.head_segment_length,
            );
        }
        verify_log_complete(&results, &selected.digest)?;

        self.replica_map = build_replica_map(
            &results,
            &self.ctx.cluster,
            selected.head_segment_id,
            selected.head_segment_length,
            &self.ctx.config.replica_map,
            &mut self.rng,
        );
        self.status = RecoveryStatus::StartRecoveryMasters;
        Ok(())
    }

    // =========================================================================
    // RECOVERY MASTERS
    // =========================================================================

    /// Hand each partition to an idle master.
    ///
    /// Partitions beyond the number of idle masters count as failed right
    /// away. If nothing is left outstanding afterwards the attempt finalizes
    /// without waiting.
    pub async fn start_recovery_masters(&mut self) {
        let num_partitions = self.partition_tablets();
        self.log(
            LogLevel::Info,
            RecoveryEvent::RecoveryStarted,
            &[
                (
                    "message",
                    format!(
                        "Starting recovery {} for crashed server {} with {} partitions",
                        self.recovery_id, self.crashed_server_id, num_partitions
                    ),
                ),
                ("partitions", num_partitions.to_string()),
            ],
        );

        let mut assignments = Vec::new();
        for partition in self.partitions.iter().flatten() {
            let Some(master_id) = self
                .ctx
                .cluster
                .claim_idle_master(self.recovery_id, &mut self.rng)
            else {
                break;
            };
            self.masters.insert(
                master_id,
                MasterSlot {
                    partition_id: partition.id,
                    outcome: None,
                },
            );
            assignments.push(MasterAssignmentTask::new(
                master_id,
                RecoverRequest {
                    recovery_id: self.recovery_id,
                    crashed_server_id: self.crashed_server_id,
                    partition_id: partition.id,
                    tablets: partition.tablets.clone(),
                    replica_map: self.replica_map.clone(),
                },
            ));
        }

        let unassigned = num_partitions - assignments.len() as u32;
        if unassigned > 0 {
            self.log(
                LogLevel::Warn,
                RecoveryEvent::InsufficientMasters,
                &[
                    (
                        "message",
                        format!(
                            "Couldn't find enough masters not already performing a recovery \
                             to recover all partitions: {} partitions will be recovered later",
                            unassigned
                        ),
                    ),
                    ("unassigned", unassigned.to_string()),
                ],
            );
            self.unsuccessful_recovery_masters += unassigned;
            self.ctx.metrics.add_partitions_failed(u64::from(unassigned));
        }
        self.status = RecoveryStatus::WaitForRecoveryMasters;

        let client = Arc::clone(&self.ctx.masters);
        let mut pending: FuturesUnordered<_> = assignments
            .iter()
            .map(|task| {
                let client = client.as_ref();
                async move { (task.master_id(), task.partition_id(), task.send(client).await) }
            })
            .collect();

        let mut refused = Vec::new();
        while let Some((master_id, partition_id, outcome)) = pending.next().await {
            self.ctx.metrics.increment_assignments_sent();
            match outcome {
                Ok(()) => self.log(
                    LogLevel::Trace,
                    RecoveryEvent::MasterAssigned,
                    &[
                        ("master", master_id.to_string()),
                        ("partition_id", partition_id.to_string()),
                    ],
                ),
                Err(err) => {
                    self.ctx.metrics.increment_assignments_failed();
                    self.log(
                        LogLevel::Warn,
                        RecoveryEvent::MasterAssignmentFailed,
                        &[
                            ("master", master_id.to_string()),
                            ("partition_id", partition_id.to_string()),
                            ("reason", err.to_string()),
                        ],
                    );
                    refused.push(master_id);
                }
            }
        }
        drop(pending);

        for master_id in refused {
            self.record_master_outcome(master_id, false);
        }
        self.finalize_if_accounted();
    }

    /// Record a recovery master's outcome.
    ///
    /// Only the first report per master counts. Returns true if this report
    /// changed the counters.
    pub fn recovery_master_finished(&mut self, master_id: ServerId, success: bool) -> bool {
        if self.status != RecoveryStatus::WaitForRecoveryMasters {
            self.log(
                LogLevel::Warn,
                RecoveryEvent::UnexpectedMasterReport,
                &[
                    ("master", master_id.to_string()),
                    ("status", self.status.to_string()),
                ],
            );
            return false;
        }
        if !self.record_master_outcome(master_id, success) {
            return false;
        }
        self.finalize_if_accounted();
        true
    }

    fn record_master_outcome(&mut self, master_id: ServerId, success: bool) -> bool {
        let Some(slot) = self.masters.get_mut(&master_id) else {
            self.log(
                LogLevel::Warn,
                RecoveryEvent::UnexpectedMasterReport,
                &[("master", master_id.to_string())],
            );
            return false;
        };
        if slot.outcome.is_some() {
            self.log(
                LogLevel::Trace,
                RecoveryEvent::DuplicateMasterReport,
                &[("master", master_id.to_string())],
            );
            return false;
        }
        slot.outcome = Some(success);
        let partition_id = slot.partition_id;

        if success {
            self.successful_recovery_masters += 1;
            self.ctx.metrics.increment_partitions_recovered();
        } else {
            self.unsuccessful_recovery_masters += 1;
            self.ctx.metrics.add_partitions_failed(1);
        }
        self.log(
            LogLevel::Info,
            RecoveryEvent::MasterFinished,
            &[
                ("master", master_id.to_string()),
                ("partition_id", partition_id.to_string()),
                ("success", success.to_string()),
            ],
        );
        true
    }

    fn finalize_if_accounted(&mut self) {
        if self.status != RecoveryStatus::WaitForRecoveryMasters {
            return;
        }
        let accounted = self.successful_recovery_masters + self.unsuccessful_recovery_masters;
        if accounted < self.num_partitions() {
            return;
        }

        self.ctx.cluster.release_all(self.recovery_id);

        if self.unsuccessful_recovery_masters == 0 {
            self.status = RecoveryStatus::BroadcastRecoveryComplete;
            self.log(
                LogLevel::Info,
                RecoveryEvent::RecoveryComplete,
                &[
                    ("partitions", self.num_partitions().to_string()),
                    ("elapsed_ms", self.elapsed().num_milliseconds().to_string()),
                ],
            );
            self.schedule();
            return;
        }

        self.log(
            LogLevel::Warn,
            RecoveryEvent::RecoveryIncomplete,
            &[
                (
                    "message",
                    format!(
                        "Recovery wasn't completely successful; will not broadcast the end of \
                         recovery {} for server {} to backups",
                        self.recovery_id, self.crashed_server_id
                    ),
                ),
                ("successful", self.successful_recovery_masters.to_string()),
                ("unsuccessful", self.unsuccessful_recovery_masters.to_string()),
            ],
        );
        self.ctx.metrics.increment_recoveries_incomplete();
        self.finish();
    }

    // =========================================================================
    // COMPLETION
    // =========================================================================

    /// Tell every live backup that this recovery finished.
    ///
    /// Notices are spawned on the current tokio runtime and not awaited.
    /// Returns how many were dispatched.
    pub fn broadcast_recovery_complete(&self) -> usize {
        let request = RecoveryCompleteRequest {
            crashed_server_id: self.crashed_server_id,
            recovery_id: self.recovery_id,
        };
        let backups = self.ctx.cluster.servers_with_service(Service::Backup);

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    RecoveryEvent::BroadcastFailed,
                    &[
                        ("backups", backups.len().to_string()),
                        ("reason", err.to_string()),
                    ],
                );
                return 0;
            }
        };

        for backup_id in &backups {
            CompletionBroadcastTask::new(*backup_id, request)
                .spawn(Arc::clone(&self.ctx.backups), &runtime);
            self.ctx.metrics.increment_broadcasts_sent();
        }
        backups.len()
    }

    fn abort(&mut self, err: RecoveryError) {
        self.log(
            LogLevel::Warn,
            RecoveryEvent::AttemptAborted,
            &[
                ("reason", err.to_string()),
                ("elapsed_ms", self.elapsed().num_milliseconds().to_string()),
            ],
        );
        self.ctx.metrics.increment_recoveries_aborted();
        self.failure = Some(err);
        self.finish();
    }

    fn finish(&mut self) {
        self.status = RecoveryStatus::Done;
        self.scheduled = false;
        self.finished_at = Some(Utc::now());
        if let Some(owner) = self.owner.clone() {
            owner.recovery_finished(self);
            owner.destroy_and_free_recovery(self);
        }
    }

    async fn step(&mut self) {
        self.scheduled = false;
        match self.status {
            RecoveryStatus::Setup => {
                self.ctx.metrics.increment_recoveries_started();
                self.partition_tablets();
                self.status = RecoveryStatus::StartBackups;
                self.schedule();
            }
            RecoveryStatus::StartBackups => match self.start_backups().await {
                Ok(()) => self.schedule(),
                Err(err) => self.abort(err),
            },
            RecoveryStatus::StartRecoveryMasters => self.start_recovery_masters().await,
            RecoveryStatus::BroadcastRecoveryComplete => {
                self.broadcast_recovery_complete();
                self.ctx.metrics.increment_recoveries_completed();
                self.finish();
            }
            RecoveryStatus::WaitForRecoveryMasters | RecoveryStatus::Done => {}
        }
    }
}

impl Task for Recovery {
    fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    fn perform_task(&mut self) -> TaskFuture<'_> {
        Box::pin(self.step())
    }
}

impl Drop for Recovery {
    fn drop(&mut self) {
        self.ctx.cluster.release_all(self.recovery_id);
    }
}

#[derive(Clone, Copy)]
enum LogLevel {
    Trace,
    Info,
    Warn,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ServerChangeEvent, ServerDetails, ServiceMask, TabletStatus};
    use crate::rpc::{RpcFuture, StartReadingDataResponse};

    struct Silent;

    impl BackupClient for Silent {
        fn start_reading_data(
            &self,
            _backup_id: ServerId,
            _request: StartReadingDataRequest,
        ) -> RpcFuture<'_, StartReadingDataResponse> {
            Box::pin(async { Ok(StartReadingDataResponse::default()) })
        }

        fn recovery_complete(
            &self,
            _backup_id: ServerId,
            _request: RecoveryCompleteRequest,
        ) -> RpcFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    impl MasterClient for Silent {
        fn recover(&self, _master_id: ServerId, _request: RecoverRequest) -> RpcFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    fn context() -> RecoveryContext {
        RecoveryContext::new(
            RecoveryConfig {
                rng_seed: Some(1),
                ..RecoveryConfig::default()
            },
            Arc::new(ClusterView::new()),
            Arc::new(TabletMap::new()),
            Arc::new(Silent),
            Arc::new(Silent),
        )
    }

    fn crashed() -> ServerId {
        ServerId::new(99, 0)
    }

    #[test]
    fn test_new_recovery_is_idle_in_setup() {
        let recovery = Recovery::new(context(), RecoveryId::new(1), crashed(), None);
        assert_eq!(recovery.status(), RecoveryStatus::Setup);
        assert!(!recovery.is_scheduled());
        assert!(!recovery.was_completely_successful());
        assert!(recovery.finished_at().is_none());
    }

    #[test]
    fn test_partition_tablets_reads_directory_once() {
        let ctx = context();
        let tablets = Arc::clone(&ctx.tablets);
        tablets.add_tablet(Tablet::new(123, 0, 9, crashed(), TabletStatus::Recovering));
        tablets.add_tablet(Tablet::new(123, 20, 29, crashed(), TabletStatus::Recovering));
        tablets.add_tablet(Tablet::new(123, 0, 9, ServerId::new(5, 0), TabletStatus::Normal));

        let mut recovery = Recovery::new(ctx, RecoveryId::new(1), crashed(), None);
        assert_eq!(recovery.partition_tablets(), 2);

        tablets.add_tablet(Tablet::new(123, 10, 19, crashed(), TabletStatus::Recovering));
        assert_eq!(recovery.partition_tablets(), 2);
        assert_eq!(recovery.tablets_to_recover().len(), 2);
        assert!(recovery
            .tablets_to_recover()
            .iter()
            .all(|t| t.partition_id.is_some()));
    }

    #[test]
    fn test_report_outside_wait_is_ignored() {
        let mut recovery = Recovery::new(context(), RecoveryId::new(1), crashed(), None);
        assert!(!recovery.recovery_master_finished(ServerId::new(2, 0), true));
        assert_eq!(recovery.successful_recovery_masters(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_busy_markers() {
        let ctx = context();
        let cluster = Arc::clone(&ctx.cluster);
        let master = ServerId::new(1, 0);
        cluster.enqueue_change(
            ServerDetails::up(master, "mock:host=server1", ServiceMask::of(&[Service::Master]), 100),
            ServerChangeEvent::Added,
        );
        cluster.drain_changes();
        ctx.tablets
            .add_tablet(Tablet::new(123, 0, 9, crashed(), TabletStatus::Recovering));

        let mut recovery = Recovery::new(ctx, RecoveryId::new(3), crashed(), None);
        recovery.start_recovery_masters().await;
        assert_eq!(recovery.status(), RecoveryStatus::WaitForRecoveryMasters);
        assert_eq!(cluster.busy_servers(RecoveryId::new(3)), vec![master]);

        drop(recovery);
        assert!(cluster.assignment(master).is_idle());
    }

    #[tokio::test]
    async fn test_empty_recovery_broadcasts() {
        let mut recovery = Recovery::new(context(), RecoveryId::new(1), crashed(), None);
        recovery.start_recovery_masters().await;
        assert_eq!(recovery.num_partitions(), 0);
        assert_eq!(recovery.status(), RecoveryStatus::BroadcastRecoveryComplete);
        assert!(recovery.is_scheduled());

        recovery.perform_task().await;
        assert_eq!(recovery.status(), RecoveryStatus::Done);
        assert!(recovery.was_completely_successful());
        assert!(recovery.finished_at().is_some());
    }

    #[test]
    fn test_status_names() {
        assert_eq!(RecoveryStatus::WaitForRecoveryMasters.as_str(), "WAIT_FOR_RECOVERY_MASTERS");
        assert_eq!(RecoveryStatus::Done.to_string(), "DONE");
    }
}
