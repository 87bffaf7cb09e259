//! Observable recovery events
//!
//! Every log line the coordinator emits names one of these events.

use std::fmt;

/// Events emitted while coordinating a recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    // Configuration
    /// Configuration loaded and validated
    ConfigLoaded,

    // Setup
    /// Crashed server's tablets split into partitions
    PartitionsCreated,

    // Backups
    /// Segment inventories requested from every backup
    BackupsQueried,
    /// A backup could not be reached; it contributes nothing
    BackupUnreachable,
    /// A stale replica record was dropped from a backup's inventory
    ReplicaDropped,
    /// A stale or undecodable log digest was dropped
    DigestDropped,
    /// No backup returned a usable log digest
    NoLogDigest,
    /// The head segment of the log was chosen
    HeadOfLogSelected,
    /// A digest member segment is absent from every backup
    SegmentMissing,
    /// The log is not fully available among reachable backups
    LogIncomplete,
    /// A replica inconsistent with the head segment was left out of the map
    ReplicaIgnored,
    /// Replica map assembled
    ReplicaMapBuilt,

    // Recovery masters
    /// Assignments are about to be dispatched
    RecoveryStarted,
    /// Fewer idle masters than partitions
    InsufficientMasters,
    /// A partition was handed to a recovery master
    MasterAssigned,
    /// A recovery master could not be given its partition
    MasterAssignmentFailed,
    /// A recovery master reported its outcome
    MasterFinished,
    /// A second report from the same master was ignored
    DuplicateMasterReport,
    /// A report arrived while the attempt was not waiting for one
    UnexpectedMasterReport,
    /// A report was held until the attempt's current step returns
    MasterReportHeld,

    // Completion
    /// Every partition was recovered
    RecoveryComplete,
    /// Some partition was not recovered; backups keep their replicas
    RecoveryIncomplete,
    /// A backup was told the recovery finished
    BroadcastSent,
    /// A completion notice could not be delivered
    BroadcastFailed,
    /// The attempt ended before assigning masters
    AttemptAborted,

    // Owner
    /// A new attempt was queued
    AttemptScheduled,
    /// A follow-up attempt was postponed to the next command cycle
    AttemptDeferred,
    /// A finished attempt was discarded
    AttemptRetired,
    /// A server was reported crashed
    ServerCrashed,
}

impl RecoveryEvent {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryEvent::ConfigLoaded => "CONFIG_LOADED",

            RecoveryEvent::PartitionsCreated => "PARTITIONS_CREATED",

            RecoveryEvent::BackupsQueried => "BACKUPS_QUERIED",
            RecoveryEvent::BackupUnreachable => "BACKUP_UNREACHABLE",
            RecoveryEvent::ReplicaDropped => "REPLICA_DROPPED",
            RecoveryEvent::DigestDropped => "DIGEST_DROPPED",
            RecoveryEvent::NoLogDigest => "NO_LOG_DIGEST",
            RecoveryEvent::HeadOfLogSelected => "HEAD_OF_LOG_SELECTED",
            RecoveryEvent::SegmentMissing => "SEGMENT_MISSING",
            RecoveryEvent::LogIncomplete => "LOG_INCOMPLETE",
            RecoveryEvent::ReplicaIgnored => "REPLICA_IGNORED",
            RecoveryEvent::ReplicaMapBuilt => "REPLICA_MAP_BUILT",

            RecoveryEvent::RecoveryStarted => "RECOVERY_STARTED",
            RecoveryEvent::InsufficientMasters => "INSUFFICIENT_MASTERS",
            RecoveryEvent::MasterAssigned => "MASTER_ASSIGNED",
            RecoveryEvent::MasterAssignmentFailed => "MASTER_ASSIGNMENT_FAILED",
            RecoveryEvent::MasterFinished => "MASTER_FINISHED",
            RecoveryEvent::DuplicateMasterReport => "DUPLICATE_MASTER_REPORT",
            RecoveryEvent::MasterReportHeld => "MASTER_REPORT_HELD",
            RecoveryEvent::UnexpectedMasterReport => "UNEXPECTED_MASTER_REPORT",

            RecoveryEvent::RecoveryComplete => "RECOVERY_COMPLETE",
            RecoveryEvent::RecoveryIncomplete => "RECOVERY_INCOMPLETE",
            RecoveryEvent::BroadcastSent => "BROADCAST_SENT",
            RecoveryEvent::BroadcastFailed => "BROADCAST_FAILED",
            RecoveryEvent::AttemptAborted => "ATTEMPT_ABORTED",

            RecoveryEvent::AttemptScheduled => "ATTEMPT_SCHEDULED",
            RecoveryEvent::AttemptDeferred => "ATTEMPT_DEFERRED",
            RecoveryEvent::AttemptRetired => "ATTEMPT_RETIRED",
            RecoveryEvent::ServerCrashed => "SERVER_CRASHED",
        }
    }

    /// Returns true if this event ends an attempt without recovering anything
    pub fn is_attempt_failure(&self) -> bool {
        matches!(
            self,
            RecoveryEvent::NoLogDigest | RecoveryEvent::LogIncomplete | RecoveryEvent::AttemptAborted
        )
    }
}

impl fmt::Display for RecoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
