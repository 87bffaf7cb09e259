//! Recovery RPC messages
//!
//! Encoding and transport are the embedder's concern; these types only fix
//! the shape of each request and reply.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::{RecoveryId, ServerId, Tablet};

/// Segment id of the log's "no such segment"
pub const INVALID_SEGMENT_ID: u64 = u64::MAX;

/// Replica length reported for a segment that was still open at crash time
pub const OPEN_SEGMENT_LENGTH: u32 = u32::MAX;

/// Ask a backup for its replicas of a crashed server's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReadingDataRequest {
    pub recovery_id: RecoveryId,
    /// Fresh per attempt; lets a backup tell retries apart
    pub attempt_token: Uuid,
    pub crashed_server_id: ServerId,
    /// Tablets tagged with their partition, so the backup can bucket entries
    pub partitions: Vec<Tablet>,
}

/// Log digest found inside one of the backup's replicas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDigestPayload {
    /// Segment holding the digest
    pub segment_id: u64,
    /// Length of that segment's replica
    pub segment_length: u32,
    /// Encoded digest
    pub bytes: Vec<u8>,
}

/// A backup's inventory for one crashed server.
///
/// The first `primary_segment_count` entries of `segment_id_and_length` are
/// primaries; the rest are secondaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReadingDataResponse {
    pub segment_id_and_length: Vec<(u64, u32)>,
    pub primary_segment_count: u32,
    pub log_digest: Option<LogDigestPayload>,
}

/// One `(backup, segment)` pair a recovery master should read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaMapEntry {
    pub backup_id: ServerId,
    pub segment_id: u64,
}

impl ReplicaMapEntry {
    pub fn new(backup_id: ServerId, segment_id: u64) -> Self {
        Self {
            backup_id,
            segment_id,
        }
    }
}

/// Hand a partition to a recovery master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverRequest {
    pub recovery_id: RecoveryId,
    pub crashed_server_id: ServerId,
    pub partition_id: u32,
    pub tablets: Vec<Tablet>,
    pub replica_map: Vec<ReplicaMapEntry>,
}

/// Tell a backup a recovery finished so it may free the crashed server's replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryCompleteRequest {
    pub crashed_server_id: ServerId,
    pub recovery_id: RecoveryId,
}
