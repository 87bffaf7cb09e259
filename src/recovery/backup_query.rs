//! Backup queries and replica validation
//!
//! One `BackupQueryTask` per backup offering storage. A task that fails
//! contributes an empty inventory; it is not retried within the attempt.
//!
//! Validation rules, applied to each inventory before digest selection:
//! - A closed replica whose segment id is below the crashed server's
//!   `min_open_segment_id` is stale and dropped
//! - Exact duplicate records collapse to the first one
//! - A digest found in a segment below the threshold is dropped
//!
//! The primary count is derived from the surviving records.
//!
//! Once the head segment is chosen, each inventory is narrowed again to the
//! replicas that can belong to a log ending at that head.

use std::collections::HashSet;

use crate::cluster::ServerId;
use crate::observability::{Logger, RecoveryEvent};
use crate::rpc::{
    BackupClient, LogDigestPayload, RpcResult, StartReadingDataRequest, StartReadingDataResponse,
    OPEN_SEGMENT_LENGTH,
};

/// One backup's copy of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentReplica {
    pub backup_id: ServerId,
    pub segment_id: u64,
    pub length: u32,
    pub is_primary: bool,
}

impl SegmentReplica {
    pub fn new(backup_id: ServerId, segment_id: u64, length: u32, is_primary: bool) -> Self {
        Self {
            backup_id,
            segment_id,
            length,
            is_primary,
        }
    }

    /// True if the segment was still open when the server crashed.
    pub fn is_open(&self) -> bool {
        self.length == OPEN_SEGMENT_LENGTH
    }

    /// True if this replica can be part of a log whose head is `head_segment_id`
    /// with `head_segment_length` bytes.
    pub fn consistent_with_head(&self, head_segment_id: u64, head_segment_length: u32) -> bool {
        self.segment_id < head_segment_id
            || (self.segment_id == head_segment_id && self.length == head_segment_length)
    }
}

/// A backup's inventory as seen by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupQueryResult {
    pub backup_id: ServerId,
    pub replicas: Vec<SegmentReplica>,
    pub log_digest: Option<LogDigestPayload>,
}

impl BackupQueryResult {
    /// Inventory of a backup that contributed nothing.
    pub fn empty(backup_id: ServerId) -> Self {
        Self {
            backup_id,
            replicas: Vec::new(),
            log_digest: None,
        }
    }

    pub fn from_response(backup_id: ServerId, response: StartReadingDataResponse) -> Self {
        let primaries = response.primary_segment_count as usize;
        let replicas = response
            .segment_id_and_length
            .into_iter()
            .enumerate()
            .map(|(slot, (segment_id, length))| {
                SegmentReplica::new(backup_id, segment_id, length, slot < primaries)
            })
            .collect();
        Self {
            backup_id,
            replicas,
            log_digest: response.log_digest,
        }
    }

    pub fn primary_replica_count(&self) -> usize {
        self.replicas.iter().filter(|r| r.is_primary).count()
    }

    pub fn segment_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.replicas.iter().map(|r| r.segment_id)
    }

    /// Drop replicas beyond the head segment, and replicas of the head
    /// segment with another length. Returns how many were dropped.
    pub fn retain_consistent_with_head(
        &mut self,
        head_segment_id: u64,
        head_segment_length: u32,
    ) -> usize {
        let backup = self.backup_id.to_string();
        let before = self.replicas.len();
        self.replicas.retain(|replica| {
            if replica.consistent_with_head(head_segment_id, head_segment_length) {
                return true;
            }
            Logger::trace(
                RecoveryEvent::ReplicaIgnored,
                &[
                    ("backup", &backup),
                    ("segment_id", &replica.segment_id.to_string()),
                    ("length", &replica.length.to_string()),
                    ("head_segment_id", &head_segment_id.to_string()),
                    ("head_segment_length", &head_segment_length.to_string()),
                ],
            );
            false
        });
        before - self.replicas.len()
    }
}

/// Drops stale and duplicate records from one inventory
#[derive(Debug, Clone, Copy)]
pub struct ReplicaValidator {
    min_open_segment_id: u64,
}

impl ReplicaValidator {
    /// A threshold of zero keeps every distinct record.
    pub fn new(min_open_segment_id: u64) -> Self {
        Self {
            min_open_segment_id,
        }
    }

    pub fn min_open_segment_id(&self) -> u64 {
        self.min_open_segment_id
    }

    /// Filter `result` in place; returns how many records were dropped.
    pub fn filter(&self, result: &mut BackupQueryResult) -> usize {
        let threshold = self.min_open_segment_id;
        let backup = result.backup_id.to_string();
        let before = result.replicas.len();
        let mut seen: HashSet<(u64, u32)> = HashSet::new();

        result.replicas.retain(|replica| {
            let reason = if !replica.is_open() && replica.segment_id < threshold {
                "closed replica below min open segment id"
            } else if !seen.insert((replica.segment_id, replica.length)) {
                "duplicate record"
            } else {
                return true;
            };
            Logger::trace(
                RecoveryEvent::ReplicaDropped,
                &[
                    ("backup", &backup),
                    ("segment_id", &replica.segment_id.to_string()),
                    ("length", &replica.length.to_string()),
                    ("reason", reason),
                ],
            );
            false
        });

        let stale_digest = result
            .log_digest
            .as_ref()
            .is_some_and(|digest| digest.segment_id < threshold);
        if stale_digest {
            if let Some(digest) = result.log_digest.take() {
                Logger::trace(
                    RecoveryEvent::DigestDropped,
                    &[
                        ("backup", &backup),
                        ("segment_id", &digest.segment_id.to_string()),
                        ("reason", "digest below min open segment id"),
                    ],
                );
            }
        }

        before - result.replicas.len()
    }
}

/// Requests one backup's inventory for a crashed server
#[derive(Debug)]
pub struct BackupQueryTask {
    backup_id: ServerId,
    request: StartReadingDataRequest,
    validator: ReplicaValidator,
    result: BackupQueryResult,
}

impl BackupQueryTask {
    pub fn new(
        backup_id: ServerId,
        request: StartReadingDataRequest,
        min_open_segment_id: u64,
    ) -> Self {
        Self {
            backup_id,
            request,
            validator: ReplicaValidator::new(min_open_segment_id),
            result: BackupQueryResult::empty(backup_id),
        }
    }

    pub fn backup_id(&self) -> ServerId {
        self.backup_id
    }

    pub fn result(&self) -> &BackupQueryResult {
        &self.result
    }

    pub fn into_result(self) -> BackupQueryResult {
        self.result
    }

    /// Send the query and store the reply.
    ///
    /// On failure the stored inventory is empty and the error is returned
    /// for accounting only.
    pub async fn send(&mut self, client: &dyn BackupClient) -> RpcResult<()> {
        match client
            .start_reading_data(self.backup_id, self.request.clone())
            .await
        {
            Ok(response) => {
                self.result = BackupQueryResult::from_response(self.backup_id, response);
                Ok(())
            }
            Err(err) => {
                Logger::warn(
                    RecoveryEvent::BackupUnreachable,
                    &[
                        ("backup", &self.backup_id.to_string()),
                        ("crashed_server", &self.request.crashed_server_id.to_string()),
                        ("reason", &err.to_string()),
                    ],
                );
                self.result = BackupQueryResult::empty(self.backup_id);
                Err(err)
            }
        }
    }

    pub fn filter_out_invalid_replicas(&mut self) -> usize {
        self.validator.filter(&mut self.result)
    }
}
