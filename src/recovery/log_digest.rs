//! Log digest selection and log completeness
//!
//! A log digest lists every segment id that made up a master's log when the
//! digest was written. Each backup may return one digest found among its
//! replicas; exactly one is chosen as authoritative:
//! - Smallest reference segment id wins. A higher-numbered head can only come
//!   from writes after the smaller one, so the smaller is never stale.
//! - Ties go to the response seen first.
//!
//! Encoding: little-endian `u32` count followed by that many `u64` segment ids.

use std::collections::HashSet;

use super::backup_query::BackupQueryResult;
use super::errors::{RecoveryError, RecoveryResult};
use crate::observability::{Logger, RecoveryEvent};

const COUNT_BYTES: usize = 4;
const ID_BYTES: usize = 8;

/// Segment ids making up a log at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDigest {
    segment_ids: Vec<u64>,
}

impl LogDigest {
    pub fn new(segment_ids: Vec<u64>) -> Self {
        Self { segment_ids }
    }

    pub fn add_segment_id(&mut self, segment_id: u64) {
        self.segment_ids.push(segment_id);
    }

    pub fn segment_ids(&self) -> &[u64] {
        &self.segment_ids
    }

    pub fn len(&self) -> usize {
        self.segment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment_ids.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(COUNT_BYTES + ID_BYTES * self.segment_ids.len());
        bytes.extend_from_slice(&(self.segment_ids.len() as u32).to_le_bytes());
        for id in &self.segment_ids {
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        bytes
    }

    /// Decode a digest, rejecting truncated input and trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> RecoveryResult<Self> {
        let (count, body) = match bytes.split_first_chunk::<COUNT_BYTES>() {
            Some((count, body)) => (u32::from_le_bytes(*count) as usize, body),
            None => {
                return Err(RecoveryError::malformed_digest(format!(
                    "{} bytes is too short for a segment count",
                    bytes.len()
                )))
            }
        };

        let expected = count
            .checked_mul(ID_BYTES)
            .ok_or_else(|| RecoveryError::malformed_digest("segment count overflows"))?;
        if body.len() != expected {
            return Err(RecoveryError::malformed_digest(format!(
                "{} segment ids need {} bytes, found {}",
                count,
                expected,
                body.len()
            )));
        }

        let segment_ids = body
            .chunks_exact(ID_BYTES)
            .map(|chunk| {
                let mut id = [0u8; ID_BYTES];
                id.copy_from_slice(chunk);
                u64::from_le_bytes(id)
            })
            .collect();
        Ok(Self { segment_ids })
    }
}

/// The authoritative digest of an attempt and the head segment it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDigest {
    pub head_segment_id: u64,
    pub head_segment_length: u32,
    pub digest: LogDigest,
}

/// Choose the authoritative digest among validated backup responses.
///
/// Digests that fail to decode are skipped. Returns `None` if no response
/// carries a usable digest.
pub fn find_log_digest(results: &[BackupQueryResult]) -> Option<SelectedDigest> {
    let mut selected: Option<SelectedDigest> = None;

    for result in results {
        let Some(payload) = result.log_digest.as_ref() else {
            continue;
        };

        if let Some(current) = &selected {
            if payload.segment_id >= current.head_segment_id {
                continue;
            }
        }

        match LogDigest::from_bytes(&payload.bytes) {
            Ok(digest) => {
                selected = Some(SelectedDigest {
                    head_segment_id: payload.segment_id,
                    head_segment_length: payload.segment_length,
                    digest,
                });
            }
            Err(err) => {
                Logger::warn(
                    RecoveryEvent::DigestDropped,
                    &[
                        ("backup", &result.backup_id.to_string()),
                        ("segment_id", &payload.segment_id.to_string()),
                        ("reason", &err.to_string()),
                    ],
                );
            }
        }
    }

    selected
}

/// Check that every segment the digest names is on some reachable backup.
///
/// Each missing segment is logged; the error lists them all.
pub fn verify_log_complete(results: &[BackupQueryResult], digest: &LogDigest) -> RecoveryResult<()> {
    let available: HashSet<u64> = results
        .iter()
        .flat_map(|result| result.replicas.iter().map(|replica| replica.segment_id))
        .collect();

    let missing: Vec<u64> = digest
        .segment_ids()
        .iter()
        .copied()
        .filter(|id| !available.contains(id))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    for segment_id in &missing {
        Logger::warn(
            RecoveryEvent::SegmentMissing,
            &[("segment_id", &segment_id.to_string())],
        );
    }
    Logger::warn(
        RecoveryEvent::LogIncomplete,
        &[("missing", &missing.len().to_string())],
    );
    Err(RecoveryError::IncompleteLog { missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ServerId;
    use crate::observability::LogCapture;
    use crate::recovery::backup_query::SegmentReplica;
    use crate::rpc::LogDigestPayload;

    fn result_with_segments(backup: u32, segments: &[u64]) -> BackupQueryResult {
        let backup_id = ServerId::new(backup, 0);
        BackupQueryResult {
            backup_id,
            replicas: segments
                .iter()
                .map(|&segment_id| SegmentReplica::new(backup_id, segment_id, 0, true))
                .collect(),
            log_digest: None,
        }
    }

    fn with_digest(mut result: BackupQueryResult, segment_id: u64, ids: Vec<u64>) -> BackupQueryResult {
        result.log_digest = Some(LogDigestPayload {
            segment_id,
            segment_length: 1,
            bytes: LogDigest::new(ids).to_bytes(),
        });
        result
    }

    #[test]
    fn test_digest_encoding() {
        let digest = LogDigest::new(vec![10, 11, u64::MAX]);
        let bytes = digest.to_bytes();
        assert_eq!(bytes.len(), 4 + 3 * 8);
        assert_eq!(&bytes[..4], &3u32.to_le_bytes());
        assert_eq!(LogDigest::from_bytes(&bytes).unwrap(), digest);
    }

    #[test]
    fn test_digest_rejects_truncated_and_trailing_bytes() {
        let bytes = LogDigest::new(vec![1, 2]).to_bytes();
        assert!(LogDigest::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(LogDigest::from_bytes(&[1, 0]).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(matches!(
            LogDigest::from_bytes(&trailing),
            Err(RecoveryError::MalformedDigest { .. })
        ));

        assert!(LogDigest::from_bytes(&0u32.to_le_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_find_log_digest_none() {
        let results = vec![result_with_segments(2, &[]), result_with_segments(3, &[])];
        assert!(find_log_digest(&results).is_none());
    }

    #[test]
    fn test_find_log_digest_tie_keeps_first() {
        let results = vec![
            with_digest(result_with_segments(2, &[]), 10, vec![0]),
            with_digest(result_with_segments(3, &[]), 10, vec![1]),
        ];
        let selected = find_log_digest(&results).unwrap();
        assert_eq!(selected.head_segment_id, 10);
        assert_eq!(selected.head_segment_length, 1);
        assert_eq!(selected.digest.segment_ids()[0], 0);
    }

    #[test]
    fn test_find_log_digest_smaller_reference_wins() {
        let results = vec![
            with_digest(result_with_segments(2, &[]), 10, vec![0]),
            with_digest(result_with_segments(3, &[]), 9, vec![1]),
        ];
        let selected = find_log_digest(&results).unwrap();
        assert_eq!(selected.head_segment_id, 9);
        assert_eq!(selected.head_segment_length, 1);
        assert_eq!(selected.digest.segment_ids()[0], 1);
    }

    #[test]
    fn test_find_log_digest_skips_malformed() {
        let mut broken = result_with_segments(2, &[]);
        broken.log_digest = Some(LogDigestPayload {
            segment_id: 5,
            segment_length: 1,
            bytes: vec![0xff],
        });
        let results = vec![broken, with_digest(result_with_segments(3, &[]), 9, vec![9])];

        let capture = LogCapture::start();
        let selected = find_log_digest(&results).unwrap();
        assert_eq!(selected.head_segment_id, 9);
        assert_eq!(capture.events(), vec!["DIGEST_DROPPED".to_string()]);
    }

    #[test]
    fn test_verify_log_complete() {
        let digest = LogDigest::new(vec![10, 11, 12]);

        let capture = LogCapture::start();
        let results = vec![result_with_segments(2, &[10, 12])];
        match verify_log_complete(&results, &digest) {
            Err(RecoveryError::IncompleteLog { missing }) => assert_eq!(missing, vec![11]),
            other => panic!("expected IncompleteLog, got {:?}", other),
        }
        let records = capture.records();
        assert_eq!(records[0]["event"], "SEGMENT_MISSING");
        assert_eq!(records[0]["segment_id"], "11");
        assert_eq!(records[1]["event"], "LOG_INCOMPLETE");
        assert_eq!(records[1]["missing"], "1");

        let results = vec![result_with_segments(2, &[10, 11, 12])];
        assert!(verify_log_complete(&results, &digest).is_ok());
    }

    #[test]
    fn test_verify_log_complete_across_backups() {
        let digest = LogDigest::new(vec![10, 11, 12]);
        let results = vec![
            result_with_segments(2, &[10]),
            result_with_segments(3, &[11]),
            result_with_segments(4, &[12]),
        ];
        assert!(verify_log_complete(&results, &digest).is_ok());
    }
}
