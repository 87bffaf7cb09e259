//! Replica map construction
//!
//! Merges every validated inventory into one ordered list of
//! `(backup, segment)` pairs for recovery masters to read.
//!
//! Ordering:
//! - Each replica gets an estimated load time: its position in the backup's
//!   read queue times the time that backup needs per segment
//! - Secondaries carry a fixed penalty so they follow every primary
//! - Estimates are scaled by a random factor, so faster backups tend to come
//!   first without every master converging on the same one
//! - Replicas of the head segment come after everything else
//!
//! Replicas beyond the head segment, or of the head segment with a different
//! length, are left out.

use std::collections::HashSet;

use rand::Rng;

use super::backup_query::BackupQueryResult;
use super::config::ReplicaMapConfig;
use crate::cluster::ClusterView;
use crate::observability::{Logger, RecoveryEvent};
use crate::rpc::ReplicaMapEntry;

struct Candidate {
    entry: ReplicaMapEntry,
    is_head: bool,
    load_ms: f64,
}

/// Build the replica map for one attempt.
pub fn build_replica_map<R: Rng + ?Sized>(
    results: &[BackupQueryResult],
    cluster: &ClusterView,
    head_segment_id: u64,
    head_segment_length: u32,
    config: &ReplicaMapConfig,
    rng: &mut R,
) -> Vec<ReplicaMapEntry> {
    let mut candidates = Vec::new();

    for result in results {
        let speed = cluster
            .expected_read_mbytes_per_sec(result.backup_id)
            .unwrap_or(0)
            .max(1);
        let per_segment_ms = (config.segment_size_mb * 1000) as f64 / f64::from(speed);
        let mut primaries = 0u32;
        let mut secondaries = 0u32;

        for replica in &result.replicas {
            if !replica.consistent_with_head(head_segment_id, head_segment_length) {
                Logger::trace(
                    RecoveryEvent::ReplicaIgnored,
                    &[
                        ("backup", &result.backup_id.to_string()),
                        ("segment_id", &replica.segment_id.to_string()),
                        ("length", &replica.length.to_string()),
                        ("head_segment_id", &head_segment_id.to_string()),
                        ("head_segment_length", &head_segment_length.to_string()),
                    ],
                );
                continue;
            }

            let base_ms = if replica.is_primary {
                primaries += 1;
                f64::from(primaries) * per_segment_ms
            } else {
                secondaries += 1;
                config.secondary_penalty_ms as f64 + f64::from(secondaries) * per_segment_ms
            };
            let jitter = if config.load_jitter > 0.0 {
                1.0 + rng.gen::<f64>() * config.load_jitter
            } else {
                1.0
            };

            candidates.push(Candidate {
                entry: ReplicaMapEntry::new(result.backup_id, replica.segment_id),
                is_head: replica.segment_id == head_segment_id,
                load_ms: base_ms * jitter,
            });
        }
    }

    // Stable, so equal estimates keep inventory order.
    candidates.sort_by(|a, b| {
        a.is_head
            .cmp(&b.is_head)
            .then_with(|| a.load_ms.total_cmp(&b.load_ms))
    });

    let mut seen = HashSet::new();
    let replica_map: Vec<ReplicaMapEntry> = candidates
        .into_iter()
        .map(|candidate| candidate.entry)
        .filter(|entry| seen.insert(*entry))
        .collect();

    Logger::info(
        RecoveryEvent::ReplicaMapBuilt,
        &[
            ("entries", &replica_map.len().to_string()),
            ("head_segment_id", &head_segment_id.to_string()),
        ],
    );
    replica_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ServerChangeEvent, ServerDetails, ServerId, Service, ServiceMask};
    use crate::recovery::backup_query::SegmentReplica;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cluster_with_backups(count: u32) -> ClusterView {
        let view = ClusterView::new();
        for i in 1..=count {
            view.enqueue_change(
                ServerDetails::up(
                    ServerId::new(i, 0),
                    format!("mock:host=server{}", i),
                    ServiceMask::of(&[Service::Backup]),
                    100,
                ),
                ServerChangeEvent::Added,
            );
        }
        view.drain_changes();
        view
    }

    fn inventory(backup: u32, segments: &[(u64, u32)], primaries: usize) -> BackupQueryResult {
        let backup_id = ServerId::new(backup, 0);
        BackupQueryResult {
            backup_id,
            replicas: segments
                .iter()
                .enumerate()
                .map(|(slot, &(id, len))| SegmentReplica::new(backup_id, id, len, slot < primaries))
                .collect(),
            log_digest: None,
        }
    }

    fn strict() -> ReplicaMapConfig {
        ReplicaMapConfig {
            load_jitter: 0.0,
            ..ReplicaMapConfig::default()
        }
    }

    fn entries(pairs: &[(u32, u64)]) -> Vec<ReplicaMapEntry> {
        pairs
            .iter()
            .map(|&(backup, segment)| ReplicaMapEntry::new(ServerId::new(backup, 0), segment))
            .collect()
    }

    #[test]
    fn test_build_replica_map_orders_by_load() {
        let results = vec![
            inventory(2, &[(88, 100), (89, 100), (90, 100)], 3),
            inventory(3, &[(88, 100), (91, 100)], 1),
        ];
        let view = cluster_with_backups(3);
        let mut rng = StdRng::seed_from_u64(1);

        let map = build_replica_map(&results, &view, 91, 100, &strict(), &mut rng);
        assert_eq!(map, entries(&[(2, 88), (3, 88), (2, 89), (2, 90), (3, 91)]));

        view.set_expected_read_mbytes_per_sec(ServerId::new(3, 0), 101);
        let map = build_replica_map(&results, &view, 91, 100, &strict(), &mut rng);
        assert_eq!(map, entries(&[(3, 88), (2, 88), (2, 89), (2, 90), (3, 91)]));
    }

    #[test]
    fn test_build_replica_map_bad_replicas() {
        let results = vec![inventory(2, &[(92, 100), (91, 99), (91, 101)], 3)];
        let view = cluster_with_backups(2);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(build_replica_map(&results, &view, 91, 100, &strict(), &mut rng).is_empty());
    }

    #[test]
    fn test_head_segment_goes_last() {
        // The head's primary would otherwise sort ahead of the later segments.
        let results = vec![
            inventory(2, &[(91, 100)], 1),
            inventory(3, &[(88, 100), (89, 100), (90, 100)], 3),
        ];
        let view = cluster_with_backups(3);
        let mut rng = StdRng::seed_from_u64(1);

        let map = build_replica_map(&results, &view, 91, 100, &strict(), &mut rng);
        assert_eq!(map.len(), 4);
        assert_eq!(map[3], ReplicaMapEntry::new(ServerId::new(2, 0), 91));
    }

    #[test]
    fn test_unknown_backup_speed_does_not_divide_by_zero() {
        let results = vec![inventory(7, &[(1, 100)], 1)];
        let view = ClusterView::new();
        let mut rng = StdRng::seed_from_u64(1);
        let map = build_replica_map(&results, &view, 1, 100, &strict(), &mut rng);
        assert_eq!(map, entries(&[(7, 1)]));
    }

    #[test]
    fn test_jitter_keeps_every_entry_and_head_last() {
        let results = vec![
            inventory(1, &[(10, 100), (11, 100), (12, 100), (13, 100)], 2),
            inventory(2, &[(10, 100), (11, 100), (13, 100)], 3),
            inventory(3, &[(12, 100), (13, 100), (14, 100)], 1),
        ];
        let view = cluster_with_backups(3);
        view.set_expected_read_mbytes_per_sec(ServerId::new(2, 0), 400);

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let map = build_replica_map(
                &results,
                &view,
                14,
                100,
                &ReplicaMapConfig::default(),
                &mut rng,
            );
            assert_eq!(map.len(), 10);
            assert_eq!(map[9].segment_id, 14);
            assert!(map.iter().all(|entry| entry.segment_id <= 14));
        }
    }
}
