//! Tablet partitioning
//!
//! Splits a crashed server's tablets into partitions, each one unit of rebuild
//! work for one recovery master. Tablets are taken in directory order and
//! accumulated into the current partition until the next one would exceed the
//! byte budget or the tablet cap.
//!
//! Invariants:
//! - Every tablet lands in exactly one partition
//! - Partition ids are dense, `0..num_partitions`
//! - Same tablets, same order, same config: same partitions

use serde::{Deserialize, Serialize};

use super::config::PartitionConfig;
use crate::cluster::Tablet;

/// A group of tablets rebuilt together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: u32,
    pub tablets: Vec<Tablet>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.tablets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tablets.is_empty()
    }
}

/// Assigns partition ids to tablets
#[derive(Debug, Clone)]
pub struct TabletPartitioner {
    config: PartitionConfig,
}

impl TabletPartitioner {
    pub fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    fn estimate(&self, tablet: &Tablet) -> u64 {
        tablet
            .estimated_bytes
            .unwrap_or(self.config.default_tablet_bytes)
    }

    /// Tag each tablet with its partition id and group them.
    ///
    /// A tablet larger than the byte budget gets a partition to itself.
    pub fn partition(&self, tablets: &mut [Tablet]) -> Vec<Partition> {
        let mut partitions: Vec<Partition> = Vec::new();
        let mut current_bytes: u64 = 0;

        for tablet in tablets.iter_mut() {
            let bytes = self.estimate(tablet);
            let start_new = match partitions.last() {
                None => true,
                Some(current) => {
                    current.len() >= self.config.max_tablets_per_partition
                        || current_bytes.saturating_add(bytes) > self.config.max_bytes_per_partition
                }
            };

            if start_new {
                partitions.push(Partition {
                    id: partitions.len() as u32,
                    tablets: Vec::new(),
                });
                current_bytes = 0;
            }

            current_bytes = current_bytes.saturating_add(bytes);
            if let Some(current) = partitions.last_mut() {
                tablet.partition_id = Some(current.id);
                current.tablets.push(tablet.clone());
            }
        }

        partitions
    }
}
