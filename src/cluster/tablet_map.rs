//! Tablet directory
//!
//! Ordered list of every tablet in the cluster and the master owning it.
//! Traversal order is insertion order, which is the order the partitioner sees.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use super::ids::ServerId;

/// Lifecycle state of a tablet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabletStatus {
    /// Served by its owner
    Normal,
    /// Owner crashed; data is being rebuilt
    Recovering,
}

/// A contiguous key-hash range of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    pub table_id: u64,
    pub start_key_hash: u64,
    pub end_key_hash: u64,
    pub server_id: ServerId,
    pub status: TabletStatus,
    /// Partition assigned during recovery setup
    pub partition_id: Option<u32>,
    /// Size estimate used by the partitioner, if known
    pub estimated_bytes: Option<u64>,
}

impl Tablet {
    pub fn new(
        table_id: u64,
        start_key_hash: u64,
        end_key_hash: u64,
        server_id: ServerId,
        status: TabletStatus,
    ) -> Self {
        Self {
            table_id,
            start_key_hash,
            end_key_hash,
            server_id,
            status,
            partition_id: None,
            estimated_bytes: None,
        }
    }

    pub fn with_estimated_bytes(mut self, bytes: u64) -> Self {
        self.estimated_bytes = Some(bytes);
        self
    }

    /// True if this is the same key range of the same table.
    pub fn same_range(&self, other: &Tablet) -> bool {
        self.table_id == other.table_id
            && self.start_key_hash == other.start_key_hash
            && self.end_key_hash == other.end_key_hash
    }
}

/// Shared tablet directory
#[derive(Debug, Default)]
pub struct TabletMap {
    tablets: RwLock<Vec<Tablet>>,
}

impl TabletMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Tablet>> {
        self.tablets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Tablet>> {
        self.tablets.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_tablet(&self, tablet: Tablet) {
        self.write().push(tablet);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Every tablet, in directory order.
    pub fn tablets(&self) -> Vec<Tablet> {
        self.read().clone()
    }

    /// Tablets owned by `server_id`, in directory order.
    pub fn tablets_for_server(&self, server_id: ServerId) -> Vec<Tablet> {
        self.read()
            .iter()
            .filter(|tablet| tablet.server_id == server_id)
            .cloned()
            .collect()
    }

    /// Set the status of every tablet owned by `server_id`; returns how many changed.
    pub fn set_status_for_server(&self, server_id: ServerId, status: TabletStatus) -> usize {
        let mut tablets = self.write();
        let mut changed = 0;
        for tablet in tablets.iter_mut().filter(|t| t.server_id == server_id) {
            if tablet.status != status {
                tablet.status = status;
                changed += 1;
            }
        }
        changed
    }

    /// Record the partition chosen for a tablet still owned by its crashed server.
    ///
    /// Returns false if the directory has no such tablet.
    pub fn set_partition(&self, partitioned: &Tablet) -> bool {
        let mut tablets = self.write();
        match tablets.iter_mut().find(|tablet| {
            tablet.same_range(partitioned) && tablet.server_id == partitioned.server_id
        }) {
            Some(tablet) => {
                tablet.partition_id = partitioned.partition_id;
                true
            }
            None => false,
        }
    }

    /// Hand a recovered tablet to its new owner and make it servable again.
    ///
    /// Returns false if no tablet with that range exists.
    pub fn complete_recovery(&self, recovered: &Tablet, new_owner: ServerId) -> bool {
        let mut tablets = self.write();
        match tablets.iter_mut().find(|tablet| tablet.same_range(recovered)) {
            Some(tablet) => {
                tablet.server_id = new_owner;
                tablet.status = TabletStatus::Normal;
                tablet.partition_id = None;
                true
            }
            None => false,
        }
    }
}
