//! tablet-recovery - crash-recovery coordinator for a distributed tablet store
//!
//! When a master crashes, its log survives as segment replicas scattered across
//! backups. This crate rebuilds a consistent view of that log, splits the lost
//! tablets into partitions, hands each partition to an idle master and tracks
//! the attempt until every partition has reported.

pub mod cluster;
pub mod observability;
pub mod recovery;
pub mod rpc;
