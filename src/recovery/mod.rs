//! Crash recovery coordination
//!
//! # Attempt sequence
//!
//! 1. Partition the crashed server's tablets
//! 2. Query every backup for its replicas of the crashed server's log
//! 3. Validate each inventory and choose the authoritative log digest
//! 4. Check every digest segment is on some reachable backup
//! 5. Build the replica map, head segment last
//! 6. Hand each partition to an idle master
//! 7. Wait for every partition to report
//! 8. If all succeeded, tell backups the recovery is complete
//!
//! # Failure policy
//!
//! - Unreachable backups and masters are absorbed into accounting
//! - A missing digest or incomplete log ends the attempt before step 6
//! - Partial success still reaches DONE; the owner retries the remainder

mod backup_query;
mod broadcast;
mod config;
mod coordinator;
mod errors;
mod log_digest;
mod manager;
mod master_assignment;
mod partition;
mod replica_map;
mod task_queue;

pub use backup_query::{BackupQueryResult, BackupQueryTask, ReplicaValidator, SegmentReplica};
pub use broadcast::CompletionBroadcastTask;
pub use config::{PartitionConfig, RecoveryConfig, ReplicaMapConfig};
pub use coordinator::{Recovery, RecoveryContext, RecoveryOwner, RecoveryStatus};
pub use errors::{RecoveryError, RecoveryResult};
pub use log_digest::{find_log_digest, verify_log_complete, LogDigest, SelectedDigest};
pub use manager::{RecoveryCommand, RecoveryLedger, RecoveryManager, RecoveryOutcome};
pub use master_assignment::MasterAssignmentTask;
pub use partition::{Partition, TabletPartitioner};
pub use replica_map::build_replica_map;
pub use task_queue::{Task, TaskFuture, TaskQueue};
