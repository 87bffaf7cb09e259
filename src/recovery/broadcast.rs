//! Recovery-complete notices to backups
//!
//! Fire-and-forget: each notice runs as its own tokio task, and a failed
//! notice is logged and otherwise ignored. A backup that misses it keeps the
//! replicas until it learns of the recovery some other way.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::cluster::ServerId;
use crate::observability::{Logger, RecoveryEvent};
use crate::rpc::{BackupClient, RecoveryCompleteRequest};

/// Tells one backup that a crashed server has been recovered
#[derive(Debug, Clone, Copy)]
pub struct CompletionBroadcastTask {
    backup_id: ServerId,
    request: RecoveryCompleteRequest,
}

impl CompletionBroadcastTask {
    pub fn new(backup_id: ServerId, request: RecoveryCompleteRequest) -> Self {
        Self { backup_id, request }
    }

    pub fn backup_id(&self) -> ServerId {
        self.backup_id
    }

    /// Send the notice on `runtime` without waiting for the reply.
    pub fn spawn(self, client: Arc<dyn BackupClient>, runtime: &Handle) -> JoinHandle<bool> {
        runtime.spawn(async move { self.send(client.as_ref()).await })
    }

    /// Returns true if the backup acknowledged the notice.
    pub async fn send(&self, client: &dyn BackupClient) -> bool {
        let backup = self.backup_id.to_string();
        let recovery_id = self.request.recovery_id.to_string();
        match client.recovery_complete(self.backup_id, self.request).await {
            Ok(()) => {
                Logger::trace(
                    RecoveryEvent::BroadcastSent,
                    &[("backup", &backup), ("recovery_id", &recovery_id)],
                );
                true
            }
            Err(err) => {
                Logger::warn(
                    RecoveryEvent::BroadcastFailed,
                    &[
                        ("backup", &backup),
                        ("recovery_id", &recovery_id),
                        ("reason", &err.to_string()),
                    ],
                );
                false
            }
        }
    }
}
