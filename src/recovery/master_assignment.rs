//! Partition hand-off to recovery masters

use crate::cluster::ServerId;
use crate::rpc::{MasterClient, RecoverRequest, RpcResult};

/// Delivers one partition to the master chosen for it
#[derive(Debug, Clone)]
pub struct MasterAssignmentTask {
    master_id: ServerId,
    request: RecoverRequest,
}

impl MasterAssignmentTask {
    pub fn new(master_id: ServerId, request: RecoverRequest) -> Self {
        Self { master_id, request }
    }

    pub fn master_id(&self) -> ServerId {
        self.master_id
    }

    pub fn partition_id(&self) -> u32 {
        self.request.partition_id
    }

    pub fn request(&self) -> &RecoverRequest {
        &self.request
    }

    /// Resolves once the master accepts or refuses the partition.
    pub async fn send(&self, client: &dyn MasterClient) -> RpcResult<()> {
        client.recover(self.master_id, self.request.clone()).await
    }
}
