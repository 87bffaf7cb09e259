//! Recovery RPC surface
//!
//! The coordinator never talks to a transport directly. It calls through
//! `BackupClient` and `MasterClient`, which embedders implement over their
//! transport and tests implement with scripted replies.
//!
//! Each call returns a boxed future; awaiting it suspends only that call.

mod messages;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::cluster::ServerId;

pub use messages::{
    LogDigestPayload, RecoverRequest, RecoveryCompleteRequest, ReplicaMapEntry,
    StartReadingDataRequest, StartReadingDataResponse, INVALID_SEGMENT_ID, OPEN_SEGMENT_LENGTH,
};

/// Result type for RPCs
pub type RpcResult<T> = Result<T, RpcError>;

/// Future returned by every client call
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = RpcResult<T>> + Send + 'a>>;

/// Failures a peer call can produce
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// No session could be opened, or the session broke
    #[error("Server {server} unreachable: {reason}")]
    Unreachable { server: ServerId, reason: String },

    /// The reply never arrived
    #[error("Server {server} did not reply in time")]
    Timeout { server: ServerId },

    /// The peer answered with an error
    #[error("Server {server} rejected the request: {reason}")]
    Rejected { server: ServerId, reason: String },
}

impl RpcError {
    /// The peer the failed call was addressed to.
    pub fn server(&self) -> ServerId {
        match self {
            RpcError::Unreachable { server, .. } => *server,
            RpcError::Timeout { server } => *server,
            RpcError::Rejected { server, .. } => *server,
        }
    }
}

/// Calls the coordinator makes on backups
pub trait BackupClient: Send + Sync {
    /// Fetch the backup's replica inventory for a crashed server.
    fn start_reading_data(
        &self,
        backup_id: ServerId,
        request: StartReadingDataRequest,
    ) -> RpcFuture<'_, StartReadingDataResponse>;

    /// Announce that recovery of a crashed server finished.
    fn recovery_complete(
        &self,
        backup_id: ServerId,
        request: RecoveryCompleteRequest,
    ) -> RpcFuture<'_, ()>;
}

/// Calls the coordinator makes on recovery masters
pub trait MasterClient: Send + Sync {
    /// Start rebuilding one partition. Completes once the master accepts it;
    /// the outcome of the rebuild is reported separately.
    fn recover(&self, master_id: ServerId, request: RecoverRequest) -> RpcFuture<'_, ()>;
}
