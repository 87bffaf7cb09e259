//! Recovery Error Types
//!
//! - Unreachable peers are absorbed into accounting, never fatal
//! - An incomplete log ends the attempt; the owner retries later
//! - Nothing here escalates to a process-level fault

use thiserror::Error;

use crate::cluster::RecoveryId;
use crate::rpc::RpcError;

/// Result type for recovery operations
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Recovery errors
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// No reachable backup holds a usable log digest
    #[error("No log digest among replicas on available backups")]
    NoLogDigest,

    /// Segments named by the digest are not on any reachable backup
    #[error("{} segments in the digest but not available from backups: {missing:?}", .missing.len())]
    IncompleteLog { missing: Vec<u64> },

    /// Digest bytes could not be decoded
    #[error("Malformed log digest: {reason}")]
    MalformedDigest { reason: String },

    /// Configuration failed validation
    #[error("Invalid recovery configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Configuration file could not be read
    #[error("Failed to read recovery configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration file is not valid JSON for the expected shape
    #[error("Failed to parse recovery configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// No active attempt has this id
    #[error("Unknown recovery {0}")]
    UnknownRecovery(RecoveryId),

    /// A peer call failed
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl RecoveryError {
    pub fn malformed_digest(reason: impl Into<String>) -> Self {
        Self::MalformedDigest {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// True if this error ends the current attempt.
    pub fn is_attempt_fatal(&self) -> bool {
        matches!(
            self,
            RecoveryError::NoLogDigest
                | RecoveryError::IncompleteLog { .. }
                | RecoveryError::MalformedDigest { .. }
        )
    }
}
