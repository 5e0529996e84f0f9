//! Error type shared by every layer of the share/open engine.
//!
//! `MpcError` is `Clone` because a failure of one pending fragment has to be
//! observed by every value composed on top of it.

use crate::op_id::OpId;

pub type Result<T> = std::result::Result<T, MpcError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MpcError {
    /// Two values (or a value and a session) belong to different computations.
    #[error("shares do not belong to the same session")]
    SessionMismatch,

    /// The session has not received its party id yet.
    #[error("session is not ready: party id has not been assigned")]
    NotReady,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid shares: {0}")]
    InvalidShares(String),

    /// An inbound message could not be decoded or named an unknown operation kind.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// No fragment arrived for the operation before its deadline. This is how a
    /// desynchronised operation sequence between parties shows up.
    #[error("operation {op_id} timed out")]
    Timeout { op_id: OpId },

    #[error("pending operation table is full ({limit} entries)")]
    CapacityExceeded { limit: usize },

    #[error("transport failure: {0}")]
    Transport(String),

    /// Opening a value that is still pending needs a Tokio runtime to wait on.
    #[error("no Tokio runtime to wait for a pending value")]
    NoRuntime,

    /// The resolution handle was dropped before delivering a value.
    #[error("operation {op_id} was cancelled")]
    Cancelled { op_id: OpId },
}

impl MpcError {
    pub(crate) fn invalid_shares(msg: impl Into<String>) -> Self {
        MpcError::InvalidShares(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        MpcError::MalformedMessage(msg.into())
    }
}

impl From<serde_json::Error> for MpcError {
    fn from(e: serde_json::Error) -> Self {
        MpcError::MalformedMessage(e.to_string())
    }
}
