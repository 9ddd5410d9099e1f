//! The one typed error every client-visible and inter-component seam in the
//! control plane returns. Internal library code is free to use
//! `anyhow::Result` for plumbing; at the RPC/client boundary that gets
//! mapped into one of these variants, which is what actually reaches the
//! wire and the operator's logs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MiddlewareError {
    #[error("BAD_STATEMENT: {0}")]
    BadStatement(String),

    #[error("LOCK_TIMEOUT: timed out waiting for {mode:?} lock on table {table}")]
    LockTimeout { table: String, mode: String },

    #[error("BACKEND_ERROR: {0}")]
    BackendError(String),

    #[error("UNREACHABLE_PEER: node {0}")]
    UnreachablePeer(u32),

    #[error("UNAVAILABLE: {0}")]
    Unavailable(String),

    #[error("CHECKSUM_FAIL: frame dropped")]
    ChecksumFail,

    #[error("TXN_TIMEOUT: {0}")]
    TxnTimeout(String),

    #[error("ABORTED: {0}")]
    Aborted(String),

    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl MiddlewareError {
    /// Stable machine-readable code, independent of the human-readable
    /// `Display` message, for clients that want to branch on error kind.
    pub fn code(&self) -> &'static str {
        match self {
            MiddlewareError::BadStatement(_) => "BAD_STATEMENT",
            MiddlewareError::LockTimeout { .. } => "LOCK_TIMEOUT",
            MiddlewareError::BackendError(_) => "BACKEND_ERROR",
            MiddlewareError::UnreachablePeer(_) => "UNREACHABLE_PEER",
            MiddlewareError::Unavailable(_) => "UNAVAILABLE",
            MiddlewareError::ChecksumFail => "CHECKSUM_FAIL",
            MiddlewareError::TxnTimeout(_) => "TXN_TIMEOUT",
            MiddlewareError::Aborted(_) => "ABORTED",
            MiddlewareError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<anyhow::Error> for MiddlewareError {
    fn from(e: anyhow::Error) -> Self {
        MiddlewareError::Internal(format!("{e:#}"))
    }
}
