//! Lock Manager request/outcome types.

use serde::{Deserialize, Serialize};

/// SHARED/SHARED is the only compatible pair; every other combination
/// conflicts, including EXCLUSIVE/EXCLUSIVE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub txn_id: String,
    pub table: String,
    pub mode: LockMode,
}

/// Result of waiting on `LockManager::acquire`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockWaitOutcome {
    Granted,
    Timeout,
}
