//! Error types for the decision engine.

use hostile_common::{GroupId, LockId, UnitId, ZoneError};
use thiserror::Error;

/// Errors raised by AI operations.
#[derive(Debug, Error)]
pub enum AiError {
    /// Agent is not registered in this zone
    #[error("Agent not found: {0}")]
    AgentNotFound(UnitId),

    /// Group is not registered
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// A lock was addressed through an agent that does not own it
    #[error("Lock {lock:?} does not belong to agent {owner}")]
    ForeignLock {
        /// Agent the operation was attempted on
        owner: UnitId,
        /// Offending lock
        lock: LockId,
    },

    /// A reward transaction was opened while another one is still open
    #[error("Reward transaction already open")]
    TransactionReentry,

    /// Commit was attempted without an open transaction
    #[error("No reward transaction is open")]
    NoTransaction,

    /// The reward sink refused a payout
    #[error("Reward rejected: {0}")]
    RewardRejected(String),

    /// Zone collaborator failure
    #[error("Zone error: {0}")]
    Zone(#[from] ZoneError),
}

/// Result type for AI operations.
pub type AiResult<T> = Result<T, AiError>;
