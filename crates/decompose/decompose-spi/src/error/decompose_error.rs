//! Decomposition error types

use thiserror::Error;

/// Errors that can occur during decomposition operations
#[derive(Error, Debug)]
pub enum DecomposeError {
    /// A state machine symbol fired in a state with no defined successor
    #[error("Invalid state transition: {symbol} in state {state}")]
    InvalidStateTransition { state: String, symbol: String },

    /// Persisted state could not be restored
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// Invalid parameter value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A detected decomposition proposal disagrees with the current model
    #[error("Proposal mismatch: {0}")]
    ProposalMismatch(String),
}

pub type Result<T> = std::result::Result<T, DecomposeError>;
