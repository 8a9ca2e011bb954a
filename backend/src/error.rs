//! Error types for the mint workflow.
//!
//! [`MintError`] is what the coordinator's caller sees: one variant per
//! failure kind, each terminal for the request it belongs to. [`LedgerError`]
//! is the lower-level chain failure, mapped into the kind of whichever step
//! hit it.

use alloy_primitives::B256;
use std::fmt;
use std::time::Duration;

use crate::coordinator::MintStatus;

/// Correlation id assigned by the oracle to a randomness request.
pub type RequestId = B256;

/// Terminal failure of a mint request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MintError {
    /// Missing, malformed or incomplete network configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The fee transfer was rejected, reverted or never confirmed.
    #[error("funding error: {0}")]
    Funding(String),
    /// The randomness request failed or its receipt was malformed.
    #[error("submission error: {0}")]
    Submission(String),
    /// The oracle did not fulfill within the caller's bound.
    #[error("no fulfillment for request {request_id} within {waited:?}")]
    Timeout { request_id: RequestId, waited: Duration },
    /// The finalize capability failed or did not commit.
    #[error("finalize error: {0}")]
    Finalize(String),
    /// No mint request with this id was started by this coordinator.
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),
    /// A status change that is not an edge of the mint state machine.
    #[error("illegal transition {from:?} -> {to:?} for mint #{seq}")]
    IllegalTransition {
        seq: u64,
        from: MintStatus,
        to: MintStatus,
    },
}

/// Discriminant of [`MintError`], printed by the entry point on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Funding,
    Submission,
    Timeout,
    Finalize,
    UnknownRequest,
    IllegalTransition,
}

impl MintError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MintError::Configuration(_) => ErrorKind::Configuration,
            MintError::Funding(_) => ErrorKind::Funding,
            MintError::Submission(_) => ErrorKind::Submission,
            MintError::Timeout { .. } => ErrorKind::Timeout,
            MintError::Finalize(_) => ErrorKind::Finalize,
            MintError::UnknownRequest(_) => ErrorKind::UnknownRequest,
            MintError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Funding => "FundingError",
            ErrorKind::Submission => "SubmissionError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Finalize => "FinalizeError",
            ErrorKind::UnknownRequest => "UnknownRequest",
            ErrorKind::IllegalTransition => "IllegalTransitionError",
        };
        f.write_str(name)
    }
}

/// Failure talking to the chain.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// The request never reached the node or the response was unreadable.
    #[error("transport error: {0}")]
    Transport(String),
    /// The transaction was mined with a failed status.
    #[error("transaction {0} reverted")]
    Reverted(B256),
    /// The receipt, or enough confirmations on top of it, did not show up in time.
    #[error("transaction {hash} not confirmed within {waited:?}")]
    ConfirmationTimeout { hash: B256, waited: Duration },
    /// The node returned something that does not decode.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The local key could not sign the transaction.
    #[error("signing failed: {0}")]
    Signer(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        LedgerError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_print_with_error_suffix() {
        assert_eq!(ErrorKind::Funding.to_string(), "FundingError");
        assert_eq!(
            MintError::Timeout {
                request_id: B256::ZERO,
                waited: Duration::from_millis(1)
            }
            .kind()
            .to_string(),
            "TimeoutError"
        );
    }

    #[test]
    fn illegal_transition_names_both_states() {
        let e = MintError::IllegalTransition {
            seq: 4,
            from: MintStatus::Finalized,
            to: MintStatus::Failed,
        };
        assert_eq!(e.kind().to_string(), "IllegalTransitionError");
        assert_eq!(e.to_string(), "illegal transition Finalized -> Failed for mint #4");
    }
}
