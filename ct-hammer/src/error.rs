//! Error types for hammer runs.
//!
//! [`OpError`] is what a single operation attempt produces; the retry engine
//! classifies it. [`HammerError`] is what a run surfaces to its caller.

use std::time::Duration;

use thiserror::Error;

use crate::chain::ChainError;
use crate::client::ClientError;
use crate::config::ConfigError;
use crate::merkle::ProofError;
use crate::operation::Entrypoint;
use crate::types::CodecError;

/// Outcome of a failed or skipped operation attempt.
#[derive(Debug, Error)]
pub enum OpError {
    /// Preconditions were not met this round; nothing was checked.
    #[error("operation skipped: {0}")]
    Skip(&'static str),

    /// A log RPC failed.
    #[error("{context}: {source}")]
    Client {
        /// What was being attempted.
        context: String,
        /// Underlying client error.
        source: ClientError,
    },

    /// A proof returned by the log did not verify.
    #[error("{context}: {source}")]
    Proof {
        /// What was being verified.
        context: String,
        /// Underlying verification error.
        source: ProofError,
    },

    /// A leaf could not be encoded or a returned leaf could not be decoded.
    #[error("{context}: {source}")]
    Codec {
        /// What was being encoded or decoded.
        context: String,
        /// Underlying codec error.
        source: CodecError,
    },

    /// Fresh certificate material could not be generated.
    #[error("failed to make fresh certificate: {0}")]
    Chain(#[from] ChainError),

    /// The log returned structurally invalid data.
    #[error("{0}")]
    Validation(String),

    /// The run was cancelled while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// Scheduler and executors disagree, or a worker task died.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OpError {
    /// Wraps a client error with context.
    pub fn client(context: impl Into<String>, source: ClientError) -> Self {
        if matches!(source, ClientError::Cancelled) {
            return Self::Cancelled;
        }
        Self::Client {
            context: context.into(),
            source,
        }
    }

    /// Wraps a proof verification error with context.
    pub fn proof(context: impl Into<String>, source: ProofError) -> Self {
        Self::Proof {
            context: context.into(),
            source,
        }
    }

    /// Wraps a codec error with context.
    pub fn codec(context: impl Into<String>, source: CodecError) -> Self {
        Self::Codec {
            context: context.into(),
            source,
        }
    }

    /// Returns true for the skip signal.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }

    /// Returns true if retrying cannot help regardless of configuration.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Internal(_))
    }
}

/// Errors that end a hammer run.
#[derive(Debug, Error)]
pub enum HammerError {
    /// The configuration or collaborators are unusable.
    #[error("invalid hammer configuration: {0}")]
    Config(#[from] ConfigError),

    /// An operation failed and errors are not being ignored.
    #[error("{prefix}: {op} failed: {source}")]
    Operation {
        /// Log prefix.
        prefix: String,
        /// Entry point that failed.
        op: Entrypoint,
        /// The failure.
        source: OpError,
    },

    /// An operation kept failing for longer than the retry budget.
    #[error("{prefix}: gave up retrying {op} after {budget:?}: {source}")]
    RetryBudgetExhausted {
        /// Log prefix.
        prefix: String,
        /// Entry point that failed.
        op: Entrypoint,
        /// Retry budget that was exceeded.
        budget: Duration,
        /// The last failure.
        source: OpError,
    },

    /// The run was cancelled.
    #[error("hammer run cancelled")]
    Cancelled,
}

/// Result type for hammer runs.
pub type HammerResult<T> = Result<T, HammerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_client_error_is_fatal() {
        let err = OpError::client("failed to get-sth", ClientError::Cancelled);
        assert!(matches!(err, OpError::Cancelled));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_transport_error_is_retryable() {
        let err = OpError::client(
            "failed to add-chain",
            ClientError::Transport("connection reset".to_string()),
        );
        assert!(!err.is_fatal());
        assert!(!err.is_skip());
        assert_eq!(err.to_string(), "failed to add-chain: transport error: connection reset");
    }

    #[test]
    fn test_skip_is_not_fatal() {
        let err = OpError::Skip("no earlier STH");
        assert!(err.is_skip());
        assert!(!err.is_fatal());
    }
}
