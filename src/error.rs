use serde::Serialize;
use thiserror::Error;

use crate::core::script::ScriptKind;

/// Stable, field-less mirror of [`RescueError`] used for codes and user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    TransactionNotFound,
    AlreadyConfirmed,
    SourceUnavailable,
    RateLimited,
    NetworkFailure,
    ConstructionFailed,
    OutputBelowDust,
    NoFixPossible,
    BroadcastFailed,
    UnsupportedScriptType,
}

impl ErrorKind {
    /// Fixed message shown to the user for this kind of failure.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => {
                "Invalid input. A transaction ID is a 64-character hex string."
            }
            ErrorKind::TransactionNotFound => {
                "Transaction not found. Check the TXID and make sure you selected the right network."
            }
            ErrorKind::AlreadyConfirmed => {
                "This transaction is already confirmed. No action needed."
            }
            ErrorKind::SourceUnavailable => {
                "The mempool data source is temporarily unavailable. Try again in a moment."
            }
            ErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.",
            ErrorKind::NetworkFailure => {
                "Could not reach the mempool data source. Check your internet connection."
            }
            ErrorKind::ConstructionFailed => {
                "Failed to construct the transaction. The transaction format may not be supported."
            }
            ErrorKind::OutputBelowDust => {
                "The output is too small to absorb the fee increase. Try the other fix instead."
            }
            ErrorKind::NoFixPossible => {
                "Neither a replacement nor a child transaction is possible for this transaction."
            }
            ErrorKind::BroadcastFailed => {
                "Failed to broadcast the transaction. The network may have rejected it."
            }
            ErrorKind::UnsupportedScriptType => {
                "This transaction type is not currently supported for rescue."
            }
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::TransactionNotFound => "TX_NOT_FOUND",
            ErrorKind::AlreadyConfirmed => "TX_ALREADY_CONFIRMED",
            ErrorKind::SourceUnavailable => "SOURCE_UNAVAILABLE",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::NetworkFailure => "NETWORK_FAILURE",
            ErrorKind::ConstructionFailed => "CONSTRUCTION_FAILED",
            ErrorKind::OutputBelowDust => "OUTPUT_BELOW_DUST",
            ErrorKind::NoFixPossible => "NO_FIX_POSSIBLE",
            ErrorKind::BroadcastFailed => "BROADCAST_FAILED",
            ErrorKind::UnsupportedScriptType => "UNSUPPORTED_SCRIPT_TYPE",
        }
    }

    fn with_detail(self, detail: &str) -> String {
        if detail.is_empty() {
            self.user_message().to_string()
        } else {
            format!("{} {detail}", self.user_message())
        }
    }

    fn with_optional(self, detail: &Option<String>) -> String {
        self.with_detail(detail.as_deref().unwrap_or_default())
    }
}

/// Every failure the rescue engine and its data source can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RescueError {
    #[error("{}", ErrorKind::InvalidInput.with_detail(.0))]
    InvalidInput(String),

    #[error("{}", ErrorKind::TransactionNotFound.user_message())]
    TransactionNotFound,

    #[error("{}", ErrorKind::AlreadyConfirmed.user_message())]
    AlreadyConfirmed,

    #[error("{}", ErrorKind::SourceUnavailable.with_optional(.0))]
    SourceUnavailable(Option<String>),

    #[error("{}", ErrorKind::RateLimited.user_message())]
    RateLimited,

    #[error("{}", ErrorKind::NetworkFailure.with_optional(.0))]
    NetworkFailure(Option<String>),

    #[error("{}", ErrorKind::ConstructionFailed.with_detail(.0))]
    ConstructionFailed(String),

    #[error(
        "{} Resulting value {value} sats is below the {limit} sat dust limit.",
        ErrorKind::OutputBelowDust.user_message()
    )]
    OutputBelowDust { value: i64, limit: u64 },

    #[error("{}", ErrorKind::NoFixPossible.user_message())]
    NoFixPossible,

    #[error("{}", ErrorKind::BroadcastFailed.with_detail(.0))]
    BroadcastFailed(String),

    #[error(
        "{} A child transaction needs a SegWit output but got {kind}.",
        ErrorKind::UnsupportedScriptType.user_message(),
        kind = .0
    )]
    UnsupportedScriptType(ScriptKind),
}

impl RescueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RescueError::InvalidInput(_) => ErrorKind::InvalidInput,
            RescueError::TransactionNotFound => ErrorKind::TransactionNotFound,
            RescueError::AlreadyConfirmed => ErrorKind::AlreadyConfirmed,
            RescueError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            RescueError::RateLimited => ErrorKind::RateLimited,
            RescueError::NetworkFailure(_) => ErrorKind::NetworkFailure,
            RescueError::ConstructionFailed(_) => ErrorKind::ConstructionFailed,
            RescueError::OutputBelowDust { .. } => ErrorKind::OutputBelowDust,
            RescueError::NoFixPossible => ErrorKind::NoFixPossible,
            RescueError::BroadcastFailed(_) => ErrorKind::BroadcastFailed,
            RescueError::UnsupportedScriptType(_) => ErrorKind::UnsupportedScriptType,
        }
    }

    /// Full message for display: the fixed user message plus any technical detail.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

pub type RescueResult<T> = Result<T, RescueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_without_detail() {
        let err = RescueError::TransactionNotFound;
        assert_eq!(
            err.user_message(),
            ErrorKind::TransactionNotFound.user_message()
        );
    }

    #[test]
    fn message_with_detail_is_appended() {
        let err = RescueError::SourceUnavailable(Some("HTTP 503".into()));
        let msg = err.user_message();
        assert!(msg.starts_with(ErrorKind::SourceUnavailable.user_message()));
        assert!(msg.ends_with("HTTP 503"), "got {msg}");
    }

    #[test]
    fn empty_detail_is_not_padded() {
        let err = RescueError::NetworkFailure(None);
        assert_eq!(err.to_string(), ErrorKind::NetworkFailure.user_message());
    }

    #[test]
    fn dust_error_mentions_values() {
        let err = RescueError::OutputBelowDust { value: 120, limit: 294 };
        let msg = err.to_string();
        assert!(msg.contains("120"));
        assert!(msg.contains("294"));
        assert_eq!(err.kind(), ErrorKind::OutputBelowDust);
    }

    #[test]
    fn unsupported_script_names_kind() {
        let err = RescueError::UnsupportedScriptType(ScriptKind::P2pkh);
        assert!(err.to_string().contains("p2pkh"));
        assert_eq!(err.kind().code(), "UNSUPPORTED_SCRIPT_TYPE");
    }
}
