//! Error kinds shared across the core.
//!
//! Fatal kinds (`ComposeError`, `ProviderError`, `DispatchError`) abort a run.
//! Per-recipient kinds (`ValidationError`, `DeliveryFailure`) are collected and
//! reported next to successful deliveries.

use std::time::Duration;

use thiserror::Error;

use crate::transport::SessionState;

/// Report composition failed because the payload lacks a required field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl ComposeError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }
}

/// The weather source could not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("weather provider '{provider}' unavailable: {reason}")]
    Unavailable { provider: String, reason: String },
}

impl ProviderError {
    pub(crate) fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single recipient record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationReason {
    #[error("expected `name,address[,carrier]`, found {0} field(s)")]
    FieldCount(usize),

    #[error("empty name")]
    EmptyName,

    #[error("unknown carrier '{0}'")]
    UnknownCarrier(String),

    #[error("'{0}' is not a phone number")]
    InvalidPhone(String),

    #[error("'{0}' is not an email address")]
    InvalidEmail(String),

    #[error("SMS recipient has no carrier")]
    MissingCarrier,
}

/// A recipient record that was excluded from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}recipient '{name}': {reason}", line_prefix(.line))]
pub struct ValidationError {
    /// 1-based line in the source, when the record came from a file.
    pub line: Option<usize>,
    pub name: String,
    pub reason: ValidationReason,
}

fn line_prefix(line: &Option<usize>) -> String {
    line.map(|l| format!("line {l}: ")).unwrap_or_default()
}

/// Per-recipient delivery failure. Never aborts sibling deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    #[error("no SMS gateway known for carrier '{0}'")]
    UnknownGateway(String),

    #[error("invalid recipient: {0}")]
    Invalid(String),

    #[error("transport rejected message: {0}")]
    Rejected(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by a [`MailTransport`](crate::transport::MailTransport) or its session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("could not connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("send rejected: {0}")]
    Rejected(String),

    #[error("cannot {op} while session is {state}")]
    InvalidSessionState {
        op: &'static str,
        state: SessionState,
    },
}

/// Failures that abort a whole dispatch batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("transport authentication failed: {0}")]
    TransportAuthFailure(String),

    #[error("transport connection failed: {0}")]
    Connect(String),

    #[error("invalid session state: {0}")]
    InvalidSessionState(String),

    /// The relay refused a command outside any single recipient's send.
    #[error("transport rejected the session: {0}")]
    Rejected(String),
}

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AuthRejected(reason) => Self::TransportAuthFailure(reason),
            TransportError::Connect { .. } => Self::Connect(err.to_string()),
            TransportError::Rejected(reason) => Self::Rejected(reason),
            TransportError::InvalidSessionState { .. } => {
                Self::InvalidSessionState(err.to_string())
            }
        }
    }
}

/// Anything that aborts a [`run`](crate::run::run).
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_mentions_line_and_name() {
        let err = ValidationError {
            line: Some(3),
            name: "Bob".into(),
            reason: ValidationReason::UnknownCarrier("ACME".into()),
        };
        assert_eq!(err.to_string(), "line 3: recipient 'Bob': unknown carrier 'ACME'");

        let err = ValidationError {
            line: None,
            name: "Bob".into(),
            reason: ValidationReason::EmptyName,
        };
        assert_eq!(err.to_string(), "recipient 'Bob': empty name");
    }

    #[test]
    fn auth_rejection_maps_to_batch_auth_failure() {
        let err: DispatchError = TransportError::AuthRejected("535 bad credentials".into()).into();
        assert_eq!(
            err,
            DispatchError::TransportAuthFailure("535 bad credentials".into())
        );
    }

    #[test]
    fn session_misuse_maps_to_invalid_state() {
        let err: DispatchError = TransportError::InvalidSessionState {
            op: "send",
            state: SessionState::Closed,
        }
        .into();
        assert!(matches!(err, DispatchError::InvalidSessionState(msg) if msg.contains("closed")));
    }

    #[test]
    fn session_level_rejection_is_not_a_connect_failure() {
        let err: DispatchError = TransportError::Rejected("421 service closing".into()).into();
        assert_eq!(err, DispatchError::Rejected("421 service closing".into()));
        assert_eq!(err.to_string(), "transport rejected the session: 421 service closing");
    }
}
