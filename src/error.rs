// Error kinds for the OTA agent
//
// Connect and transfer errors are retried locally per their budgets; the
// rest are either fatal for the cycle (Storage, MalformedDocument) or
// fatal for the agent instance (InvalidConfig, SessionExhausted).

use std::fmt;

use crate::storage::StorageError;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// Bad timing or identity values. Fails at construction, never retried.
    InvalidConfig(String),
    /// Broker/server unreachable. Retried up to `connect_retries`.
    Connect(String),
    /// Job or data transfer stalled past its deadline. Retried up to
    /// `download_retries`.
    TransferTimeout,
    /// Job or response document failed to parse. Fails the cycle.
    MalformedDocument(String),
    /// Flash open/write/verify/validate failure. Not retried within the
    /// same cycle because resuming a partial write is not safe.
    Storage(String),
    /// Session retry budget used up. The agent moves to `Exiting`.
    SessionExhausted,
    /// The observer asked the agent to stop. A clean termination of the
    /// current cycle, not an error outcome.
    ObserverStop,
    /// A cycle is already in flight for this agent instance.
    AlreadyRunning,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            OtaError::Connect(msg) => write!(f, "connection failed: {}", msg),
            OtaError::TransferTimeout => write!(f, "transfer timed out"),
            OtaError::MalformedDocument(msg) => write!(f, "malformed document: {}", msg),
            OtaError::Storage(msg) => write!(f, "storage failure: {}", msg),
            OtaError::SessionExhausted => write!(f, "session retry budget exhausted"),
            OtaError::ObserverStop => write!(f, "stopped by observer"),
            OtaError::AlreadyRunning => write!(f, "an update cycle is already running"),
        }
    }
}

impl std::error::Error for OtaError {}

impl From<TransportError> for OtaError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => OtaError::TransferTimeout,
            other => OtaError::Connect(other.to_string()),
        }
    }
}

impl From<StorageError> for OtaError {
    fn from(err: StorageError) -> Self {
        OtaError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_timeout_maps_to_transfer_timeout() {
        assert_eq!(
            OtaError::from(TransportError::Timeout),
            OtaError::TransferTimeout
        );
    }

    #[test]
    fn connect_failure_keeps_its_message() {
        let err = OtaError::from(TransportError::ConnectFailed("refused".to_string()));
        assert_eq!(err, OtaError::Connect("connect failed: refused".to_string()));
    }
}
