// src/errors.rs

use std::time::Duration;

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use thiserror::Error;

/// Failure reported by a broker backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Amqp(#[from] LapinError),

    #[error("{0}")]
    Broker(String),
}

impl From<String> for TransportError {
    fn from(message: String) -> Self {
        TransportError::Broker(message)
    }
}

impl From<&str> for TransportError {
    fn from(message: &str) -> Self {
        TransportError::Broker(message.to_string())
    }
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Broker connection error: {0}")]
    ConnectionError(#[source] TransportError),

    #[error("Broker channel error: {0}")]
    ChannelError(#[source] TransportError),

    #[error("Broker topology error: {0}")]
    TopologyError(#[source] TransportError),

    #[error("Broker publish error: {0}")]
    PublishError(#[source] TransportError),

    #[error("Broker consume error: {0}")]
    ConsumeError(#[source] TransportError),

    #[error("Message serialization error: {0}")]
    SerializationError(#[from] SerdeError),

    #[error("Message deserialization error: {0}")]
    DeserializationError(String),

    #[error("Timed out after {timeout:?} while {operation}")]
    TimeoutError {
        operation: &'static str,
        timeout: Duration,
    },
}

// Custom Result type for messaging operations
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Failure reported by a persistence store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl MessagingError {
    pub(crate) fn timeout(operation: &'static str, timeout: Duration) -> Self {
        MessagingError::TimeoutError { operation, timeout }
    }

    /// True for failures caused by the broker link rather than by the caller's input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MessagingError::ConnectionError(_)
                | MessagingError::ChannelError(_)
                | MessagingError::TopologyError(_)
                | MessagingError::PublishError(_)
                | MessagingError::ConsumeError(_)
                | MessagingError::TimeoutError { .. }
        )
    }
}
