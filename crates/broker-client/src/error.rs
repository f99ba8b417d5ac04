//! Error types for broker clients

use std::time::Duration;

use thiserror::Error;

/// Broker client errors
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Client is not connected, cannot {0}")]
    NotConnected(&'static str),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for broker client operations
pub type Result<T> = std::result::Result<T, BrokerError>;
