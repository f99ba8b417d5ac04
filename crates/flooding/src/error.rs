//! Error types for flooders

use broker_client::BrokerError;
use thiserror::Error;

/// Flooder errors
#[derive(Error, Debug)]
pub enum FloodError {
    #[error("creating pub flooder: {0}")]
    PublisherConnect(BrokerError),

    #[error("creating sub flooder: {0}")]
    SubscriberConnect(BrokerError),

    #[error("subscribing in sub flooder: {0}")]
    Subscribe(BrokerError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FloodError {
    /// The broker-level cause, for connection and subscription failures.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            FloodError::PublisherConnect(e)
            | FloodError::SubscriberConnect(e)
            | FloodError::Subscribe(e) => Some(e),
            FloodError::InvalidConfig(_) => None,
        }
    }
}

/// Result type for flooder operations
pub type Result<T> = std::result::Result<T, FloodError>;
