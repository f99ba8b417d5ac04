//! The broker capability consumed by the load generators.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{Qos, Result};

/// Capacity of the inbound feed returned by [`BrokerClient::subscribe`].
pub const SUBSCRIPTION_BUFFER: usize = 10;

/// A single connection to a publish/subscribe broker.
///
/// Implementations use interior mutability so one client can be shared by
/// reference between the task driving it and the task observing it.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Connect and wait for the broker's acknowledgement, at most `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Disconnect. Idempotent and never fails.
    async fn disconnect(&self);

    /// Subscribe to `topic`, returning the feed of inbound payloads.
    ///
    /// The feed closes when the client disconnects.
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<mpsc::Receiver<Bytes>>;

    async fn publish(&self, topic: &str, qos: Qos, payload: Bytes) -> Result<()>;
}

/// Which half of a connection pair a client serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publisher => write!(f, "pub"),
            Role::Subscriber => write!(f, "sub"),
        }
    }
}

/// Builds one client per role for every connection position.
pub trait ClientFactory: Send + Sync + 'static {
    fn create_client(&self, role: Role, index: usize) -> Box<dyn BrokerClient>;
}
