//! Load generation against a publish/subscribe broker.
//!
//! A run is a set of connection pairs, each a [`PublishFlooder`] sending
//! timestamped messages at a jittered rate and a [`SubscribeFlooder`] reading
//! them back on the same topic. [`FlooderCollection`] ramps the pairs up,
//! stops them on a shared [`killswitch::Killswitch`] and aggregates counts and
//! transit latencies.

pub mod collection;
pub mod error;
pub mod first_error;
pub mod flooder;
pub mod partition;
pub mod publisher;
pub mod subscriber;

pub use collection::{
    CollectionOptions, FlooderCollection, PairInfo, DEFAULT_MAX_WORKERS, LATENCY_CHANNEL_CAPACITY,
};
pub use error::{FloodError, Result};
pub use first_error::FirstErrorSlot;
pub use flooder::{Flooder, DEFAULT_CONNECT_TIMEOUT};
pub use publisher::{CompletionCallback, PublishFlooder, PublishParams, MIN_PUBLISH_INTERVAL};
pub use subscriber::{Received, SubscribeFlooder};
