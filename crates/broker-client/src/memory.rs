//! In-process loopback broker.
//!
//! [`MemoryBroker`] routes published payloads to every subscriber of the exact
//! same topic. It backs `--dry-run` and the test suites, and can be told to
//! refuse connections or subscriptions to exercise failure accounting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

use crate::{BrokerClient, BrokerError, ClientFactory, Qos, Result, Role, SUBSCRIPTION_BUFFER};

#[derive(Debug, Default)]
struct BrokerState {
    topics: RwLock<HashMap<String, Vec<mpsc::Sender<Bytes>>>>,
    refusal: Mutex<Option<String>>,
    subscribe_refusal: Mutex<Option<String>>,
    connections: AtomicUsize,
    active: AtomicUsize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Loopback broker shared by all of its clients.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that refuses every connection with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        let broker = Self::new();
        broker.refuse_connections(Some(reason.into()));
        broker
    }

    /// Refuse new connections with the given reason, or accept them again with `None`.
    pub fn refuse_connections(&self, reason: Option<String>) {
        *self.state.refusal.lock() = reason;
    }

    /// A broker that accepts connections but rejects every subscription with `reason`.
    pub fn refusing_subscriptions(reason: impl Into<String>) -> Self {
        let broker = Self::new();
        broker.refuse_subscriptions(Some(reason.into()));
        broker
    }

    pub fn refuse_subscriptions(&self, reason: Option<String>) {
        *self.state.subscribe_refusal.lock() = reason;
    }

    pub fn client(&self, id: impl Into<String>) -> MemoryClient {
        MemoryClient {
            id: id.into(),
            broker: self.clone(),
            connected: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Connections accepted so far.
    pub fn num_connections(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }

    /// Clients currently connected.
    pub fn num_active_connections(&self) -> usize {
        self.state.active.load(Ordering::Relaxed)
    }

    /// Payloads handed to a subscriber feed.
    pub fn num_delivered(&self) -> u64 {
        self.state.delivered.load(Ordering::Relaxed)
    }

    /// Payloads discarded because a subscriber feed was full.
    pub fn num_dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    fn route(&self, topic: &str, payload: Bytes) {
        let mut prune = false;
        {
            let topics = self.state.topics.read();
            let Some(subscribers) = topics.get(topic) else {
                return;
            };
            for subscriber in subscribers {
                // A slow subscriber loses messages instead of stalling publishers.
                match subscriber.try_send(payload.clone()) {
                    Ok(()) => {
                        self.state.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        self.state.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Closed(_)) => prune = true,
                }
            }
        }
        if prune {
            let mut topics = self.state.topics.write();
            if let Some(subscribers) = topics.get_mut(topic) {
                subscribers.retain(|s| !s.is_closed());
                if subscribers.is_empty() {
                    topics.remove(topic);
                }
            }
        }
    }
}

impl ClientFactory for MemoryBroker {
    fn create_client(&self, role: Role, index: usize) -> Box<dyn BrokerClient> {
        Box::new(self.client(format!("memory-{role}-{index}")))
    }
}

/// Client connected to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryClient {
    id: String,
    broker: MemoryBroker,
    connected: AtomicBool,
    subscriptions: Mutex<Vec<(String, mpsc::Sender<Bytes>)>>,
}

impl MemoryClient {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl BrokerClient for MemoryClient {
    async fn connect(&self, _timeout: Duration) -> Result<()> {
        let refusal = self.broker.state.refusal.lock().clone();
        if let Some(reason) = refusal {
            return Err(BrokerError::Refused(reason));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.broker.state.connections.fetch_add(1, Ordering::Relaxed);
            self.broker.state.active.fetch_add(1, Ordering::Relaxed);
            trace!(client_id = %self.id, "Memory client connected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.broker.state.active.fetch_sub(1, Ordering::Relaxed);
        }
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        if subscriptions.is_empty() {
            return;
        }
        let mut topics = self.broker.state.topics.write();
        for (topic, mine) in subscriptions {
            if let Some(subscribers) = topics.get_mut(&topic) {
                subscribers.retain(|s| !s.same_channel(&mine));
                if subscribers.is_empty() {
                    topics.remove(&topic);
                }
            }
        }
    }

    async fn subscribe(&self, topic: &str, _qos: Qos) -> Result<mpsc::Receiver<Bytes>> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected("subscribe"));
        }
        let refusal = self.broker.state.subscribe_refusal.lock().clone();
        if let Some(reason) = refusal {
            return Err(BrokerError::Subscribe(reason));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.broker
            .state
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(tx.clone());
        self.subscriptions.lock().push((topic.to_string(), tx));
        Ok(rx)
    }

    async fn publish(&self, topic: &str, _qos: Qos, payload: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected("publish"));
        }
        self.broker.route(topic, payload);
        Ok(())
    }
}
