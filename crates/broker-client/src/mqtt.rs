//! MQTT client backed by rumqttc.
//!
//! rumqttc splits a connection into an [`AsyncClient`] handle, used to issue
//! requests, and an [`EventLoop`] that must be polled for anything to happen
//! on the wire. [`MqttClient::connect`] polls the event loop until the broker
//! acknowledges the connection, then hands it to a driver task that forwards
//! inbound publishes to the subscription feed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, SubAck,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::{
    BrokerClient, BrokerError, ClientFactory, Credentials, CredentialPool, Qos, Result, Role,
    TlsSettings, SUBSCRIPTION_BUFFER,
};

/// Capacity of the request channel between the client handle and its event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Largest packet accepted in either direction (the MQTT protocol limit).
const MAX_PACKET_SIZE: usize = 256 * 1024 * 1024;

/// How long `disconnect` waits for the event loop to flush the DISCONNECT packet.
const DISCONNECT_QUIESCE: Duration = Duration::from_millis(250);

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// How long `subscribe` waits for SUBACK when `connect` was never given a timeout.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to connect.
#[derive(Clone, Debug)]
pub struct MqttConnectOptions {
    pub hostname: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub tls: Option<TlsSettings>,
}

impl MqttConnectOptions {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            keep_alive: DEFAULT_KEEP_ALIVE,
            tls: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    fn to_mqtt_options(&self, client_id: &str, credentials: Option<&Credentials>) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.hostname.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(credentials) = credentials {
            options.set_credentials(
                credentials.username.clone(),
                credentials.password.clone().unwrap_or_default(),
            );
        }
        if let Some(tls) = &self.tls {
            options.set_transport(tls.transport());
        }
        options
    }
}

pub struct MqttClient {
    client_id: String,
    client: AsyncClient,
    eventloop: tokio::sync::Mutex<Option<EventLoop>>,
    connected: Arc<AtomicBool>,
    subscription: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
    suback: Arc<Mutex<Option<oneshot::Sender<SubAck>>>>,
    ack_timeout: Mutex<Duration>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    pub fn new(
        client_id: impl Into<String>,
        options: &MqttConnectOptions,
        credentials: Option<&Credentials>,
    ) -> Self {
        let client_id = client_id.into();
        let (client, eventloop) = AsyncClient::new(
            options.to_mqtt_options(&client_id, credentials),
            REQUEST_CHANNEL_CAPACITY,
        );
        Self {
            client_id,
            client,
            eventloop: tokio::sync::Mutex::new(Some(eventloop)),
            connected: Arc::new(AtomicBool::new(false)),
            subscription: Arc::new(Mutex::new(None)),
            suback: Arc::new(Mutex::new(None)),
            ack_timeout: Mutex::new(DEFAULT_ACK_TIMEOUT),
            driver: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn spawn_driver(&self, mut eventloop: EventLoop) {
        let connected = Arc::clone(&self.connected);
        let subscription = Arc::clone(&self.subscription);
        let suback = Arc::clone(&self.suback);
        let client_id = self.client_id.clone();

        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let feed = subscription.lock().clone();
                        if let Some(feed) = feed {
                            if feed.send(publish.payload).await.is_err() {
                                trace!(client_id = %client_id, "Subscription feed closed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        let waiter = suback.lock().take();
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(ack);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(client_id = %client_id, error = %e, "MQTT event loop stopped");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            // Dropping the sender closes the subscriber's feed.
            subscription.lock().take();
            suback.lock().take();
        });
        *self.driver.lock() = Some(handle);
    }
}

/// rumqttc's network timeout is in whole seconds; sub-second values round up.
fn network_timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

fn connection_error(e: ConnectionError, timeout: Duration) -> BrokerError {
    match e {
        ConnectionError::ConnectionRefused(code) => BrokerError::Refused(format!("{code:?}")),
        ConnectionError::NetworkTimeout => BrokerError::ConnectTimeout(timeout),
        other => BrokerError::Connection(other.to_string()),
    }
}

#[async_trait]
impl BrokerClient for MqttClient {
    async fn connect(&self, timeout: Duration) -> Result<()> {
        let mut eventloop = self.eventloop.lock().await.take().ok_or_else(|| {
            BrokerError::Connection(format!("client {} can only connect once", self.client_id))
        })?;
        *self.ack_timeout.lock() = timeout;

        // rumqttc bounds the TCP/TLS handshake with its own timeout, 5 s unless set.
        let mut network = eventloop.network_options();
        network.set_connection_timeout(network_timeout_secs(timeout));
        eventloop.set_network_options(network);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return match ack.code {
                            ConnectReturnCode::Success => Ok(()),
                            code => Err(BrokerError::Refused(format!("{code:?}"))),
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(connection_error(e, timeout)),
                }
            }
        };
        let outcome = tokio::time::timeout(timeout, handshake).await;

        match outcome {
            Err(_) => Err(BrokerError::ConnectTimeout(timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                self.connected.store(true, Ordering::SeqCst);
                self.spawn_driver(eventloop);
                debug!(client_id = %self.client_id, "Connected to MQTT broker");
                Ok(())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.client.disconnect().await {
                trace!(client_id = %self.client_id, error = %e, "Disconnect request failed");
            }
        }
        let driver = self.driver.lock().take();
        if let Some(mut driver) = driver {
            if tokio::time::timeout(DISCONNECT_QUIESCE, &mut driver).await.is_err() {
                driver.abort();
            }
        }
        self.subscription.lock().take();
        self.suback.lock().take();
    }

    /// Subscribe and wait for the broker's SUBACK, so anything published to
    /// `topic` after this returns reaches the feed.
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<mpsc::Receiver<Bytes>> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected("subscribe"));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (ack_tx, ack_rx) = oneshot::channel();
        *self.subscription.lock() = Some(tx);
        *self.suback.lock() = Some(ack_tx);
        self.client
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let ack_timeout = *self.ack_timeout.lock();
        let ack = match tokio::time::timeout(ack_timeout, ack_rx).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(_)) => {
                return Err(BrokerError::Subscribe(format!(
                    "connection closed before SUBACK for {topic}"
                )))
            }
            Err(_) => {
                self.suback.lock().take();
                return Err(BrokerError::Subscribe(format!(
                    "no SUBACK for {topic} within {ack_timeout:?}"
                )));
            }
        };
        check_suback(&ack, topic)?;
        trace!(client_id = %self.client_id, topic, "Subscription acknowledged");
        Ok(rx)
    }

    async fn publish(&self, topic: &str, qos: Qos, payload: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected("publish"));
        }
        self.client
            .publish_bytes(topic, qos.into(), false, payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }
}

fn check_suback(ack: &SubAck, topic: &str) -> Result<()> {
    if ack
        .return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        return Err(BrokerError::Subscribe(format!(
            "broker rejected subscription to {topic}"
        )));
    }
    Ok(())
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

/// Builds rumqttc clients, cycling connection positions through a credential pool.
#[derive(Clone, Debug)]
pub struct MqttClientFactory {
    options: MqttConnectOptions,
    credentials: CredentialPool,
    run_id: String,
}

impl MqttClientFactory {
    pub fn new(options: MqttConnectOptions, credentials: CredentialPool) -> Self {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            options,
            credentials,
            run_id: run_id[..8].to_string(),
        }
    }

    pub fn client_id(&self, role: Role, index: usize) -> String {
        format!("mqtt-stresser-{role}-{index}-{}", self.run_id)
    }
}

impl ClientFactory for MqttClientFactory {
    fn create_client(&self, role: Role, index: usize) -> Box<dyn BrokerClient> {
        Box::new(MqttClient::new(
            self.client_id(role, index),
            &self.options,
            self.credentials.for_index(index),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_unique_per_role_and_index() {
        let factory = MqttClientFactory::new(
            MqttConnectOptions::new("localhost", 1883),
            CredentialPool::anonymous(),
        );
        let a = factory.client_id(Role::Publisher, 0);
        let b = factory.client_id(Role::Subscriber, 0);
        let c = factory.client_id(Role::Publisher, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("mqtt-stresser-pub-0-"));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let client = MqttClient::new("idle", &MqttConnectOptions::new("localhost", 1883), None);
        assert!(!client.is_connected());
        assert!(matches!(
            client.publish("t", Qos::AtMostOnce, Bytes::new()).await,
            Err(BrokerError::NotConnected(_))
        ));
        assert!(client.subscribe("t", Qos::AtMostOnce).await.is_err());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_fast() {
        // Port 1 on localhost is reserved and normally closed.
        let client = MqttClient::new("unreachable", &MqttConnectOptions::new("127.0.0.1", 1), None);
        let started = std::time::Instant::now();
        let err = client.connect(Duration::from_secs(2)).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(err, BrokerError::Connection(_)), "got {err}");
        // The event loop is consumed by the first attempt.
        assert!(client.connect(Duration::from_millis(10)).await.is_err());
    }

    /// Accepts TCP connections and never answers, so CONNACK never arrives.
    async fn silent_listener() -> (u16, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_connect_timeout_longer_than_network_default() {
        let (port, listener) = silent_listener().await;
        let client = MqttClient::new("silent", &MqttConnectOptions::new("127.0.0.1", port), None);

        let timeout = Duration::from_secs(7);
        let started = std::time::Instant::now();
        let err = client.connect(timeout).await.unwrap_err();
        let waited = started.elapsed();

        assert!(waited >= Duration::from_millis(6500), "gave up after {waited:?}: {err}");
        assert!(waited < Duration::from_secs(9), "waited {waited:?}");
        assert!(
            matches!(err, BrokerError::ConnectTimeout(t) if t == timeout),
            "got {err}"
        );
        listener.abort();
    }

    #[tokio::test]
    async fn test_sub_second_connect_timeout() {
        let (port, listener) = silent_listener().await;
        let client = MqttClient::new("silent", &MqttConnectOptions::new("127.0.0.1", port), None);

        let started = std::time::Instant::now();
        let err = client.connect(Duration::from_millis(300)).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(err, BrokerError::ConnectTimeout(_)), "got {err}");
        listener.abort();
    }

    #[test]
    fn test_network_timeout_rounds_up() {
        assert_eq!(network_timeout_secs(Duration::from_millis(300)), 1);
        assert_eq!(network_timeout_secs(Duration::from_secs(8)), 8);
        assert_eq!(network_timeout_secs(Duration::from_millis(8001)), 9);
        assert_eq!(network_timeout_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_rejected_suback() {
        let granted = SubAck::new(1, vec![SubscribeReasonCode::Success(rumqttc::QoS::AtMostOnce)]);
        assert!(check_suback(&granted, "test/a").is_ok());

        let rejected = SubAck::new(2, vec![SubscribeReasonCode::Failure]);
        assert!(matches!(
            check_suback(&rejected, "test/a"),
            Err(BrokerError::Subscribe(msg)) if msg.contains("rejected")
        ));
    }
}
