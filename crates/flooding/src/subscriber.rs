//! Subscribe workload: listens for the paired publisher's messages.

use std::future::Future;
use std::time::{Duration, SystemTime};

use broker_client::{BrokerClient, Qos};
use bytes::Bytes;
use killswitch::Killswitch;
use stress_messages::{has_timestamp, transit_latency};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::{FloodError, Flooder, Result};

/// A payload together with the moment it was read off the feed.
#[derive(Debug, Clone)]
pub struct Received {
    pub payload: Bytes,
    pub received_at: SystemTime,
}

impl Received {
    fn now(payload: Bytes) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }

    /// Transit latency, or `None` when the payload is too short to carry a timestamp.
    pub fn latency(&self) -> Option<Duration> {
        has_timestamp(&self.payload).then(|| transit_latency(&self.payload, self.received_at))
    }
}

/// Subscribing half of a connection pair.
#[derive(Debug)]
pub struct SubscribeFlooder {
    flooder: Flooder,
    feed: mpsc::Receiver<Bytes>,
}

impl SubscribeFlooder {
    /// Connect `client` if needed and subscribe it to `topic`.
    pub async fn new(
        client: Box<dyn BrokerClient>,
        qos: Qos,
        topic: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let flooder = Flooder::connect(client, qos, topic.into(), connect_timeout)
            .await
            .map_err(FloodError::SubscriberConnect)?;
        let feed = match flooder.client.subscribe(&flooder.topic, qos).await {
            Ok(feed) => feed,
            Err(e) => {
                flooder.client.disconnect().await;
                return Err(FloodError::Subscribe(e));
            }
        };
        Ok(Self { flooder, feed })
    }

    pub fn flooder(&self) -> &Flooder {
        &self.flooder
    }

    /// Next message from the feed.
    ///
    /// Returns `None` once `killswitch` has fired or the feed has closed.
    /// Cancellation wins over a message that is already waiting.
    pub async fn next_message(&mut self, killswitch: &Killswitch) -> Option<Received> {
        tokio::select! {
            biased;
            _ = killswitch.triggered() => None,
            payload = self.feed.recv() => payload.map(Received::now),
        }
    }

    /// Collect messages until `signal` resolves or the feed closes.
    pub async fn drain_until<F: Future>(&mut self, signal: F) -> Vec<Received> {
        tokio::pin!(signal);
        let mut late = Vec::new();
        loop {
            tokio::select! {
                biased;
                payload = self.feed.recv() => match payload {
                    Some(payload) => late.push(Received::now(payload)),
                    None => break,
                },
                _ = &mut signal => break,
            }
        }
        late
    }

    /// Collect messages arriving within `grace`.
    pub async fn drain_for(&mut self, grace: Duration) -> Vec<Received> {
        let deadline = Instant::now() + grace;
        let mut late = Vec::new();
        while let Ok(Some(payload)) = timeout_at(deadline, self.feed.recv()).await {
            late.push(Received::now(payload));
        }
        late
    }

    /// Wait out `grace`, then close the feed and disconnect.
    ///
    /// Returns whatever arrived during the grace window.
    pub async fn complete(mut self, grace: Duration) -> Vec<Received> {
        let late = if grace.is_zero() {
            Vec::new()
        } else {
            self.drain_for(grace).await
        };
        self.feed.close();
        self.flooder.client.disconnect().await;
        debug!(topic = %self.flooder.topic, late = late.len(), "Subscriber stopped");
        late
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_client::{BrokerError, MemoryBroker};
    use stress_messages::generate_message;

    const TIMEOUT: Duration = Duration::from_secs(1);

    async fn pair(broker: &MemoryBroker, topic: &str) -> (Box<dyn BrokerClient>, SubscribeFlooder) {
        let publisher: Box<dyn BrokerClient> = Box::new(broker.client("pub"));
        publisher.connect(TIMEOUT).await.unwrap();
        let subscriber = SubscribeFlooder::new(
            Box::new(broker.client("sub")),
            Qos::AtMostOnce,
            topic,
            TIMEOUT,
        )
        .await
        .unwrap();
        (publisher, subscriber)
    }

    #[tokio::test]
    async fn test_receives_with_latency() {
        let broker = MemoryBroker::new();
        let (publisher, mut subscriber) = pair(&broker, "test/latency").await;
        let ks = Killswitch::new();

        publisher
            .publish("test/latency", Qos::AtMostOnce, generate_message(50))
            .await
            .unwrap();
        let received = subscriber.next_message(&ks).await.unwrap();
        assert_eq!(received.payload.len(), 50);
        let latency = received.latency().unwrap();
        assert!(latency < Duration::from_secs(1));

        publisher
            .publish("test/latency", Qos::AtMostOnce, generate_message(4))
            .await
            .unwrap();
        assert!(subscriber.next_message(&ks).await.unwrap().latency().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_ends_sequence() {
        let broker = MemoryBroker::new();
        let (publisher, mut subscriber) = pair(&broker, "test/cancel").await;
        let ks = Killswitch::new();

        publisher
            .publish("test/cancel", Qos::AtMostOnce, generate_message(16))
            .await
            .unwrap();
        ks.trigger();
        assert!(subscriber.next_message(&ks).await.is_none());

        // The waiting message is still there for the grace window.
        let late = subscriber.complete(Duration::from_millis(50)).await;
        assert_eq!(late.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_until_signal() {
        let broker = MemoryBroker::new();
        let (publisher, mut subscriber) = pair(&broker, "test/until").await;
        for _ in 0..3 {
            publisher
                .publish("test/until", Qos::AtMostOnce, generate_message(16))
                .await
                .unwrap();
        }

        let late = subscriber
            .drain_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert_eq!(late.len(), 3);
    }

    #[tokio::test]
    async fn test_complete_without_grace_disconnects() {
        let broker = MemoryBroker::new();
        let (publisher, subscriber) = pair(&broker, "test/close").await;
        assert!(subscriber.flooder().is_connected());

        let late = subscriber.complete(Duration::ZERO).await;
        assert!(late.is_empty());
        // The publisher's messages now go nowhere.
        publisher
            .publish("test/close", Qos::AtMostOnce, generate_message(16))
            .await
            .unwrap();
        assert_eq!(broker.num_delivered(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let broker = MemoryBroker::refusing("bad credentials");
        let err = SubscribeFlooder::new(
            Box::new(broker.client("sub")),
            Qos::AtMostOnce,
            "test/refused",
            TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FloodError::SubscriberConnect(BrokerError::Refused(_))));
    }
}
