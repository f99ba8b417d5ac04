//! Rate-controlled publish workload.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use broker_client::{BrokerClient, Qos};
use futures::FutureExt;
use killswitch::Killswitch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use stress_messages::MessageStream;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, trace};

use crate::{FloodError, Flooder, Result};

/// Shortest wait between two sends.
pub const MIN_PUBLISH_INTERVAL: Duration = Duration::from_nanos(100);

/// Run once when a publish loop stops, before it disconnects.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Shape of the publish workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishParams {
    pub messages_per_second: u32,
    /// Variance of the inter-message interval, in seconds squared.
    pub rate_variance: f64,
    /// Mean message size in bytes.
    pub message_size: usize,
    /// Variance of the message size, in bytes squared.
    pub size_variance: f64,
}

impl Default for PublishParams {
    fn default() -> Self {
        Self {
            messages_per_second: 10,
            rate_variance: 0.005,
            message_size: 50,
            size_variance: 5.0,
        }
    }
}

impl PublishParams {
    pub fn validate(&self) -> Result<()> {
        if self.messages_per_second == 0 {
            return Err(FloodError::InvalidConfig(
                "messages per second must be greater than zero".to_string(),
            ));
        }
        if !(self.rate_variance >= 0.0 && self.rate_variance.is_finite()) {
            return Err(FloodError::InvalidConfig(format!(
                "message rate variance must be a non-negative number, got {}",
                self.rate_variance
            )));
        }
        if !(self.size_variance >= 0.0 && self.size_variance.is_finite()) {
            return Err(FloodError::InvalidConfig(format!(
                "message size variance must be a non-negative number, got {}",
                self.size_variance
            )));
        }
        Ok(())
    }

    /// Mean wait between two sends.
    pub fn mean_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.messages_per_second.max(1)))
    }

    /// Draw the wait before the next send.
    pub fn sample_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let z: f64 = rng.sample(StandardNormal);
        let mean_ns = 1e9 / f64::from(self.messages_per_second.max(1));
        let ns = (z * self.rate_variance.sqrt() * 1e9).floor() + mean_ns;
        Duration::from_nanos(ns as u64).max(MIN_PUBLISH_INTERVAL)
    }
}

/// Publishing half of a connection pair.
#[derive(Debug)]
pub struct PublishFlooder {
    flooder: Flooder,
    params: PublishParams,
}

impl PublishFlooder {
    /// Build a publisher on `client`, connecting it first if needed.
    pub async fn new(
        client: Box<dyn BrokerClient>,
        params: PublishParams,
        qos: Qos,
        topic: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let flooder = Flooder::connect(client, qos, topic.into(), connect_timeout)
            .await
            .map_err(FloodError::PublisherConnect)?;
        Ok(Self { flooder, params })
    }

    pub fn flooder(&self) -> &Flooder {
        &self.flooder
    }

    pub fn params(&self) -> &PublishParams {
        &self.params
    }

    /// Publish until `killswitch` fires, returning the number of messages sent.
    pub async fn publish(
        self,
        killswitch: &Killswitch,
        on_complete: Option<CompletionCallback>,
    ) -> u64 {
        self.run(killswitch.clone(), None, on_complete).await
    }

    /// Publish for `duration`, returning the number of messages sent.
    pub async fn publish_for(
        self,
        duration: Duration,
        on_complete: Option<CompletionCallback>,
    ) -> u64 {
        let deadline = Instant::now() + duration;
        self.run(Killswitch::new(), Some(deadline), on_complete)
            .await
    }

    /// Close the connection without publishing.
    pub async fn disconnect(self) {
        self.flooder.client.disconnect().await;
    }

    async fn run(
        self,
        killswitch: Killswitch,
        deadline: Option<Instant>,
        on_complete: Option<CompletionCallback>,
    ) -> u64 {
        let Self { flooder, params } = self;
        let mut rng = StdRng::from_os_rng();
        let mut messages =
            MessageStream::new(killswitch.clone(), params.message_size, params.size_variance);
        let mut wait = Duration::ZERO;
        let mut sent = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = stopped(&killswitch, deadline) => break,
                _ = sleep(wait) => {}
            }
            let Some(payload) = messages.next_message() else {
                break;
            };

            let attempt = flooder.client.publish(&flooder.topic, flooder.qos, payload);
            match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(Ok(())) => sent += 1,
                Ok(Err(e)) => trace!(topic = %flooder.topic, error = %e, "Publish failed"),
                Err(panic) => error!(
                    topic = %flooder.topic,
                    panic = %panic_message(panic.as_ref()),
                    "Recovered from panic while publishing"
                ),
            }
            wait = params.sample_interval(&mut rng);
        }

        debug!(topic = %flooder.topic, sent, "Publisher stopped");
        if let Some(on_complete) = on_complete {
            on_complete();
        }
        flooder.client.disconnect().await;
        sent
    }
}

async fn stopped(killswitch: &Killswitch, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::select! {
                _ = killswitch.triggered() => {}
                _ = sleep_until(deadline) => {}
            }
        }
        None => killswitch.triggered().await,
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker_client::{BrokerError, MemoryBroker};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(1);

    /// Interval standard deviation of a tenth of the mean interval.
    fn steady(messages_per_second: u32) -> PublishParams {
        PublishParams {
            messages_per_second,
            rate_variance: (0.1 / f64::from(messages_per_second)).powi(2),
            message_size: 32,
            size_variance: 1.0,
        }
    }

    /// Client whose publish fails or panics on a fixed schedule.
    #[derive(Default)]
    struct FlakyClient {
        calls: Arc<AtomicUsize>,
        connected: AtomicBool,
    }

    #[async_trait]
    impl BrokerClient for FlakyClient {
        async fn connect(&self, _timeout: Duration) -> broker_client::Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn subscribe(&self, _topic: &str, _qos: Qos) -> broker_client::Result<mpsc::Receiver<Bytes>> {
            Err(BrokerError::Subscribe("unsupported".to_string()))
        }

        async fn publish(&self, _topic: &str, _qos: Qos, _payload: Bytes) -> broker_client::Result<()> {
            match self.calls.fetch_add(1, Ordering::SeqCst) % 3 {
                0 => Ok(()),
                1 => Err(BrokerError::Publish("broker busy".to_string())),
                _ => panic!("client exploded"),
            }
        }
    }

    #[test]
    fn test_interval_sampling() {
        let params = steady(10);
        let mut rng = StdRng::seed_from_u64(1);
        let intervals: Vec<Duration> = (0..1000).map(|_| params.sample_interval(&mut rng)).collect();
        let mean = intervals.iter().sum::<Duration>() / 1000;
        assert!(mean > Duration::from_millis(95) && mean < Duration::from_millis(105));

        // A huge variance still never yields a wait below the floor.
        let jittery = PublishParams { rate_variance: 100.0, ..params };
        assert!((0..1000).all(|_| jittery.sample_interval(&mut rng) >= MIN_PUBLISH_INTERVAL));
    }

    #[test]
    fn test_validate() {
        assert!(PublishParams::default().validate().is_ok());
        assert!(PublishParams { messages_per_second: 0, ..Default::default() }.validate().is_err());
        assert!(PublishParams { rate_variance: -1.0, ..Default::default() }.validate().is_err());
        assert!(PublishParams { size_variance: f64::NAN, ..Default::default() }.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_for_rate() {
        let broker = MemoryBroker::new();
        let publisher = PublishFlooder::new(
            Box::new(broker.client("pub")),
            steady(10),
            Qos::AtMostOnce,
            "test/rate",
            TIMEOUT,
        )
        .await
        .unwrap();

        let sent = publisher.publish_for(Duration::from_secs(3), None).await;
        assert!((20..=40).contains(&sent), "sent {sent}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_stops_on_killswitch() {
        let broker = MemoryBroker::new();
        let publisher = PublishFlooder::new(
            Box::new(broker.client("pub")),
            steady(100),
            Qos::AtMostOnce,
            "test/stop",
            TIMEOUT,
        )
        .await
        .unwrap();

        let ks = Killswitch::new();
        let completed = Arc::new(AtomicBool::new(false));
        let handle = {
            let ks = ks.clone();
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                publisher
                    .publish(&ks, Some(Box::new(move || completed.store(true, Ordering::SeqCst))))
                    .await
            })
        };

        sleep(Duration::from_secs(1)).await;
        ks.trigger();
        let sent = handle.await.unwrap();
        assert!((80..=120).contains(&sent), "sent {sent}");
        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_already_triggered_sends_nothing() {
        let broker = MemoryBroker::new();
        let publisher = PublishFlooder::new(
            Box::new(broker.client("pub")),
            steady(10),
            Qos::AtMostOnce,
            "test/none",
            TIMEOUT,
        )
        .await
        .unwrap();
        let ks = Killswitch::new();
        ks.trigger();
        assert_eq!(publisher.publish(&ks, None).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_panics_are_not_counted() {
        let client = FlakyClient::default();
        let calls = Arc::clone(&client.calls);
        let publisher = PublishFlooder::new(
            Box::new(client),
            steady(10),
            Qos::AtMostOnce,
            "test/flaky",
            TIMEOUT,
        )
        .await
        .unwrap();
        assert!(publisher.flooder().is_connected());

        let sent = publisher.publish_for(Duration::from_millis(2950), None).await;
        let attempts = calls.load(Ordering::SeqCst) as u64;
        assert!(attempts >= 20);
        // Every third call succeeds; the loop survives the others.
        assert_eq!(sent, attempts.div_ceil(3));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let broker = MemoryBroker::refusing("not authorised");
        let err = PublishFlooder::new(
            Box::new(broker.client("pub")),
            steady(10),
            Qos::AtMostOnce,
            "test/refused",
            TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FloodError::PublisherConnect(BrokerError::Refused(_))));
        assert!(err.to_string().starts_with("creating pub flooder"));
    }
}
