//! Connection ramp-up and run-wide statistics.
//!
//! [`FlooderCollection::start`] partitions the requested connections over a
//! bounded pool of worker tasks. Each worker opens its connection pairs on an
//! absolute schedule (`ramp_start + connect_interval * position`), then hands
//! every pair to its own publish and subscribe tasks. Two further tasks
//! collect results:
//!
//! - the aggregator reads latency samples from every subscriber until all of
//!   their senders are gone;
//! - the finalizer waits for the killswitch, then for every worker and
//!   publisher to deregister, and sums the per-publisher counts once.

use std::sync::Arc;
use std::time::Duration;

use broker_client::{random_topic, ClientFactory, Qos, Role};
use killswitch::{ActiveGuard, Killswitch};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::partition::{describe_partitioning, partition_connections, WorkerAssignment};
use crate::{
    CompletionCallback, FirstErrorSlot, FloodError, PublishFlooder, PublishParams, Received,
    Result, SubscribeFlooder, DEFAULT_CONNECT_TIMEOUT,
};

/// Worker pool cap applied however many connections are requested.
pub const DEFAULT_MAX_WORKERS: usize = 100_000;

/// Capacity of the channel carrying latency samples to the aggregator.
pub const LATENCY_CHANNEL_CAPACITY: usize = 100;

/// Everything a run needs besides the client factory.
#[derive(Debug, Clone)]
pub struct CollectionOptions {
    pub max_connections: usize,
    pub max_workers: usize,
    pub connect_interval: Duration,
    pub connect_timeout: Duration,
    /// How long a subscriber keeps reading after the run is cancelled.
    pub drain_grace: Duration,
    pub topic_prefix: String,
    pub qos: Qos,
    pub publish: PublishParams,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            max_connections: 1,
            max_workers: DEFAULT_MAX_WORKERS,
            connect_interval: Duration::from_secs(1),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            drain_grace: Duration::ZERO,
            topic_prefix: "test/".to_string(),
            qos: Qos::AtMostOnce,
            publish: PublishParams::default(),
        }
    }
}

impl CollectionOptions {
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_connect_interval(mut self, connect_interval: Duration) -> Self {
        self.connect_interval = connect_interval;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_drain_grace(mut self, drain_grace: Duration) -> Self {
        self.drain_grace = drain_grace;
        self
    }

    pub fn with_topic_prefix(mut self, topic_prefix: impl Into<String>) -> Self {
        self.topic_prefix = topic_prefix.into();
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_publish(mut self, publish: PublishParams) -> Self {
        self.publish = publish;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(FloodError::InvalidConfig(
                "worker cap must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(FloodError::InvalidConfig(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        self.publish.validate()
    }
}

/// Identity of one established connection pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairInfo {
    pub position: usize,
    pub topic: String,
}

#[derive(Debug, Default)]
struct Connections {
    attempted: usize,
    failed: usize,
    pairs: Vec<PairInfo>,
}

#[derive(Debug, Default)]
struct Latencies {
    received: usize,
    /// Transit latencies in seconds.
    samples: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    finalized: bool,
    aggregated: bool,
}

/// A latency sample, or `None` for a message without a timestamp.
type Sample = Option<f64>;

struct Shared {
    options: CollectionOptions,
    factory: Arc<dyn ClientFactory>,
    killswitch: Killswitch,
    connections: RwLock<Connections>,
    sent: RwLock<u64>,
    latencies: RwLock<Latencies>,
    first_error: FirstErrorSlot,
    progress: watch::Sender<Progress>,
}

/// Handle on a running load test.
///
/// Every accessor takes a read-locked snapshot and is safe to call at any
/// time, including while connections are still ramping up.
#[derive(Clone)]
pub struct FlooderCollection {
    shared: Arc<Shared>,
}

impl FlooderCollection {
    /// Start ramping up connections and return immediately.
    ///
    /// Must be called from within a Tokio runtime. The run stops when
    /// `killswitch` is triggered.
    pub fn start(
        factory: Arc<dyn ClientFactory>,
        options: CollectionOptions,
        killswitch: Killswitch,
    ) -> Result<Self> {
        options.validate()?;

        let assignments = partition_connections(options.max_connections, options.max_workers);
        info!(
            connections = options.max_connections,
            workers = assignments.len(),
            interval = ?options.connect_interval,
            "Starting connection ramp-up"
        );
        debug!("{}", describe_partitioning(&assignments));

        let (progress, _) = watch::channel(Progress::default());
        let shared = Arc::new(Shared {
            options,
            factory,
            killswitch,
            connections: RwLock::new(Connections::default()),
            sent: RwLock::new(0),
            latencies: RwLock::new(Latencies::default()),
            first_error: FirstErrorSlot::new(),
            progress,
        });

        let (sample_tx, sample_rx) = mpsc::channel(LATENCY_CHANNEL_CAPACITY);
        let (count_tx, count_rx) = mpsc::unbounded_channel();
        let ramp_start = Instant::now();

        for assignment in assignments {
            // Registered before spawning so the run cannot drain ahead of a worker.
            let guard = shared.killswitch.register_active();
            tokio::spawn(run_worker(
                Arc::clone(&shared),
                assignment,
                ramp_start,
                sample_tx.clone(),
                count_tx.clone(),
                guard,
            ));
        }
        drop(sample_tx);
        drop(count_tx);

        tokio::spawn(aggregate_latencies(Arc::clone(&shared), sample_rx));
        tokio::spawn(finalize_sent(Arc::clone(&shared), count_rx));

        Ok(Self { shared })
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.shared.options
    }

    pub fn killswitch(&self) -> &Killswitch {
        &self.shared.killswitch
    }

    /// Connection pairs attempted so far, failed ones included.
    pub fn num_attempted(&self) -> usize {
        self.shared.connections.read().attempted
    }

    pub fn num_failed(&self) -> usize {
        self.shared.connections.read().failed
    }

    /// Connection pairs established so far.
    pub fn num_pairs(&self) -> usize {
        self.shared.connections.read().pairs.len()
    }

    pub fn pairs(&self) -> Vec<PairInfo> {
        self.shared.connections.read().pairs.clone()
    }

    /// Messages sent by all publishers. Zero until the collection is finalized.
    pub fn num_sent(&self) -> u64 {
        *self.shared.sent.read()
    }

    /// Messages read by all subscribers, timestamped or not.
    pub fn num_received(&self) -> usize {
        self.shared.latencies.read().received
    }

    /// Transit latencies observed so far, in seconds.
    pub fn latency_samples(&self) -> Vec<f64> {
        self.shared.latencies.read().samples.clone()
    }

    /// Whether the sent total has been summed.
    pub fn is_finalized(&self) -> bool {
        self.shared.progress.borrow().finalized
    }

    /// Resolves once the sent total is final and every subscriber feed has
    /// been drained into the latency samples.
    pub async fn wait_finished(&self) {
        let mut rx = self.shared.progress.subscribe();
        let _ = rx.wait_for(|p| p.finalized && p.aggregated).await;
    }

    /// The first connection error of the run, if any.
    pub fn take_first_error(&self) -> Option<FloodError> {
        self.shared.first_error.take()
    }
}

impl std::fmt::Debug for FlooderCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlooderCollection")
            .field("attempted", &self.num_attempted())
            .field("failed", &self.num_failed())
            .field("sent", &self.num_sent())
            .field("received", &self.num_received())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

fn ramp_deadline(ramp_start: Instant, interval: Duration, position: usize) -> Option<Instant> {
    let steps = u32::try_from(position).ok()?;
    ramp_start.checked_add(interval.checked_mul(steps)?)
}

async fn run_worker(
    shared: Arc<Shared>,
    assignment: WorkerAssignment,
    ramp_start: Instant,
    samples: mpsc::Sender<Sample>,
    counts: mpsc::UnboundedSender<u64>,
    _guard: ActiveGuard,
) {
    for position in assignment.positions() {
        let Some(at) = ramp_deadline(ramp_start, shared.options.connect_interval, position) else {
            break;
        };
        tokio::select! {
            biased;
            _ = shared.killswitch.triggered() => break,
            _ = sleep_until(at) => {}
        }
        shared.attempt_connection(position, &samples, &counts).await;
    }
    debug!(worker = assignment.worker, "Connection worker finished");
}

impl Shared {
    async fn attempt_connection(
        self: &Arc<Self>,
        position: usize,
        samples: &mpsc::Sender<Sample>,
        counts: &mpsc::UnboundedSender<u64>,
    ) {
        let options = &self.options;
        let topic = random_topic(&options.topic_prefix);

        let (publisher, subscriber) = tokio::join!(
            PublishFlooder::new(
                self.factory.create_client(Role::Publisher, position),
                options.publish,
                options.qos,
                topic.clone(),
                options.connect_timeout,
            ),
            SubscribeFlooder::new(
                self.factory.create_client(Role::Subscriber, position),
                options.qos,
                topic.clone(),
                options.connect_timeout,
            ),
        );

        let (publisher, subscriber) = match (publisher, subscriber) {
            (Ok(publisher), Ok(subscriber)) => (publisher, subscriber),
            (publisher, subscriber) => {
                let mut errors = Vec::new();
                match publisher {
                    Ok(publisher) => publisher.disconnect().await,
                    Err(e) => errors.push(e),
                }
                match subscriber {
                    Ok(subscriber) => {
                        subscriber.complete(Duration::ZERO).await;
                    }
                    Err(e) => errors.push(e),
                }
                self.record_failure(position, errors);
                return;
            }
        };

        self.record_pair(position, topic.clone());

        // Taken before the publish task exists so `drained` covers it.
        let publish_guard = self.killswitch.register_active();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(listen(
            Arc::clone(self),
            subscriber,
            samples.clone(),
            done_rx,
        ));

        let killswitch = self.killswitch.clone();
        let counts = counts.clone();
        tokio::spawn(async move {
            let on_complete: CompletionCallback = Box::new(move || {
                let _ = done_tx.send(());
            });
            let sent = publisher.publish(&killswitch, Some(on_complete)).await;
            let _ = counts.send(sent);
            publish_guard.deregister();
        });
    }

    fn record_failure(&self, position: usize, errors: Vec<FloodError>) {
        {
            let mut connections = self.connections.write();
            connections.attempted += 1;
            connections.failed += 1;
        }
        for err in errors {
            debug!(position, error = %err, "Connection attempt failed");
            if self.first_error.offer(err) {
                warn!(position, "Recorded first connection error");
            }
        }
    }

    fn record_pair(&self, position: usize, topic: String) {
        let mut connections = self.connections.write();
        connections.attempted += 1;
        connections.pairs.push(PairInfo { position, topic });
    }
}

async fn listen(
    shared: Arc<Shared>,
    mut subscriber: SubscribeFlooder,
    samples: mpsc::Sender<Sample>,
    publisher_done: oneshot::Receiver<()>,
) {
    while let Some(received) = subscriber.next_message(&shared.killswitch).await {
        report(&samples, &received).await;
    }
    // Whatever the publisher put on the wire before it stopped is still in flight.
    for received in subscriber.drain_until(publisher_done).await {
        report(&samples, &received).await;
    }
    for received in subscriber.complete(shared.options.drain_grace).await {
        report(&samples, &received).await;
    }
}

async fn report(samples: &mpsc::Sender<Sample>, received: &Received) {
    let sample = received.latency().map(|latency| latency.as_secs_f64());
    // The aggregator outlives every sender, so this only fails at teardown.
    let _ = samples.send(sample).await;
}

async fn aggregate_latencies(shared: Arc<Shared>, mut samples: mpsc::Receiver<Sample>) {
    let mut batch = Vec::with_capacity(LATENCY_CHANNEL_CAPACITY);
    while samples.recv_many(&mut batch, LATENCY_CHANNEL_CAPACITY).await > 0 {
        let mut latencies = shared.latencies.write();
        latencies.received += batch.len();
        latencies.samples.extend(batch.drain(..).flatten());
    }
    shared.progress.send_modify(|p| p.aggregated = true);
    debug!("Latency aggregation finished");
}

async fn finalize_sent(shared: Arc<Shared>, mut counts: mpsc::UnboundedReceiver<u64>) {
    shared.killswitch.triggered().await;
    shared.killswitch.drained().await;

    let mut total = 0u64;
    let mut publishers = 0usize;
    while let Some(sent) = counts.recv().await {
        total += sent;
        publishers += 1;
    }
    *shared.sent.write() = total;
    shared.progress.send_modify(|p| p.finalized = true);
    info!(sent = total, publishers, "All publishers reported");
}
