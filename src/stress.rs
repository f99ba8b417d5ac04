//! Running a load test end to end.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use broker_client::{ClientFactory, MemoryBroker, MqttClientFactory, MqttConnectOptions, TlsSettings};
use flooding::FlooderCollection;
use killswitch::Killswitch;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::{OutputTarget, StressConfig};
use crate::report::StressReport;

/// How often a running test logs its progress.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Build the client factory for `config`.
///
/// Everything that can fail at setup (CA bundle, passwd file) is checked here,
/// before any connection is attempted.
pub fn build_factory(config: &StressConfig) -> anyhow::Result<Arc<dyn ClientFactory>> {
    if config.dry_run {
        info!("Dry run: using the in-process loopback broker");
        return Ok(Arc::new(MemoryBroker::new()));
    }

    let mut options = MqttConnectOptions::new(config.hostname.clone(), config.port);
    if let Some(ca_file) = &config.ca_file {
        let tls = TlsSettings::from_ca_file(ca_file)
            .with_context(|| format!("Failed to load CA file {ca_file:?}"))?;
        info!(ca_file = %ca_file.display(), certs = tls.num_certs(), "TLS enabled");
        options = options.with_tls(tls);
    }
    let credentials = config.credentials.load()?;
    if !credentials.is_empty() {
        info!(entries = credentials.len(), "Loaded broker credentials");
    }
    Ok(Arc::new(MqttClientFactory::new(options, credentials)))
}

/// Run the load test described by `config` and collect its report.
///
/// Stops after the configured duration, or earlier on Ctrl-C.
pub async fn run_stress(config: &StressConfig) -> anyhow::Result<StressReport> {
    let factory = build_factory(config)?;
    let killswitch = Killswitch::new();
    let collection = FlooderCollection::start(factory, config.collection_options(), killswitch.clone())?;
    let started = Instant::now();

    info!(
        hostname = %config.hostname,
        port = config.port,
        pairs = config.num_publishers,
        duration_secs = config.duration.as_secs_f64(),
        "Load test started"
    );

    let deadline = sleep(config.duration);
    tokio::pin!(deadline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut progress = interval(PROGRESS_INTERVAL);
    progress.set_missed_tick_behavior(MissedTickBehavior::Skip);
    progress.tick().await;
    let mut listening = true;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Run duration elapsed, stopping publishers");
                break;
            }
            signal = &mut interrupt, if listening => match signal {
                Ok(()) => {
                    warn!("Interrupted, stopping publishers");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for Ctrl-C");
                    listening = false;
                }
            },
            _ = progress.tick() => {
                info!(
                    attempted = collection.num_attempted(),
                    failed = collection.num_failed(),
                    received = collection.num_received(),
                    "Progress"
                );
            }
        }
    }

    killswitch.trigger();
    collection.wait_finished().await;
    let elapsed = started.elapsed();

    let first_error = collection.take_first_error().map(|e| e.to_string());
    if let Some(err) = &first_error {
        warn!(error = %err, failed = collection.num_failed(), "Some connections failed");
    }
    info!(
        sent = collection.num_sent(),
        received = collection.num_received(),
        elapsed_secs = elapsed.as_secs_f64(),
        "Load test finished"
    );

    Ok(StressReport::from_collection(
        &collection,
        elapsed.as_secs_f64(),
        first_error,
    ))
}

/// Check that the report destination is writable before the run starts.
pub fn open_output(target: &OutputTarget) -> anyhow::Result<Box<dyn Write>> {
    match target {
        OutputTarget::Stdout => Ok(Box::new(std::io::stdout())),
        OutputTarget::File(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file {path:?}"))?;
            Ok(Box::new(std::io::BufWriter::new(file)))
        }
    }
}

pub fn write_report<W: Write + ?Sized>(
    out: &mut W,
    report: &StressReport,
    config: &StressConfig,
) -> anyhow::Result<()> {
    out.write_all(report.render(config.format)?.as_bytes())
        .context("Failed to write report")?;
    out.flush().context("Failed to write report")?;
    Ok(())
}
