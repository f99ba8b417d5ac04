//! Load test configuration.
//!
//! Values come from three layers, highest precedence first: command-line
//! flags, the YAML options file given with `--yaml`, and built-in defaults.

pub mod duration;
pub mod yaml;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use broker_client::{CredentialPool, Credentials, Qos};
use clap::Args;
use flooding::{CollectionOptions, PublishParams, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_WORKERS};

pub use duration::parse_duration;
pub use yaml::{DurationValue, YamlOptions};

use crate::report::OutputFormat;

pub const DEFAULT_HOSTNAME: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_NUM_PUBLISHERS: usize = 1;
pub const DEFAULT_MESSAGES_PER_SECOND: u32 = 10;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(5);
pub const DEFAULT_MESSAGE_SIZE: usize = 50;
pub const DEFAULT_MSG_RATE_VARIANCE: f64 = 0.005;
pub const DEFAULT_MSG_SIZE_VARIANCE: f64 = 5.0;
pub const DEFAULT_TOPIC_PREFIX: &str = "test/";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_OUTPUT: &str = "stdout";

/// Command-line options for a load test run.
#[derive(Args, Debug, Clone, Default)]
pub struct StressArgs {
    /// Broker hostname [default: localhost]
    #[arg(long)]
    pub hostname: Option<String>,

    /// File of user:password lines; connection pairs cycle through its entries
    #[arg(long = "passwd-file", value_name = "PATH")]
    pub passwd_file: Option<PathBuf>,

    /// Username to authenticate with
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password to authenticate with
    #[arg(short = 'P', long, env = "MQTT_STRESSER_PASSWORD")]
    pub password: Option<String>,

    /// Broker port [default: 1883]
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Number of publisher/subscriber connection pairs [default: 1]
    #[arg(short = 'n', long = "num-publishers")]
    pub num_publishers: Option<usize>,

    /// Messages each publisher sends per second [default: 10]
    #[arg(short = 'm', long = "messages-per-second")]
    pub messages_per_second: Option<u32>,

    /// How long to publish, e.g. "30", "90s", "5m" [default: 5]
    #[arg(short = 'd', long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Mean message size in bytes [default: 50]
    #[arg(short = 's', long = "message-size")]
    pub message_size: Option<usize>,

    /// Variance of the interval between messages, in seconds squared [default: 0.005]
    #[arg(short = 'v', long = "msg-rate-variance")]
    pub msg_rate_variance: Option<f64>,

    /// Variance of the message size, in bytes squared [default: 5]
    #[arg(short = 'V', long = "msg-size-variance")]
    pub msg_size_variance: Option<f64>,

    /// Prefix of the random per-pair topics [default: test/]
    #[arg(short = 't', long = "topic-prefix")]
    pub topic_prefix: Option<String>,

    /// Delay between successive connection attempts, e.g. "0.01", "10ms" [default: 1]
    #[arg(short = 'i', long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// CA certificate file; enables TLS
    #[arg(short = 'c', long = "ca-file", value_name = "PATH")]
    pub ca_file: Option<PathBuf>,

    /// Where to write the report: "stdout" or a file path [default: stdout]
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// YAML options file; command-line flags take precedence over its values
    #[arg(short = 'y', long, value_name = "PATH")]
    pub yaml: Option<PathBuf>,

    /// MQTT QoS level for publishing and subscribing [default: 0]
    #[arg(long)]
    pub qos: Option<u8>,

    /// Maximum time to wait for each connection, e.g. "10s" [default: 10]
    #[arg(long = "connect-timeout", value_parser = parse_duration)]
    pub connect_timeout: Option<Duration>,

    /// Upper bound on concurrent connection workers [default: 100000]
    #[arg(long = "max-workers")]
    pub max_workers: Option<usize>,

    /// How long subscribers keep reading after publishing stops [default: 0]
    #[arg(long = "drain-grace", value_parser = parse_duration)]
    pub drain_grace: Option<Duration>,

    /// Report format [default: text]
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Run against an in-process loopback broker instead of connecting
    #[arg(long)]
    pub dry_run: bool,
}

/// How connection pairs authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Anonymous,
    Single {
        username: String,
        password: Option<String>,
    },
    PasswdFile(PathBuf),
}

impl CredentialSource {
    pub fn load(&self) -> anyhow::Result<CredentialPool> {
        match self {
            CredentialSource::Anonymous => Ok(CredentialPool::anonymous()),
            CredentialSource::Single { username, password } => Ok(CredentialPool::single(
                Credentials::new(username.clone(), password.clone()),
            )),
            CredentialSource::PasswdFile(path) => CredentialPool::from_passwd_file(path)
                .with_context(|| format!("Failed to load passwd file {path:?}")),
        }
    }
}

/// Where the report goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    fn parse(value: &str) -> Self {
        if value == DEFAULT_OUTPUT {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(PathBuf::from(value))
        }
    }
}

/// Fully resolved configuration of a run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    pub hostname: String,
    pub port: u16,
    pub credentials: CredentialSource,
    pub ca_file: Option<PathBuf>,
    pub num_publishers: usize,
    pub messages_per_second: u32,
    pub duration: Duration,
    pub message_size: usize,
    pub msg_rate_variance: f64,
    pub msg_size_variance: f64,
    pub topic_prefix: String,
    pub interval: Duration,
    pub connect_timeout: Duration,
    pub max_workers: usize,
    pub drain_grace: Duration,
    pub qos: Qos,
    pub output: OutputTarget,
    pub format: OutputFormat,
    pub dry_run: bool,
}

fn yaml_duration(value: Option<DurationValue>, key: &str) -> anyhow::Result<Option<Duration>> {
    value
        .map(|v| v.to_duration().with_context(|| format!("Invalid '{key}' in options file")))
        .transpose()
}

impl StressConfig {
    /// Merge `args` over the options file it names (if any) and the defaults.
    pub fn resolve(args: StressArgs) -> anyhow::Result<Self> {
        let yaml = match &args.yaml {
            Some(path) => YamlOptions::from_file(path)?,
            None => YamlOptions::default(),
        };
        Self::merge(args, yaml)
    }

    pub fn merge(args: StressArgs, yaml: YamlOptions) -> anyhow::Result<Self> {
        let username = args.username.or(yaml.username);
        let password = args.password.or(yaml.password);
        let credentials = match (args.passwd_file.or(yaml.passwd_file), username) {
            (Some(path), _) => CredentialSource::PasswdFile(path),
            (None, Some(username)) => CredentialSource::Single { username, password },
            (None, None) => CredentialSource::Anonymous,
        };

        let qos_level = args.qos.or(yaml.qos).unwrap_or(0);
        let qos = Qos::try_from(qos_level).context("Invalid --qos")?;

        let config = Self {
            hostname: args
                .hostname
                .or(yaml.hostname)
                .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
            port: args.port.or(yaml.port).unwrap_or(DEFAULT_PORT),
            credentials,
            ca_file: args.ca_file.or(yaml.ca_file),
            num_publishers: args
                .num_publishers
                .or(yaml.num_publishers)
                .unwrap_or(DEFAULT_NUM_PUBLISHERS),
            messages_per_second: args
                .messages_per_second
                .or(yaml.messages_per_second)
                .unwrap_or(DEFAULT_MESSAGES_PER_SECOND),
            duration: args
                .duration
                .or(yaml_duration(yaml.duration, "duration")?)
                .unwrap_or(DEFAULT_DURATION),
            message_size: args
                .message_size
                .or(yaml.message_size)
                .unwrap_or(DEFAULT_MESSAGE_SIZE),
            msg_rate_variance: args
                .msg_rate_variance
                .or(yaml.msg_rate_variance)
                .unwrap_or(DEFAULT_MSG_RATE_VARIANCE),
            msg_size_variance: args
                .msg_size_variance
                .or(yaml.msg_size_variance)
                .unwrap_or(DEFAULT_MSG_SIZE_VARIANCE),
            topic_prefix: args
                .topic_prefix
                .or(yaml.topic_prefix)
                .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
            interval: args
                .interval
                .or(yaml_duration(yaml.interval, "interval")?)
                .unwrap_or(DEFAULT_INTERVAL),
            connect_timeout: args
                .connect_timeout
                .or(yaml_duration(yaml.connect_timeout, "connect-timeout")?)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            max_workers: args
                .max_workers
                .or(yaml.max_workers)
                .unwrap_or(DEFAULT_MAX_WORKERS),
            drain_grace: args
                .drain_grace
                .or(yaml_duration(yaml.drain_grace, "drain-grace")?)
                .unwrap_or(Duration::ZERO),
            qos,
            output: OutputTarget::parse(
                args.output
                    .or(yaml.output)
                    .as_deref()
                    .unwrap_or(DEFAULT_OUTPUT),
            ),
            format: args.format.or(yaml.format).unwrap_or_default(),
            dry_run: args.dry_run,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hostname.trim().is_empty() {
            anyhow::bail!("Hostname must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("Port must be greater than zero");
        }
        if self.max_workers == 0 {
            anyhow::bail!("--max-workers must be greater than zero");
        }
        if self.connect_timeout.is_zero() {
            anyhow::bail!("--connect-timeout must be greater than zero");
        }
        self.publish_params()
            .validate()
            .context("Invalid publish settings")?;
        Ok(())
    }

    pub fn publish_params(&self) -> PublishParams {
        PublishParams {
            messages_per_second: self.messages_per_second,
            rate_variance: self.msg_rate_variance,
            message_size: self.message_size,
            size_variance: self.msg_size_variance,
        }
    }

    pub fn collection_options(&self) -> CollectionOptions {
        CollectionOptions::default()
            .with_max_connections(self.num_publishers)
            .with_max_workers(self.max_workers)
            .with_connect_interval(self.interval)
            .with_connect_timeout(self.connect_timeout)
            .with_drain_grace(self.drain_grace)
            .with_topic_prefix(self.topic_prefix.clone())
            .with_qos(self.qos)
            .with_publish(self.publish_params())
    }

    /// Write the effective configuration. Passwords are masked.
    pub fn echo<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "Configuration:")?;
        writeln!(out, "  hostname:            {}", self.hostname)?;
        writeln!(out, "  port:                {}", self.port)?;
        match &self.credentials {
            CredentialSource::Anonymous => {
                writeln!(out, "  credentials:         anonymous")?;
            }
            CredentialSource::Single { username, password } => {
                writeln!(out, "  username:            {username}")?;
                writeln!(out, "  password:            {}", mask_password(password.as_deref()))?;
            }
            CredentialSource::PasswdFile(path) => {
                writeln!(out, "  passwd file:         {}", path.display())?;
            }
        }
        match &self.ca_file {
            Some(path) => writeln!(out, "  ca file:             {}", path.display())?,
            None => writeln!(out, "  tls:                 disabled")?,
        }
        writeln!(out, "  num publishers:      {}", self.num_publishers)?;
        writeln!(out, "  messages per second: {}", self.messages_per_second)?;
        writeln!(out, "  duration:            {:?}", self.duration)?;
        writeln!(out, "  message size:        {}", self.message_size)?;
        writeln!(out, "  msg rate variance:   {}", self.msg_rate_variance)?;
        writeln!(out, "  msg size variance:   {}", self.msg_size_variance)?;
        writeln!(out, "  topic prefix:        {}", self.topic_prefix)?;
        writeln!(out, "  interval:            {:?}", self.interval)?;
        writeln!(out, "  connect timeout:     {:?}", self.connect_timeout)?;
        writeln!(out, "  max workers:         {}", self.max_workers)?;
        writeln!(out, "  drain grace:         {:?}", self.drain_grace)?;
        writeln!(out, "  qos:                 {}", self.qos)?;
        match &self.output {
            OutputTarget::Stdout => writeln!(out, "  output:              stdout")?,
            OutputTarget::File(path) => writeln!(out, "  output:              {}", path.display())?,
        }
        writeln!(out, "  format:              {:?}", self.format)?;
        if self.dry_run {
            writeln!(out, "  dry run:             loopback broker")?;
        }
        Ok(())
    }
}

/// Mask a password for display.
pub fn mask_password(password: Option<&str>) -> &'static str {
    match password {
        Some(p) if !p.is_empty() => "***",
        _ => "(none)",
    }
}
