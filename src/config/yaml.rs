//! YAML options file.
//!
//! Keys mirror the long command-line flags:
//!
//! ```yaml
//! hostname: broker.example.com
//! port: 8883
//! ca-file: /etc/ssl/broker-ca.pem
//! num-publishers: 500
//! messages-per-second: 20
//! duration: 1m
//! interval: 0.01
//! msg-size-variance: 2.5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use super::duration::{duration_from_secs, parse_duration};
use crate::report::OutputFormat;

/// A duration given either as a number of seconds or as a suffixed string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(f64),
    Text(String),
}

impl DurationValue {
    pub fn to_duration(&self) -> anyhow::Result<Duration> {
        match self {
            DurationValue::Seconds(secs) => duration_from_secs(*secs),
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct YamlOptions {
    pub hostname: Option<String>,
    pub passwd_file: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub ca_file: Option<PathBuf>,
    pub num_publishers: Option<usize>,
    pub messages_per_second: Option<u32>,
    pub msg_rate_variance: Option<f64>,
    pub message_size: Option<usize>,
    pub msg_size_variance: Option<f64>,
    pub topic_prefix: Option<String>,
    pub interval: Option<DurationValue>,
    pub duration: Option<DurationValue>,
    pub output: Option<String>,
    pub qos: Option<u8>,
    pub connect_timeout: Option<DurationValue>,
    pub max_workers: Option<usize>,
    pub drain_grace: Option<DurationValue>,
    pub format: Option<OutputFormat>,
}

impl YamlOptions {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file {path:?}"))?;
        Self::parse(&content).with_context(|| format!("Failed to parse options file {path:?}"))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // An empty document deserializes as unit, not as an empty mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kebab_case_keys() {
        let options = YamlOptions::parse(
            "hostname: broker\nnum-publishers: 20\nmsg-size-variance: 2.5\nduration: 1m\ninterval: 0.25\nformat: json\n",
        )
        .unwrap();
        assert_eq!(options.hostname.as_deref(), Some("broker"));
        assert_eq!(options.num_publishers, Some(20));
        assert_eq!(options.msg_size_variance, Some(2.5));
        assert_eq!(
            options.duration.unwrap().to_duration().unwrap(),
            Duration::from_secs(60)
        );
        assert_eq!(
            options.interval.unwrap().to_duration().unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(options.format, Some(OutputFormat::Json));
    }

    #[test]
    fn test_integer_durations_are_seconds() {
        let options = YamlOptions::parse("duration: 5\n").unwrap();
        assert_eq!(
            options.duration.unwrap().to_duration().unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(YamlOptions::parse("num-publisher: 3\n").is_err());
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(YamlOptions::parse("").unwrap(), YamlOptions::default());
    }
}
