//! Duration parsing utilities.

use std::time::Duration;

use anyhow::Context;

/// Parse a duration string like "1h", "30m", "1.5s", "250ms", "5" into a [`Duration`].
/// Supports:
/// - Plain numbers (interpreted as seconds, fractions allowed): "5", "0.25"
/// - Milliseconds suffix: "250ms"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h"
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    // "ms" must be checked before the single-letter suffixes
    if let Some(num_str) = s.strip_suffix("ms") {
        return scaled(num_str, 0.001, "milliseconds");
    }
    if let Some(num_str) = s.strip_suffix('h') {
        return scaled(num_str, 3600.0, "hours");
    }
    if let Some(num_str) = s.strip_suffix('m') {
        return scaled(num_str, 60.0, "minutes");
    }
    if let Some(num_str) = s.strip_suffix('s') {
        return scaled(num_str, 1.0, "seconds");
    }

    // No suffix - treat as seconds
    scaled(s, 1.0, "duration")
}

/// Seconds as a [`Duration`], rejecting negative and non-finite values.
pub fn duration_from_secs(secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid duration: {secs} seconds"))
}

fn scaled(num_str: &str, secs_per_unit: f64, unit: &str) -> anyhow::Result<Duration> {
    let value: f64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid {unit} value: {num_str}"))?;
    duration_from_secs(value * secs_per_unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_seconds() {
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("0.5").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_with_suffix() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("NaN").is_err());
    }
}
