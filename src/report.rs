//! Run report: connection counts, message totals and latency statistics.

use std::fmt::Write as _;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use flooding::FlooderCollection;
use serde::{Deserialize, Serialize};

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Table,
    Json,
}

/// Transit latency statistics, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    /// Summarize latencies given in seconds. `None` when there are no samples.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = samples.iter().map(|s| s * 1000.0).collect();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };

        Some(Self {
            count,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: variance.sqrt(),
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressReport {
    pub attempted: usize,
    pub failed: usize,
    pub created: usize,
    pub sent: u64,
    pub received: usize,
    pub duration_secs: f64,
    pub latency: Option<LatencySummary>,
    pub first_error: Option<String>,
}

impl StressReport {
    pub fn from_collection(
        collection: &FlooderCollection,
        duration_secs: f64,
        first_error: Option<String>,
    ) -> Self {
        let attempted = collection.num_attempted();
        let failed = collection.num_failed();
        Self {
            attempted,
            failed,
            created: attempted - failed,
            sent: collection.num_sent(),
            received: collection.num_received(),
            duration_secs,
            latency: LatencySummary::from_samples(&collection.latency_samples()),
            first_error,
        }
    }

    /// Sent messages per second over the run.
    pub fn send_rate(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.sent as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Text => Ok(self.format_text()),
            OutputFormat::Table => Ok(self.format_table()),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)? + "\n"),
        }
    }

    /// The line-oriented report.
    pub fn format_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Created a total of {} (out of {} attempted) connections to the MQTT broker",
            self.created, self.attempted
        );
        let _ = writeln!(out, "Sent a total of {} messages.", self.sent);
        let _ = writeln!(out, "Received a total of {} messages.", self.received);
        match &self.latency {
            Some(latency) => {
                let _ = writeln!(out, "Average latency   = {:10.3} ms", latency.mean_ms);
                let _ = writeln!(out, "Median latency    = {:10.3} ms", latency.median_ms);
                let _ = writeln!(out, "Latency std. dev. = {:10.3} ms", latency.std_dev_ms);
            }
            None => {
                let _ = writeln!(out, "No latency samples were collected.");
            }
        }
        if let Some(err) = &self.first_error {
            let _ = writeln!(out, "First connection error: {err}");
        }
        out
    }

    pub fn format_table(&self) -> String {
        let mut output = String::new();

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Metric", "Value"]);

        let connections_cell = if self.failed == 0 {
            Cell::new(format!("{}/{}", self.created, self.attempted)).fg(Color::Green)
        } else {
            Cell::new(format!("{}/{}", self.created, self.attempted)).fg(Color::Red)
        };
        table.add_row(vec![Cell::new("Connections"), connections_cell]);
        table.add_row(vec![Cell::new("Sent"), Cell::new(format_number(self.sent))]);
        table.add_row(vec![
            Cell::new("Received"),
            Cell::new(format_number(self.received as u64)),
        ]);
        table.add_row(vec![
            Cell::new("Send rate"),
            Cell::new(format!("{:.1} msg/s", self.send_rate())),
        ]);

        match &self.latency {
            Some(latency) => {
                for (name, value) in [
                    ("Mean latency", latency.mean_ms),
                    ("Median latency", latency.median_ms),
                    ("Latency std. dev.", latency.std_dev_ms),
                    ("Min latency", latency.min_ms),
                    ("Max latency", latency.max_ms),
                ] {
                    table.add_row(vec![Cell::new(name), Cell::new(format!("{value:.3} ms"))]);
                }
            }
            None => {
                table.add_row(vec![
                    Cell::new("Latency"),
                    Cell::new("no samples").fg(Color::Yellow),
                ]);
            }
        }

        output.push_str(&table.to_string());
        output.push('\n');
        if let Some(err) = &self.first_error {
            output.push_str(&format!("\nFirst connection error: {err}\n"));
        }
        output
    }
}

/// Format number with thousands separators.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}
