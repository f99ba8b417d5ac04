//! mqtt-stresser
//!
//! A load generator and latency probe for MQTT brokers. It opens many
//! publisher/subscriber connection pairs, floods each pair's private topic
//! with timestamped messages and reports how many arrived and how long they
//! took.
//!
//! # CLI Usage
//!
//! ```bash
//! # 500 pairs, 20 msg/s each, for one minute, ramping up 100 connections a second
//! mqtt-stresser run --hostname broker.local -n 500 -m 20 -d 1m -i 10ms
//!
//! # Authenticate with entries from a passwd file over TLS
//! mqtt-stresser run --hostname broker.local -p 8883 -c ca.pem --passwd-file users.passwd
//!
//! # Generate a passwd file with 1000 random users
//! mqtt-stresser gen-passwd --output rawtext.passwd --count 1000
//! ```
//!
//! The workspace crates do the heavy lifting:
//!
//! - `killswitch` - broadcast stop signal and drain tracking
//! - `stress-messages` - timestamped payload generation
//! - `broker-client` - MQTT and loopback broker clients
//! - `flooding` - connection ramp-up and the publish/subscribe workloads

pub mod config;
pub mod report;
pub mod stress;

pub use config::{StressArgs, StressConfig};
pub use report::{LatencySummary, OutputFormat, StressReport};
pub use stress::{build_factory, open_output, run_stress, write_report};
