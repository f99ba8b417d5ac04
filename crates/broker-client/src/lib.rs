//! Broker clients for mqtt-stresser
//!
//! This crate defines the [`BrokerClient`] capability the load generators
//! drive, and two implementations of it:
//!
//! - [`MqttClient`]: a real MQTT connection over TCP or TLS, built on rumqttc;
//! - [`MemoryClient`]: a connection to an in-process [`MemoryBroker`].
//!
//! It also carries the credential helpers used to authenticate connection
//! pairs and to generate passwd files for brokers under test.

pub mod client;
pub mod credentials;
pub mod error;
pub mod memory;
pub mod mqtt;
pub mod qos;
pub mod tls;

pub use client::{BrokerClient, ClientFactory, Role, SUBSCRIPTION_BUFFER};
pub use credentials::{
    random_password, random_topic, random_username, write_passwd, write_passwd_file,
    CredentialPool, Credentials,
};
pub use error::{BrokerError, Result};
pub use memory::{MemoryBroker, MemoryClient};
pub use mqtt::{MqttClient, MqttClientFactory, MqttConnectOptions};
pub use qos::Qos;
pub use tls::TlsSettings;
