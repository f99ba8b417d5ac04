use std::time::Duration;

use broker_client::{BrokerClient, Qos};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared by both halves of a connection pair: where to send or listen,
/// and the client doing it. Owned by exactly one task.
pub struct Flooder {
    pub(crate) topic: String,
    pub(crate) qos: Qos,
    pub(crate) client: Box<dyn BrokerClient>,
}

impl Flooder {
    /// Wrap `client`, connecting it first unless it already is.
    pub(crate) async fn connect(
        client: Box<dyn BrokerClient>,
        qos: Qos,
        topic: String,
        connect_timeout: Duration,
    ) -> broker_client::Result<Self> {
        if !client.is_connected() {
            client.connect(connect_timeout).await?;
        }
        Ok(Self { topic, qos, client })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

impl std::fmt::Debug for Flooder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flooder")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("connected", &self.client.is_connected())
            .finish()
    }
}
