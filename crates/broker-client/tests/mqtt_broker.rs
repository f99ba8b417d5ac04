//! Round trips against a real broker.
//!
//! These tests need an MQTT broker accepting anonymous connections on
//! localhost:1883 and are ignored by default:
//!
//! ```sh
//! docker run --rm -p 1883:1883 eclipse-mosquitto:2 mosquitto -c /mosquitto-no-auth.conf
//! cargo test -p broker-client -- --ignored
//! ```

use std::time::Duration;

use broker_client::{random_topic, BrokerClient, MqttClient, MqttConnectOptions, Qos};
use stress_messages::{extract_timestamp, generate_message};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn local_client(id: &str) -> MqttClient {
    MqttClient::new(id, &MqttConnectOptions::new("localhost", 1883), None)
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_connect_and_disconnect() {
    let client = local_client(&format!("stresser-it-{}", random_topic("")));
    client.connect(CONNECT_TIMEOUT).await.unwrap();
    assert!(client.is_connected());

    client.disconnect().await;
    assert!(!client.is_connected());
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_timestamp_survives_broker() {
    let topic = random_topic("test/");
    let publisher = local_client(&format!("stresser-it-pub-{}", &topic[5..15]));
    let subscriber = local_client(&format!("stresser-it-sub-{}", &topic[5..15]));
    publisher.connect(CONNECT_TIMEOUT).await.unwrap();
    subscriber.connect(CONNECT_TIMEOUT).await.unwrap();

    let mut feed = subscriber.subscribe(&topic, Qos::AtLeastOnce).await.unwrap();

    let sent = generate_message(128);
    publisher
        .publish(&topic, Qos::AtLeastOnce, sent.clone())
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("message should arrive")
        .expect("feed should stay open");
    assert_eq!(received, sent);
    assert_eq!(extract_timestamp(&received), extract_timestamp(&sent));

    publisher.disconnect().await;
    subscriber.disconnect().await;
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_publish_right_after_subscribe_is_delivered() {
    let topic = random_topic("test/");
    let publisher = local_client(&format!("stresser-it-pub-{}", &topic[5..15]));
    let subscriber = local_client(&format!("stresser-it-sub-{}", &topic[5..15]));
    publisher.connect(CONNECT_TIMEOUT).await.unwrap();
    subscriber.connect(CONNECT_TIMEOUT).await.unwrap();

    // No pause: the subscription is in place once `subscribe` returns.
    let mut feed = subscriber.subscribe(&topic, Qos::AtMostOnce).await.unwrap();
    let sent = generate_message(32);
    publisher
        .publish(&topic, Qos::AtMostOnce, sent.clone())
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("first message should arrive")
        .expect("feed should stay open");
    assert_eq!(received, sent);

    publisher.disconnect().await;
    subscriber.disconnect().await;
}
