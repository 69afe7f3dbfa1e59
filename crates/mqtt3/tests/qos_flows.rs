//! Publish routing and the `QoS` 0/1/2 handshakes end to end.

mod common;

use common::{unique_client_id, RawMqttClient, TestBroker, TIMEOUT};
use mqtt3::packet::{
    Packet, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, PublishPacket,
    UnsubscribePacket,
};
use mqtt3::QoS;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(200);

async fn expect_publish(client: &mut RawMqttClient) -> PublishPacket {
    match client.recv(TIMEOUT).await {
        Some(Packet::Publish(publish)) => publish,
        other => panic!("expected PUBLISH, got {other:?}"),
    }
}

#[tokio::test]
async fn qos1_publish_reaches_subscriber_once() {
    let broker = TestBroker::start().await;
    let addr = broker.socket_addr();
    let mut subscriber = RawMqttClient::connected(addr, &unique_client_id("sub")).await;
    let mut publisher = RawMqttClient::connected(addr, &unique_client_id("pub")).await;

    subscriber.subscribe(1, "topic/x", QoS::AtLeastOnce).await;

    publisher
        .send(&Packet::Publish(
            PublishPacket::new("topic/x", &b"hello"[..], QoS::AtLeastOnce).with_packet_id(10),
        ))
        .await;
    assert_eq!(
        publisher.recv(TIMEOUT).await,
        Some(Packet::PubAck(PubAckPacket::new(10)))
    );
    assert!(publisher.expect_silence(QUIET).await);

    let delivered = expect_publish(&mut subscriber).await;
    assert_eq!(delivered.topic_name, "topic/x");
    assert_eq!(&delivered.payload[..], b"hello");
    assert!(delivered.qos <= QoS::AtLeastOnce);
    let packet_id = delivered.packet_id.unwrap();
    assert_ne!(packet_id, 0);

    subscriber
        .send(&Packet::PubAck(PubAckPacket::new(packet_id)))
        .await;
    assert!(subscriber.expect_silence(QUIET).await);
}

#[tokio::test]
async fn qos2_publish_is_released_exactly_once() {
    let broker = TestBroker::start().await;
    let addr = broker.socket_addr();
    let mut subscriber = RawMqttClient::connected(addr, &unique_client_id("sub")).await;
    let mut publisher = RawMqttClient::connected(addr, &unique_client_id("pub")).await;

    subscriber.subscribe(1, "exact/once", QoS::ExactlyOnce).await;

    let publish = PublishPacket::new("exact/once", &b"payload"[..], QoS::ExactlyOnce)
        .with_packet_id(5);
    publisher.send(&Packet::Publish(publish.clone())).await;
    assert_eq!(
        publisher.recv(TIMEOUT).await,
        Some(Packet::PubRec(PubRecPacket::new(5)))
    );

    publisher
        .send(&Packet::Publish(publish.with_dup(true)))
        .await;
    assert_eq!(
        publisher.recv(TIMEOUT).await,
        Some(Packet::PubRec(PubRecPacket::new(5)))
    );
    assert!(
        subscriber.expect_silence(QUIET).await,
        "nothing is delivered before PUBREL"
    );

    publisher
        .send(&Packet::PubRel(PubRelPacket::new(5)))
        .await;
    assert_eq!(
        publisher.recv(TIMEOUT).await,
        Some(Packet::PubComp(PubCompPacket::new(5)))
    );

    let delivered = expect_publish(&mut subscriber).await;
    assert_eq!(delivered.qos, QoS::ExactlyOnce);
    assert!(!delivered.dup);
    let outbound_id = delivered.packet_id.unwrap();

    subscriber
        .send(&Packet::PubRec(PubRecPacket::new(outbound_id)))
        .await;
    assert_eq!(
        subscriber.recv(TIMEOUT).await,
        Some(Packet::PubRel(PubRelPacket::new(outbound_id)))
    );
    subscriber
        .send(&Packet::PubComp(PubCompPacket::new(outbound_id)))
        .await;

    publisher
        .send(&Packet::PubRel(PubRelPacket::new(5)))
        .await;
    assert_eq!(
        publisher.recv(TIMEOUT).await,
        Some(Packet::PubComp(PubCompPacket::new(5)))
    );
    assert!(
        subscriber.expect_silence(QUIET).await,
        "a repeated PUBREL must not deliver again"
    );
}

#[tokio::test]
async fn delivery_qos_is_minimum_of_publish_and_subscription() {
    let broker = TestBroker::start().await;
    let addr = broker.socket_addr();
    let mut subscriber = RawMqttClient::connected(addr, &unique_client_id("sub")).await;
    let mut publisher = RawMqttClient::connected(addr, &unique_client_id("pub")).await;

    subscriber.subscribe(1, "down/grade", QoS::AtMostOnce).await;
    publisher
        .send(&Packet::Publish(
            PublishPacket::new("down/grade", &b"x"[..], QoS::AtLeastOnce).with_packet_id(3),
        ))
        .await;
    assert_eq!(
        publisher.recv(TIMEOUT).await,
        Some(Packet::PubAck(PubAckPacket::new(3)))
    );

    let delivered = expect_publish(&mut subscriber).await;
    assert_eq!(delivered.qos, QoS::AtMostOnce);
    assert_eq!(delivered.packet_id, None);
}

#[tokio::test]
async fn wildcard_subscriptions_receive_matching_topics() {
    let broker = TestBroker::start().await;
    let addr = broker.socket_addr();
    let mut plus = RawMqttClient::connected(addr, &unique_client_id("plus")).await;
    let mut hash = RawMqttClient::connected(addr, &unique_client_id("hash")).await;
    let mut publisher = RawMqttClient::connected(addr, &unique_client_id("pub")).await;

    plus.subscribe(1, "sensors/+/temp", QoS::AtMostOnce).await;
    hash.subscribe(1, "sensors/#", QoS::AtMostOnce).await;

    for topic in ["sensors/room1/temp", "sensors/room1/sub/temp", "sensors"] {
        publisher
            .send(&Packet::Publish(PublishPacket::new(
                topic,
                &b"21"[..],
                QoS::AtMostOnce,
            )))
            .await;
    }

    assert_eq!(expect_publish(&mut plus).await.topic_name, "sensors/room1/temp");
    assert!(plus.expect_silence(QUIET).await);

    let mut topics = Vec::new();
    for _ in 0..3 {
        topics.push(expect_publish(&mut hash).await.topic_name);
    }
    assert_eq!(
        topics,
        vec!["sensors/room1/temp", "sensors/room1/sub/temp", "sensors"]
    );
}

#[tokio::test]
async fn overlapping_subscriptions_deliver_one_copy() {
    let broker = TestBroker::start().await;
    let addr = broker.socket_addr();
    let mut subscriber = RawMqttClient::connected(addr, &unique_client_id("overlap")).await;
    let mut publisher = RawMqttClient::connected(addr, &unique_client_id("pub")).await;

    subscriber.subscribe(1, "sensors/room1/temp", QoS::AtMostOnce).await;
    subscriber.subscribe(2, "sensors/#", QoS::AtMostOnce).await;

    publisher
        .send(&Packet::Publish(PublishPacket::new(
            "sensors/room1/temp",
            &b"21"[..],
            QoS::AtMostOnce,
        )))
        .await;

    assert_eq!(
        expect_publish(&mut subscriber).await.topic_name,
        "sensors/room1/temp"
    );
    assert!(subscriber.expect_silence(QUIET).await);
}

#[tokio::test]
async fn system_topics_are_hidden_from_leading_wildcards() {
    let broker = TestBroker::start().await;
    let addr = broker.socket_addr();
    let mut everything = RawMqttClient::connected(addr, &unique_client_id("all")).await;
    let mut system = RawMqttClient::connected(addr, &unique_client_id("sys")).await;
    let mut publisher = RawMqttClient::connected(addr, &unique_client_id("pub")).await;

    everything.subscribe(1, "#", QoS::AtMostOnce).await;
    system.subscribe(1, "$SYS/#", QoS::AtMostOnce).await;

    publisher
        .send(&Packet::Publish(PublishPacket::new(
            "$SYS/uptime",
            &b"1"[..],
            QoS::AtMostOnce,
        )))
        .await;

    assert_eq!(expect_publish(&mut system).await.topic_name, "$SYS/uptime");
    assert!(everything.expect_silence(QUIET).await);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let broker = TestBroker::start().await;
    let addr = broker.socket_addr();
    let mut subscriber = RawMqttClient::connected(addr, &unique_client_id("sub")).await;
    let mut publisher = RawMqttClient::connected(addr, &unique_client_id("pub")).await;

    subscriber.subscribe(1, "news", QoS::AtMostOnce).await;
    subscriber
        .send(&Packet::Unsubscribe(UnsubscribePacket::new(2).add_filter("news")))
        .await;
    match subscriber.recv(TIMEOUT).await {
        Some(Packet::UnsubAck(unsuback)) => assert_eq!(unsuback.packet_id, 2),
        other => panic!("expected UNSUBACK, got {other:?}"),
    }
    assert_eq!(broker.registry().topic_filter_count(), 0);

    publisher
        .send(&Packet::Publish(PublishPacket::new(
            "news",
            &b"late"[..],
            QoS::AtMostOnce,
        )))
        .await;
    assert!(subscriber.expect_silence(QUIET).await);
}

#[tokio::test]
async fn clean_disconnect_removes_subscriptions() {
    let broker = TestBroker::start().await;
    let client_id = unique_client_id("transient");
    let mut subscriber = RawMqttClient::connected(broker.socket_addr(), &client_id).await;

    subscriber.subscribe(1, "a/#", QoS::AtLeastOnce).await;
    assert_eq!(broker.registry().subscriptions_for(&client_id).len(), 1);

    subscriber.send(&Packet::Disconnect).await;
    assert!(subscriber.expect_disconnect(TIMEOUT).await);
    assert!(broker.wait_for_sessions(0).await);
    assert!(broker.registry().subscriptions_for(&client_id).is_empty());
}

#[tokio::test]
async fn repeated_puback_for_unknown_id_is_tolerated() {
    let broker = TestBroker::start().await;
    let mut client = RawMqttClient::connected(broker.socket_addr(), "acker").await;

    client.send(&Packet::PubAck(PubAckPacket::new(99))).await;
    client.send(&Packet::PubAck(PubAckPacket::new(99))).await;
    client.send(&Packet::PubComp(PubCompPacket::new(99))).await;
    client.send(&Packet::PingReq).await;
    assert_eq!(client.recv(TIMEOUT).await, Some(Packet::PingResp));
}

#[tokio::test]
async fn pubrec_for_untracked_id_is_ignored() {
    let broker = TestBroker::start().await;
    let mut client = RawMqttClient::connected(broker.socket_addr(), "stray-pubrec").await;

    client.send(&Packet::PubRec(PubRecPacket::new(42))).await;
    client.send(&Packet::PingReq).await;
    assert_eq!(client.recv(TIMEOUT).await, Some(Packet::PingResp));
}

#[tokio::test]
async fn publish_to_wildcard_topic_closes_publisher() {
    let broker = TestBroker::start().await;
    let mut client = RawMqttClient::connected(broker.socket_addr(), "bad-topic").await;

    client
        .send(&Packet::Publish(PublishPacket::new(
            "a/+/b",
            &b"x"[..],
            QoS::AtMostOnce,
        )))
        .await;
    assert!(client.expect_disconnect(TIMEOUT).await);
}
