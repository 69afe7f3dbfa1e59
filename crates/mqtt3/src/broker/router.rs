//! Message routing for the MQTT broker
//!
//! Fans a publish out to every live subscriber whose filter matches.

use crate::broker::registry::{SessionRegistry, Subscription};
use crate::packet::PublishPacket;
use crate::QoS;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Message router for the broker
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Delivers one copy per matching client. Offline subscribers are
    /// skipped. Returns the number of copies handed to connection queues.
    pub fn route_message(&self, publish: &PublishPacket) -> usize {
        let subscribers = self.registry.get_subscribers(&publish.topic_name);
        if subscribers.is_empty() {
            trace!(topic = %publish.topic_name, "No subscribers");
            return 0;
        }

        let delivered = subscribers
            .iter()
            .filter(|sub| self.deliver_to_subscriber(sub, publish))
            .count();

        debug!(
            topic = %publish.topic_name,
            qos = ?publish.qos,
            matched = subscribers.len(),
            delivered,
            "Routed publish"
        );
        delivered
    }

    fn deliver_to_subscriber(&self, sub: &Subscription, publish: &PublishPacket) -> bool {
        let Some(sender) = self.registry.client_sender(&sub.client_id) else {
            trace!(client_id = %sub.client_id, "Subscriber offline, skipping");
            return false;
        };

        let effective_qos = publish.qos.min(sub.qos);
        let mut message = PublishPacket::new(
            publish.topic_name.clone(),
            publish.payload.clone(),
            effective_qos,
        )
        .with_retain(publish.retain);

        let mut tracked = None;
        if effective_qos != QoS::AtMostOnce {
            let Some(session) = self.registry.get_session(&sub.client_id) else {
                warn!(
                    client_id = %sub.client_id,
                    "Live subscriber without a session, dropping delivery"
                );
                return false;
            };
            {
                let mut guard = session.lock();
                let packet_id = guard.next_packet_id();
                message.packet_id = Some(packet_id);
                guard.track_outbound(packet_id, message.clone());
            }
            tracked = message.packet_id.map(|id| (session, id));
        }

        match sender.try_send(message) {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    client_id = %sub.client_id,
                    topic = %publish.topic_name,
                    "Channel send failed - message may be dropped"
                );
                if let Some((session, packet_id)) = tracked {
                    session.lock().complete_outbound(packet_id);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(registry: &SessionRegistry, client_id: &str) -> flume::Receiver<PublishPacket> {
        let (tx, rx) = flume::bounded(100);
        let (dtx, _drx) = tokio::sync::oneshot::channel();
        registry.register_client(client_id, 1, tx, dtx);
        registry.open_session(client_id, true, 60);
        rx
    }

    fn subscribe(registry: &SessionRegistry, client_id: &str, filter: &str, qos: QoS) {
        registry.add_subscription(Subscription {
            client_id: client_id.to_string(),
            topic_filter: filter.to_string(),
            qos,
        });
    }

    #[test]
    fn test_message_routing_downgrades_qos() {
        let registry = Arc::new(SessionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));
        let rx1 = setup(&registry, "client1");
        let rx2 = setup(&registry, "client2");
        subscribe(&registry, "client1", "test/+", QoS::AtLeastOnce);
        subscribe(&registry, "client2", "test/data", QoS::ExactlyOnce);

        let publish = PublishPacket::new("test/data", &b"hello"[..], QoS::ExactlyOnce)
            .with_packet_id(42)
            .with_dup(true);
        assert_eq!(router.route_message(&publish), 2);

        let msg1 = rx1.try_recv().unwrap();
        assert_eq!(msg1.topic_name, "test/data");
        assert_eq!(msg1.qos, QoS::AtLeastOnce);
        assert_eq!(msg1.packet_id, Some(1));
        assert!(!msg1.dup);

        let msg2 = rx2.try_recv().unwrap();
        assert_eq!(msg2.qos, QoS::ExactlyOnce);
        assert_eq!(msg2.packet_id, Some(1));

        let session = registry.get_session("client1").unwrap();
        assert!(session.lock().is_outbound_tracked(1));
    }

    #[test]
    fn test_qos0_not_tracked() {
        let registry = Arc::new(SessionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));
        let rx = setup(&registry, "c");
        subscribe(&registry, "c", "#", QoS::AtMostOnce);

        let publish = PublishPacket::new("a/b", &b"x"[..], QoS::ExactlyOnce)
            .with_packet_id(9)
            .with_retain(true);
        router.route_message(&publish);

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.qos, QoS::AtMostOnce);
        assert_eq!(msg.packet_id, None);
        assert!(msg.retain);
        assert_eq!(registry.get_session("c").unwrap().lock().outbound_len(), 0);
    }

    #[test]
    fn test_offline_subscriber_skipped() {
        let registry = Arc::new(SessionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));
        registry.open_session("gone", false, 60);
        subscribe(&registry, "gone", "t", QoS::AtLeastOnce);

        let publish = PublishPacket::new("t", &b"x"[..], QoS::AtLeastOnce).with_packet_id(1);
        assert_eq!(router.route_message(&publish), 0);
        assert_eq!(registry.get_session("gone").unwrap().lock().outbound_len(), 0);
    }

    #[test]
    fn test_overlapping_filters_deliver_once() {
        let registry = Arc::new(SessionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));
        let rx = setup(&registry, "c");
        subscribe(&registry, "c", "sensors/room1/temp", QoS::AtMostOnce);
        subscribe(&registry, "c", "sensors/#", QoS::AtLeastOnce);

        let publish =
            PublishPacket::new("sensors/room1/temp", &b"21"[..], QoS::ExactlyOnce).with_packet_id(4);
        assert_eq!(router.route_message(&publish), 1);
        assert_eq!(rx.len(), 1);

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.qos, QoS::AtLeastOnce);
        assert_eq!(registry.get_session("c").unwrap().lock().outbound_len(), 1);
    }

    #[test]
    fn test_full_queue_drops_message() {
        let registry = Arc::new(SessionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));
        let (tx, rx) = flume::bounded(1);
        let (dtx, _drx) = tokio::sync::oneshot::channel();
        registry.register_client("slow", 1, tx, dtx);
        registry.open_session("slow", true, 60);
        subscribe(&registry, "slow", "t", QoS::AtMostOnce);

        let publish = PublishPacket::new("t", &b"x"[..], QoS::AtMostOnce);
        assert_eq!(router.route_message(&publish), 1);
        assert_eq!(router.route_message(&publish), 0);
        assert_eq!(rx.len(), 1);
    }
}
