//! Subscribe and unsubscribe handling

use crate::broker::registry::Subscription;
use crate::packet::{
    Packet, SubAckPacket, SubAckReturnCode, SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use crate::validation::validate_topic_filter;
use crate::Result;
use tracing::{debug, warn};

use super::ClientHandler;

impl ClientHandler {
    /// Every requested filter is granted at the requested `QoS`.
    pub(super) async fn handle_subscribe(&mut self, subscribe: SubscribePacket) -> Result<()> {
        let client_id = self.connected_client_id()?;
        let registry = self.router.registry();

        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        for filter in subscribe.filters {
            if let Err(e) = validate_topic_filter(&filter.filter) {
                warn!(
                    client_id = %client_id,
                    "Granting malformed topic filter, it will never match: {e}"
                );
            }
            return_codes.push(SubAckReturnCode::granted(filter.qos));
            registry.add_subscription(Subscription {
                client_id: client_id.clone(),
                topic_filter: filter.filter,
                qos: filter.qos,
            });
        }

        debug!(
            client_id = %client_id,
            packet_id = subscribe.packet_id,
            count = return_codes.len(),
            "Sending SUBACK"
        );
        self.transport
            .write_packet(&Packet::SubAck(SubAckPacket::new(
                subscribe.packet_id,
                return_codes,
            )))
            .await
    }

    pub(super) async fn handle_unsubscribe(&mut self, unsubscribe: UnsubscribePacket) -> Result<()> {
        let client_id = self.connected_client_id()?;
        let registry = self.router.registry();

        for filter in &unsubscribe.filters {
            if !registry.remove_subscription(filter, &client_id) {
                debug!(client_id = %client_id, filter = %filter, "No subscription to remove");
            }
        }

        self.transport
            .write_packet(&Packet::UnsubAck(UnsubAckPacket::new(
                unsubscribe.packet_id,
            )))
            .await
    }
}
