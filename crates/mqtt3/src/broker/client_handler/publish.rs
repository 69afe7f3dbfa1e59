//! Publish handling and `QoS` flow control

use crate::packet::{Packet, PubAckPacket, PublishPacket};
use crate::qos2::{
    handle_incoming_publish_qos2, handle_incoming_pubrec, handle_incoming_pubrel,
    handle_outgoing_ack, QoS2Action,
};
use crate::validation::validate_topic_name;
use crate::{MqttError, QoS, Result};
use tracing::{debug, trace, warn};

use super::ClientHandler;

impl ClientHandler {
    pub(super) async fn handle_publish(&mut self, publish: PublishPacket) -> Result<()> {
        validate_topic_name(&publish.topic_name)?;

        debug!(
            client_id = ?self.client_id,
            topic = %publish.topic_name,
            qos = ?publish.qos,
            packet_id = ?publish.packet_id,
            "Received PUBLISH"
        );

        match publish.qos {
            QoS::AtMostOnce => {
                self.router.route_message(&publish);
            }
            QoS::AtLeastOnce => {
                let packet_id = Self::require_packet_id(&publish)?;
                self.router.route_message(&publish);
                self.transport
                    .write_packet(&Packet::PubAck(PubAckPacket::new(packet_id)))
                    .await?;
            }
            QoS::ExactlyOnce => {
                let packet_id = Self::require_packet_id(&publish)?;
                let session = self.current_session()?;
                let is_duplicate = session.lock().has_inbound(packet_id);
                if is_duplicate {
                    debug!(packet_id, "Retransmitted QoS 2 PUBLISH, keeping first copy");
                }

                let mut pending = Some(publish);
                for action in handle_incoming_publish_qos2(packet_id, is_duplicate) {
                    match action {
                        QoS2Action::StoreIncoming { packet_id } => {
                            if let Some(publish) = pending.take() {
                                session.lock().store_inbound(packet_id, publish);
                            }
                        }
                        QoS2Action::SendPubRec { .. } => {
                            if let Some(pubrec) = action.to_pubrec_packet() {
                                self.transport.write_packet(&Packet::PubRec(pubrec)).await?;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    pub(super) async fn handle_pubrel(&mut self, packet_id: u16) -> Result<()> {
        let session = self.current_session()?;
        let released = session.lock().take_inbound(packet_id);
        if released.is_none() {
            debug!(packet_id, "PUBREL for unknown packet id, completing anyway");
        }

        for action in handle_incoming_pubrel(packet_id, released.is_some()) {
            match action {
                QoS2Action::DeliverMessage { .. } => {
                    if let Some(publish) = released.as_ref() {
                        let delivered = self.router.route_message(publish);
                        trace!(packet_id, delivered, "Released QoS 2 message");
                    }
                }
                QoS2Action::SendPubComp { .. } => {
                    if let Some(pubcomp) = action.to_pubcomp_packet() {
                        self.transport
                            .write_packet(&Packet::PubComp(pubcomp))
                            .await?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(super) async fn handle_pubrec(&mut self, packet_id: u16) -> Result<()> {
        let session = self.current_session()?;
        let tracked = session.lock().is_outbound_tracked(packet_id);

        for action in handle_incoming_pubrec(packet_id, tracked) {
            match action {
                QoS2Action::SendPubRel { .. } => {
                    if let Some(pubrel) = action.to_pubrel_packet() {
                        self.transport.write_packet(&Packet::PubRel(pubrel)).await?;
                    }
                }
                QoS2Action::UnknownPacketId { packet_id } => {
                    warn!(
                        client_id = ?self.client_id,
                        packet_id,
                        "PUBREC for untracked packet id, ignoring"
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(super) fn handle_puback(&mut self, packet_id: u16) {
        self.complete_outgoing(packet_id, "PUBACK");
    }

    pub(super) fn handle_pubcomp(&mut self, packet_id: u16) {
        self.complete_outgoing(packet_id, "PUBCOMP");
    }

    fn complete_outgoing(&self, packet_id: u16, kind: &str) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        for action in handle_outgoing_ack(packet_id) {
            if let QoS2Action::RemoveOutgoing { packet_id } = action {
                if session.lock().complete_outbound(packet_id).is_none() {
                    debug!(packet_id, "{kind} for packet id not in flight");
                }
            }
        }
    }

    pub(super) async fn send_publish(&mut self, publish: PublishPacket) -> Result<()> {
        trace!(
            client_id = ?self.client_id,
            topic = %publish.topic_name,
            qos = ?publish.qos,
            packet_id = ?publish.packet_id,
            "Sending PUBLISH"
        );
        self.transport.write_packet(&Packet::Publish(publish)).await
    }

    fn require_packet_id(publish: &PublishPacket) -> Result<u16> {
        publish.packet_id.ok_or_else(|| {
            MqttError::MalformedPacket("QoS > 0 PUBLISH without packet identifier".to_string())
        })
    }
}
