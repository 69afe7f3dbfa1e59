//! Broker-side `QoS` 2 handshake decisions.
//!
//! Each function maps an inbound event plus the relevant in-flight lookup to
//! the ordered list of actions the connection must carry out. No state is
//! kept here; the session tables own it.

use crate::packet::{PubCompPacket, PubRecPacket, PubRelPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS2Action {
    /// Keep the inbound PUBLISH until its PUBREL arrives
    StoreIncoming { packet_id: u16 },
    /// Route the released inbound PUBLISH to subscribers
    DeliverMessage { packet_id: u16 },
    SendPubRec { packet_id: u16 },
    SendPubRel { packet_id: u16 },
    SendPubComp { packet_id: u16 },
    /// Drop an outbound message from the session's in-flight table
    RemoveOutgoing { packet_id: u16 },
    /// Acknowledgment for an identifier this session never sent
    UnknownPacketId { packet_id: u16 },
}

impl QoS2Action {
    #[must_use]
    pub fn to_pubrec_packet(&self) -> Option<PubRecPacket> {
        match self {
            QoS2Action::SendPubRec { packet_id } => Some(PubRecPacket::new(*packet_id)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_pubrel_packet(&self) -> Option<PubRelPacket> {
        match self {
            QoS2Action::SendPubRel { packet_id } => Some(PubRelPacket::new(*packet_id)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_pubcomp_packet(&self) -> Option<PubCompPacket> {
        match self {
            QoS2Action::SendPubComp { packet_id } => Some(PubCompPacket::new(*packet_id)),
            _ => None,
        }
    }
}

/// A retransmitted PUBLISH keeps the first stored copy.
#[must_use]
pub fn handle_incoming_publish_qos2(packet_id: u16, is_duplicate: bool) -> Vec<QoS2Action> {
    if is_duplicate {
        vec![QoS2Action::SendPubRec { packet_id }]
    } else {
        vec![
            QoS2Action::StoreIncoming { packet_id },
            QoS2Action::SendPubRec { packet_id },
        ]
    }
}

/// PUBCOMP is always sent so that a retransmitted PUBREL completes.
#[must_use]
pub fn handle_incoming_pubrel(packet_id: u16, was_pending: bool) -> Vec<QoS2Action> {
    if was_pending {
        vec![
            QoS2Action::DeliverMessage { packet_id },
            QoS2Action::SendPubComp { packet_id },
        ]
    } else {
        vec![QoS2Action::SendPubComp { packet_id }]
    }
}

#[must_use]
pub fn handle_incoming_pubrec(packet_id: u16, is_outgoing_tracked: bool) -> Vec<QoS2Action> {
    if is_outgoing_tracked {
        vec![QoS2Action::SendPubRel { packet_id }]
    } else {
        vec![QoS2Action::UnknownPacketId { packet_id }]
    }
}

/// Shared by PUBACK and PUBCOMP. Removing an absent identifier is a no-op.
#[must_use]
pub fn handle_outgoing_ack(packet_id: u16) -> Vec<QoS2Action> {
    vec![QoS2Action::RemoveOutgoing { packet_id }]
}
