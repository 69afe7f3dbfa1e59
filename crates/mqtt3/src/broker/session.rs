//! Per-client session state

use crate::packet::PublishPacket;
use crate::packet_id::PacketIdGenerator;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub type SharedSession = Arc<Mutex<Session>>;

/// Broker-side state for one client identifier.
///
/// A non-clean session outlives its connection together with both in-flight
/// tables.
#[derive(Debug)]
pub struct Session {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    /// Inbound `QoS` 2 publishes waiting for PUBREL
    inbound: HashMap<u16, PublishPacket>,
    /// Outbound `QoS` 1/2 publishes waiting for PUBACK or PUBCOMP
    outbound: HashMap<u16, PublishPacket>,
    packet_ids: PacketIdGenerator,
}

impl Session {
    #[must_use]
    pub fn new(client_id: impl Into<String>, clean_session: bool, keep_alive: u16) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session,
            keep_alive,
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            packet_ids: PacketIdGenerator::new(),
        }
    }

    #[must_use]
    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn next_packet_id(&self) -> u16 {
        self.packet_ids.next_id()
    }

    /// Stores an inbound `QoS` 2 publish. A retransmission keeps the first
    /// copy and returns `false`.
    pub fn store_inbound(&mut self, packet_id: u16, publish: PublishPacket) -> bool {
        match self.inbound.entry(packet_id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(publish);
                true
            }
        }
    }

    pub fn has_inbound(&self, packet_id: u16) -> bool {
        self.inbound.contains_key(&packet_id)
    }

    pub fn take_inbound(&mut self, packet_id: u16) -> Option<PublishPacket> {
        self.inbound.remove(&packet_id)
    }

    pub fn track_outbound(&mut self, packet_id: u16, publish: PublishPacket) {
        self.outbound.insert(packet_id, publish);
    }

    pub fn is_outbound_tracked(&self, packet_id: u16) -> bool {
        self.outbound.contains_key(&packet_id)
    }

    pub fn complete_outbound(&mut self, packet_id: u16) -> Option<PublishPacket> {
        self.outbound.remove(&packet_id)
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}
