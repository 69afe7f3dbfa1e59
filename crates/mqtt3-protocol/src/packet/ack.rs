//! Acknowledgments that carry only a packet identifier.

use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use bytes::{Buf, BufMut};

macro_rules! define_ack_packet {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
        packet_type = $packet_type:expr;
        error_prefix = $prefix:literal;
        $(flags = $flags:expr;)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub packet_id: u16,
        }

        impl $name {
            #[must_use]
            pub fn new(packet_id: u16) -> Self {
                Self { packet_id }
            }
        }

        impl MqttPacket for $name {
            fn packet_type(&self) -> PacketType {
                $packet_type
            }

            $(
            fn flags(&self) -> u8 {
                $flags
            }
            )?

            fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
                buf.put_u16(self.packet_id);
                Ok(())
            }

            fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
                if buf.remaining() < 2 {
                    return Err(MqttError::MalformedPacket(format!(
                        "{} missing packet identifier",
                        $prefix
                    )));
                }
                Ok(Self {
                    packet_id: buf.get_u16(),
                })
            }
        }
    };
}

define_ack_packet! {
    /// `QoS` 1 publish acknowledgment
    pub struct PubAckPacket;
    packet_type = PacketType::PubAck;
    error_prefix = "PUBACK";
}

define_ack_packet! {
    /// `QoS` 2 publish received, first reply of the handshake
    pub struct PubRecPacket;
    packet_type = PacketType::PubRec;
    error_prefix = "PUBREC";
}

define_ack_packet! {
    /// `QoS` 2 publish release
    pub struct PubRelPacket;
    packet_type = PacketType::PubRel;
    error_prefix = "PUBREL";
    flags = 0x02;
}

define_ack_packet! {
    /// `QoS` 2 publish complete
    pub struct PubCompPacket;
    packet_type = PacketType::PubComp;
    error_prefix = "PUBCOMP";
}

define_ack_packet! {
    pub struct UnsubAckPacket;
    packet_type = PacketType::UnsubAck;
    error_prefix = "UNSUBACK";
}
