//! MQTT 3.1.1 control packets.
//!
//! Every packet type implements [`MqttPacket`], which encodes and decodes
//! the variable header and payload. [`FixedHeader`] owns the first byte and
//! the remaining length, and [`Packet`] is the sum over all fourteen kinds.

pub mod ack;
pub mod connack;
pub mod connect;
pub mod publish;
pub mod suback;
pub mod subscribe;
pub mod unsubscribe;

use crate::encoding::{encode_variable_int, peek_variable_int, variable_int_len};
use crate::error::{MqttError, Result};
use crate::types::QoS;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use ack::{PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, UnsubAckPacket};
pub use connack::{ConnAckPacket, ConnectReturnCode};
pub use connect::{ConnectPacket, LastWill};
pub use publish::PublishPacket;
pub use suback::{SubAckPacket, SubAckReturnCode};
pub use subscribe::{SubscribePacket, TopicFilter};
pub use unsubscribe::UnsubscribePacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(MqttError::InvalidPacketType(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// Low nibble of the first byte: dup (0x08), `QoS` (0x06), retain (0x01)
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    #[must_use]
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: u32) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    #[must_use]
    pub fn dup(&self) -> bool {
        self.flags & 0x08 != 0
    }

    pub fn qos(&self) -> Result<QoS> {
        QoS::try_from((self.flags & 0x06) >> 1)
    }

    #[must_use]
    pub fn retain(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(((self.packet_type as u8) << 4) | (self.flags & 0x0F));
        encode_variable_int(buf, self.remaining_length)
    }

    /// Decodes a fixed header from a buffer that must already hold it.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "Missing fixed header".to_string(),
            ));
        }
        let first = buf.chunk();
        let Some((header, consumed)) = Self::parse(first)? else {
            return Err(MqttError::MalformedPacket(
                "Incomplete fixed header".to_string(),
            ));
        };
        buf.advance(consumed);
        Ok(header)
    }

    /// Parses a fixed header at the start of `bytes` without consuming.
    ///
    /// Returns `Ok(None)` when the remaining length is still incomplete.
    pub fn parse(bytes: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&first) = bytes.first() else {
            return Ok(None);
        };
        let packet_type = PacketType::try_from(first >> 4)?;
        let Some((remaining_length, len)) = peek_variable_int(&bytes[1..])? else {
            return Ok(None);
        };
        Ok(Some((
            Self::new(packet_type, first & 0x0F, remaining_length),
            1 + len,
        )))
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + variable_int_len(self.remaining_length)
    }
}

pub trait MqttPacket: Sized {
    fn packet_type(&self) -> PacketType;

    fn flags(&self) -> u8 {
        0
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()>;

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self>;

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;

        let remaining_length = u32::try_from(body.len()).map_err(|_| MqttError::PacketTooLarge {
            size: body.len(),
            max: crate::encoding::VARIABLE_INT_MAX as usize,
        })?;
        FixedHeader::new(self.packet_type(), self.flags(), remaining_length).encode(buf)?;
        buf.put_slice(&body);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Box<ConnectPacket>),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Packet::Connect(p) => p.encode(buf),
            Packet::ConnAck(p) => p.encode(buf),
            Packet::Publish(p) => p.encode(buf),
            Packet::PubAck(p) => p.encode(buf),
            Packet::PubRec(p) => p.encode(buf),
            Packet::PubRel(p) => p.encode(buf),
            Packet::PubComp(p) => p.encode(buf),
            Packet::Subscribe(p) => p.encode(buf),
            Packet::SubAck(p) => p.encode(buf),
            Packet::Unsubscribe(p) => p.encode(buf),
            Packet::UnsubAck(p) => p.encode(buf),
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {
                FixedHeader::new(self.packet_type(), 0, 0).encode(buf)
            }
        }
    }

    /// Decodes a body whose fixed header has already been read. `buf` must
    /// hold exactly `remaining_length` bytes.
    pub fn decode_from_body<B: Buf>(fixed_header: &FixedHeader, buf: &mut B) -> Result<Self> {
        match fixed_header.packet_type {
            PacketType::Connect => Ok(Packet::Connect(Box::new(ConnectPacket::decode_body(
                buf,
                fixed_header,
            )?))),
            PacketType::ConnAck => Ok(Packet::ConnAck(ConnAckPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::Publish => Ok(Packet::Publish(PublishPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::PubAck => Ok(Packet::PubAck(PubAckPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::PubRec => Ok(Packet::PubRec(PubRecPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::PubRel => Ok(Packet::PubRel(PubRelPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::PubComp => Ok(Packet::PubComp(PubCompPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::Subscribe => Ok(Packet::Subscribe(SubscribePacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::SubAck => Ok(Packet::SubAck(SubAckPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::Unsubscribe => Ok(Packet::Unsubscribe(UnsubscribePacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::UnsubAck => Ok(Packet::UnsubAck(UnsubAckPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::PingReq => Ok(Packet::PingReq),
            PacketType::PingResp => Ok(Packet::PingResp),
            PacketType::Disconnect => Ok(Packet::Disconnect),
        }
    }

    /// Decodes one packet from the front of a stream buffer.
    ///
    /// Returns `Ok(None)` without consuming anything while the buffer does
    /// not yet hold a whole packet. On success exactly one packet's bytes are
    /// removed from `buf`.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        Self::decode_with_limit(buf, crate::encoding::VARIABLE_INT_MAX as usize)
    }

    /// Like [`Packet::decode`], rejecting packets whose remaining length
    /// exceeds `max_size` before their body is buffered.
    pub fn decode_with_limit(buf: &mut BytesMut, max_size: usize) -> Result<Option<Self>> {
        let Some((fixed_header, header_len)) = FixedHeader::parse(buf)? else {
            return Ok(None);
        };

        let body_len = fixed_header.remaining_length as usize;
        if body_len > max_size {
            return Err(MqttError::PacketTooLarge {
                size: body_len,
                max: max_size,
            });
        }

        let total = header_len + body_len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(header_len);
        let mut body: Bytes = buf.split_to(body_len).freeze();
        Self::decode_from_body(&fixed_header, &mut body).map(Some)
    }
}
