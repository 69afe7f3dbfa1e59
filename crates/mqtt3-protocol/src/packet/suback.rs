use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::QoS;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAckReturnCode {
    GrantedQoS0 = 0x00,
    GrantedQoS1 = 0x01,
    GrantedQoS2 = 0x02,
    Failure = 0x80,
}

impl SubAckReturnCode {
    #[must_use]
    pub fn granted(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::GrantedQoS0,
            QoS::AtLeastOnce => Self::GrantedQoS1,
            QoS::ExactlyOnce => Self::GrantedQoS2,
        }
    }

    #[must_use]
    pub fn granted_qos(self) -> Option<QoS> {
        match self {
            Self::GrantedQoS0 => Some(QoS::AtMostOnce),
            Self::GrantedQoS1 => Some(QoS::AtLeastOnce),
            Self::GrantedQoS2 => Some(QoS::ExactlyOnce),
            Self::Failure => None,
        }
    }
}

impl TryFrom<u8> for SubAckReturnCode {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::GrantedQoS0),
            0x01 => Ok(Self::GrantedQoS1),
            0x02 => Ok(Self::GrantedQoS2),
            0x80 => Ok(Self::Failure),
            _ => Err(MqttError::InvalidReturnCode(value)),
        }
    }
}

/// SUBACK packet. `return_codes` is index-aligned with the SUBSCRIBE filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub return_codes: Vec<SubAckReturnCode>,
}

impl SubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16, return_codes: Vec<SubAckReturnCode>) -> Self {
        Self {
            packet_id,
            return_codes,
        }
    }
}

impl MqttPacket for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        for code in &self.return_codes {
            buf.put_u8(*code as u8);
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err("SUBACK missing packet identifier".into());
        }
        let packet_id = buf.get_u16();

        let mut return_codes = Vec::with_capacity(buf.remaining());
        while buf.has_remaining() {
            return_codes.push(SubAckReturnCode::try_from(buf.get_u8())?);
        }

        Ok(Self {
            packet_id,
            return_codes,
        })
    }
}
