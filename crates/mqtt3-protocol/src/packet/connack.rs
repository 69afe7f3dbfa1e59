use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use bytes::{Buf, BufMut};

/// CONNACK return codes defined by MQTT 3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    #[must_use]
    pub fn is_success(self) -> bool {
        self == ConnectReturnCode::Accepted
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::UnacceptableProtocolVersion),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::BadUsernameOrPassword),
            5 => Ok(Self::NotAuthorized),
            _ => Err(MqttError::InvalidReturnCode(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    #[must_use]
    pub fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        Self {
            session_present,
            return_code,
        }
    }

    /// Rejection never reports a present session.
    #[must_use]
    pub fn rejected(return_code: ConnectReturnCode) -> Self {
        Self::new(false, return_code)
    }
}

impl MqttPacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(u8::from(self.session_present));
        buf.put_u8(self.return_code as u8);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::MalformedPacket(
                "CONNACK body must be 2 bytes".to_string(),
            ));
        }
        let ack_flags = buf.get_u8();
        let return_code = ConnectReturnCode::try_from(buf.get_u8())?;
        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            return_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_connack_wire_format() {
        let mut buf = BytesMut::new();
        ConnAckPacket::new(true, ConnectReturnCode::Accepted)
            .encode(&mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[0x20, 0x02, 0x01, 0x00]);

        let mut buf = BytesMut::new();
        ConnAckPacket::rejected(ConnectReturnCode::BadUsernameOrPassword)
            .encode(&mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[0x20, 0x02, 0x00, 0x04]);
    }

    #[test]
    fn test_connack_decode() {
        let mut buf = BytesMut::from(&[0x00, 0x01][..]);
        let header = FixedHeader::new(PacketType::ConnAck, 0, 2);
        let packet = ConnAckPacket::decode_body(&mut buf, &header).unwrap();
        assert!(!packet.session_present);
        assert_eq!(
            packet.return_code,
            ConnectReturnCode::UnacceptableProtocolVersion
        );
        assert!(!packet.return_code.is_success());
    }

    #[test]
    fn test_connack_invalid_return_code() {
        let mut buf = BytesMut::from(&[0x00, 0x06][..]);
        let header = FixedHeader::new(PacketType::ConnAck, 0, 2);
        assert!(matches!(
            ConnAckPacket::decode_body(&mut buf, &header),
            Err(MqttError::InvalidReturnCode(6))
        ));
    }

    #[test]
    fn test_connack_truncated() {
        let mut buf = BytesMut::from(&[0x00][..]);
        let header = FixedHeader::new(PacketType::ConnAck, 0, 1);
        assert!(ConnAckPacket::decode_body(&mut buf, &header).is_err());
    }
}
