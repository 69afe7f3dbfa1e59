use crate::encoding::{decode_binary, decode_string, encode_binary, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::{ProtocolVersion, QoS};
use bytes::{Buf, BufMut, Bytes};

const FLAG_RESERVED: u8 = 0x01;
const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_WILL_QOS_MASK: u8 = 0x18;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Will message announced in CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub message: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl LastWill {
    #[must_use]
    pub fn new(topic: impl Into<String>, message: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// CONNECT packet.
///
/// `protocol_version` keeps the raw byte from the wire so that a broker can
/// answer an unknown level with the proper CONNACK. For such versions only
/// the variable header is decoded and the payload is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_name: String,
    pub protocol_version: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl ConnectPacket {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_version(ProtocolVersion::V311, client_id)
    }

    #[must_use]
    pub fn with_version(version: ProtocolVersion, client_id: impl Into<String>) -> Self {
        Self {
            protocol_name: version.protocol_name().to_string(),
            protocol_version: version.as_u8(),
            clean_session: true,
            keep_alive: 60,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: u16) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Bytes>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: LastWill) -> Self {
        self.will = Some(will);
        self
    }

    /// Known version, or `None` for a level this codec does not speak.
    #[must_use]
    pub fn version(&self) -> Option<ProtocolVersion> {
        ProtocolVersion::try_from(self.protocol_version).ok()
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }
        if let Some(will) = &self.will {
            flags |= FLAG_WILL;
            flags |= u8::from(will.qos) << 3;
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        flags
    }
}

impl MqttPacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, &self.protocol_name)?;
        buf.put_u8(self.protocol_version);
        buf.put_u8(self.connect_flags());
        buf.put_u16(self.keep_alive);

        encode_string(buf, &self.client_id)?;
        if let Some(will) = &self.will {
            encode_string(buf, &will.topic)?;
            encode_binary(buf, &will.message)?;
        }
        if let Some(username) = &self.username {
            encode_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            encode_binary(buf, password)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        let protocol_name = decode_string(buf)?;
        if buf.remaining() < 4 {
            return Err(MqttError::MalformedPacket(
                "CONNECT variable header truncated".to_string(),
            ));
        }
        let protocol_version = buf.get_u8();
        let flags = buf.get_u8();
        let keep_alive = buf.get_u16();
        let clean_session = flags & FLAG_CLEAN_SESSION != 0;

        if ProtocolVersion::try_from(protocol_version).is_err() {
            buf.advance(buf.remaining());
            return Ok(Self {
                protocol_name,
                protocol_version,
                clean_session,
                keep_alive,
                client_id: String::new(),
                will: None,
                username: None,
                password: None,
            });
        }

        if flags & FLAG_RESERVED != 0 {
            return Err(MqttError::MalformedPacket(
                "CONNECT reserved flag must be zero".to_string(),
            ));
        }

        let client_id = decode_string(buf)?;

        let will = if flags & FLAG_WILL != 0 {
            let qos = QoS::try_from((flags & FLAG_WILL_QOS_MASK) >> 3)?;
            let topic = decode_string(buf)?;
            let message = decode_binary(buf)?;
            Some(LastWill {
                topic,
                message,
                qos,
                retain: flags & FLAG_WILL_RETAIN != 0,
            })
        } else {
            if flags & (FLAG_WILL_QOS_MASK | FLAG_WILL_RETAIN) != 0 {
                return Err(MqttError::MalformedPacket(
                    "Will QoS and retain must be zero without a will".to_string(),
                ));
            }
            None
        };

        let username = if flags & FLAG_USERNAME != 0 {
            Some(decode_string(buf)?)
        } else {
            None
        };
        let password = if flags & FLAG_PASSWORD != 0 {
            Some(decode_binary(buf)?)
        } else {
            None
        };

        Ok(Self {
            protocol_name,
            protocol_version,
            clean_session,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }
}
