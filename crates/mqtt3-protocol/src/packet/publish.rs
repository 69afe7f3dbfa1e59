use crate::encoding::{decode_string, encode_string, string_len};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;
use bytes::{Buf, BufMut, Bytes};

/// PUBLISH packet. `packet_id` is present iff `qos` is above `AtMostOnce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic_name: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl PublishPacket {
    #[must_use]
    pub fn new(topic_name: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic_name: topic_name.into(),
            packet_id: None,
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
        }
    }

    #[must_use]
    pub fn with_packet_id(mut self, packet_id: u16) -> Self {
        self.packet_id = Some(packet_id);
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }
}

impl MqttPacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        let mut flags = u8::from(self.qos) << 1;
        if self.dup {
            flags |= 0x08;
        }
        if self.retain {
            flags |= 0x01;
        }
        flags
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, &self.topic_name)?;

        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.ok_or_else(|| {
                MqttError::ProtocolError("PUBLISH with QoS > 0 needs a packet identifier".into())
            })?;
            buf.put_u16(packet_id);
        }

        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        let qos = fixed_header.qos()?;
        let remaining = fixed_header.remaining_length as usize;

        let topic_name = decode_string(buf)?;
        let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
        let payload_len = remaining
            .checked_sub(string_len(&topic_name) + id_len)
            .ok_or_else(|| {
                MqttError::MalformedPacket(format!(
                    "PUBLISH remaining length {remaining} shorter than its variable header"
                ))
            })?;

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            if buf.remaining() < 2 {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH missing packet identifier".to_string(),
                ));
            }
            Some(buf.get_u16())
        };

        if buf.remaining() < payload_len {
            return Err(MqttError::MalformedPacket(format!(
                "PUBLISH payload truncated: expected {payload_len} bytes, have {}",
                buf.remaining()
            )));
        }
        let payload = buf.copy_to_bytes(payload_len);

        Ok(Self {
            topic_name,
            packet_id,
            payload,
            qos,
            retain: fixed_header.retain(),
            dup: fixed_header.dup(),
        })
    }
}
