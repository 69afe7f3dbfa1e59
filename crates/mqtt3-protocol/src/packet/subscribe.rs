use crate::encoding::{decode_string, encode_string};
use crate::error::Result;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::QoS;
use bytes::{Buf, BufMut};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub qos: QoS,
}

impl TopicFilter {
    #[must_use]
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<TopicFilter>,
}

impl SubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>, qos: QoS) -> Self {
        self.filters.push(TopicFilter::new(filter, qos));
        self
    }
}

impl MqttPacket for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            encode_string(buf, &filter.filter)?;
            buf.put_u8(u8::from(filter.qos));
        }
        Ok(())
    }

    /// Entries are read while at least three bytes remain; a shorter tail
    /// ends the list instead of failing the packet.
    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err("SUBSCRIBE missing packet identifier".into());
        }
        let packet_id = buf.get_u16();

        let mut filters = Vec::new();
        while buf.remaining() >= 3 {
            let filter = decode_string(buf)?;
            if !buf.has_remaining() {
                return Err("SUBSCRIBE entry missing requested QoS".into());
            }
            let qos = QoS::try_from(buf.get_u8() & 0x03)?;
            filters.push(TopicFilter { filter, qos });
        }
        if buf.has_remaining() {
            trace!(
                packet_id,
                trailing = buf.remaining(),
                "Ignoring partial SUBSCRIBE entry"
            );
            buf.advance(buf.remaining());
        }

        Ok(Self { packet_id, filters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MqttError;
    use bytes::BytesMut;

    #[test]
    fn test_subscribe_encode_decode() {
        let packet = SubscribePacket::new(10)
            .add_filter("sensors/+/temp", QoS::AtLeastOnce)
            .add_filter("alerts/#", QoS::ExactlyOnce);

        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x82);

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = SubscribePacket::decode_body(&mut buf, &fixed_header).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.filters[1].filter, "alerts/#");
    }

    #[test]
    fn test_subscribe_trailing_partial_entry_ignored() {
        let mut body = BytesMut::new();
        body.put_u16(3);
        encode_string(&mut body, "a").unwrap();
        body.put_u8(1);
        body.put_slice(&[0x00, 0x05]);

        let header = FixedHeader::new(PacketType::Subscribe, 0x02, body.len() as u32);
        let decoded = SubscribePacket::decode_body(&mut body, &header).unwrap();
        assert_eq!(decoded.filters, vec![TopicFilter::new("a", QoS::AtLeastOnce)]);
        assert!(body.is_empty());
    }

    #[test]
    fn test_subscribe_zero_flags_accepted() {
        let mut body = BytesMut::new();
        body.put_u16(1);
        encode_string(&mut body, "x").unwrap();
        body.put_u8(0);

        let header = FixedHeader::new(PacketType::Subscribe, 0x00, body.len() as u32);
        assert!(SubscribePacket::decode_body(&mut body, &header).is_ok());
    }

    #[test]
    fn test_subscribe_invalid_qos() {
        let mut body = BytesMut::new();
        body.put_u16(1);
        encode_string(&mut body, "x").unwrap();
        body.put_u8(3);

        let header = FixedHeader::new(PacketType::Subscribe, 0x02, body.len() as u32);
        assert!(matches!(
            SubscribePacket::decode_body(&mut body, &header),
            Err(MqttError::InvalidQoS(3))
        ));
    }

    #[test]
    fn test_subscribe_missing_packet_id() {
        let mut body = BytesMut::from(&[0x00][..]);
        let header = FixedHeader::new(PacketType::Subscribe, 0x02, 1);
        assert!(SubscribePacket::decode_body(&mut body, &header).is_err());
    }
}
