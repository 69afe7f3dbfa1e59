//! Packet framing over a connection's byte stream

use crate::packet::Packet;
use crate::{MqttError, Result};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Any bidirectional byte stream a client can be served over.
pub trait ConnectionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConnectionStream for T {}

/// Buffers one connection's inbound bytes until whole packets are available
/// and encodes outbound packets onto the stream.
pub struct BrokerTransport {
    stream: Box<dyn ConnectionStream>,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    max_packet_size: usize,
}

impl BrokerTransport {
    pub fn new(stream: impl ConnectionStream + 'static, max_packet_size: usize) -> Self {
        Self {
            stream: Box::new(stream),
            read_buffer: BytesMut::with_capacity(4096),
            write_buffer: BytesMut::with_capacity(4096),
            max_packet_size,
        }
    }

    /// Reads the next complete packet.
    ///
    /// Cancel safe: bytes already received stay buffered, so this can be
    /// raced in `tokio::select!` without losing data.
    pub async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) =
                Packet::decode_with_limit(&mut self.read_buffer, self.max_packet_size)?
            {
                return Ok(packet);
            }

            if self.read_buffer.capacity() - self.read_buffer.len() < 1024 {
                self.read_buffer.reserve(4096);
            }
            let n = self.stream.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                return Err(MqttError::ConnectionClosedByPeer);
            }
        }
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.write_buffer.clear();
        packet.encode(&mut self.write_buffer)?;
        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PubAckPacket, PublishPacket};
    use crate::QoS;

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = BrokerTransport::new(client, 1024);
        let mut server = BrokerTransport::new(server, 1024);

        let publish = Packet::Publish(
            PublishPacket::new("a/b", &b"payload"[..], QoS::AtLeastOnce).with_packet_id(3),
        );
        client.write_packet(&publish).await.unwrap();
        client
            .write_packet(&Packet::PubAck(PubAckPacket::new(3)))
            .await
            .unwrap();

        assert_eq!(server.read_packet().await.unwrap(), publish);
        assert_eq!(
            server.read_packet().await.unwrap(),
            Packet::PubAck(PubAckPacket::new(3))
        );
    }

    #[tokio::test]
    async fn test_split_writes_reassembled() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut server = BrokerTransport::new(server, 1024);

        let mut encoded = BytesMut::new();
        Packet::Publish(PublishPacket::new("x", vec![7u8; 40], QoS::AtMostOnce))
            .encode(&mut encoded)
            .unwrap();

        let writer = tokio::spawn(async move {
            for chunk in encoded.chunks(5) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            client
        });

        match server.read_packet().await.unwrap() {
            Packet::Publish(p) => assert_eq!(p.payload.len(), 40),
            other => panic!("unexpected packet {other:?}"),
        }
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_is_closed_by_peer() {
        let (client, server) = tokio::io::duplex(64);
        let mut server = BrokerTransport::new(server, 1024);
        drop(client);

        let err = server.read_packet().await.unwrap_err();
        assert!(matches!(err, MqttError::ConnectionClosedByPeer));
        assert!(err.is_normal_disconnect());
    }

    #[tokio::test]
    async fn test_oversized_packet_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut server = BrokerTransport::new(server, 16);

        client.write_all(&[0x30, 0x80, 0x01]).await.unwrap();
        assert!(matches!(
            server.read_packet().await,
            Err(MqttError::PacketTooLarge { size: 128, max: 16 })
        ));
    }
}
