//! Shared helpers for broker integration tests.
//!
//! [`TestBroker`] runs a real broker on a random loopback port and
//! [`RawMqttClient`] talks to it at the byte level, encoding and decoding
//! packets with the crate's own codec.

#![allow(dead_code, clippy::missing_panics_doc)]

use bytes::{BufMut, BytesMut};
use mqtt3::broker::{BrokerConfig, MqttBroker, SessionRegistry, ShutdownHandle};
use mqtt3::packet::{ConnAckPacket, ConnectPacket, Packet, SubscribePacket};
use mqtt3::QoS;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(3);

/// An in-process broker on `127.0.0.1:0`, stopped when dropped.
pub struct TestBroker {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: ShutdownHandle,
    handle: Option<JoinHandle<()>>,
}

impl TestBroker {
    pub async fn start() -> Self {
        Self::start_with_config(BrokerConfig::default()).await
    }

    pub async fn start_with_config(config: BrokerConfig) -> Self {
        let config = config.with_bind_address("127.0.0.1:0".parse::<SocketAddr>().unwrap());
        let mut broker = MqttBroker::with_config(config).await.unwrap();
        let addr = broker.local_addr().unwrap();
        let registry = broker.registry();
        let shutdown = broker.shutdown_handle();

        let handle = tokio::spawn(async move {
            let _ = broker.run().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            registry,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Polls until the registry reports `expected` live connections.
    pub async fn wait_for_connections(&self, expected: usize) -> bool {
        for _ in 0..100 {
            if self.registry.active_connection_count() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Polls until the registry holds `expected` sessions.
    pub async fn wait_for_sessions(&self, expected: usize) -> bool {
        for _ in 0..100 {
            if self.registry.session_count() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub async fn stop(&mut self) {
        self.shutdown.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(TIMEOUT, handle).await;
        }
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub fn unique_client_id(prefix: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!("{prefix}-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// A TCP client that writes encoded packets or raw bytes and decodes
/// whatever the broker sends back.
pub struct RawMqttClient {
    stream: TcpStream,
    read_buffer: BytesMut,
}

impl RawMqttClient {
    pub async fn connect_tcp(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            read_buffer: BytesMut::with_capacity(4096),
        })
    }

    /// Opens a connection and completes a clean-session CONNECT.
    pub async fn connected(addr: SocketAddr, client_id: &str) -> Self {
        let mut client = Self::connect_tcp(addr).await.unwrap();
        let connack = client.handshake(ConnectPacket::new(client_id)).await;
        assert!(connack.return_code.is_success(), "CONNECT refused: {connack:?}");
        client
    }

    pub async fn send_raw(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data).await
    }

    pub async fn send(&mut self, packet: &Packet) {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        self.send_raw(&buf).await.unwrap();
    }

    pub async fn handshake(&mut self, connect: ConnectPacket) -> ConnAckPacket {
        self.send(&Packet::Connect(Box::new(connect))).await;
        match self.recv(TIMEOUT).await {
            Some(Packet::ConnAck(connack)) => connack,
            other => panic!("expected CONNACK, got {other:?}"),
        }
    }

    pub async fn subscribe(&mut self, packet_id: u16, filter: &str, qos: QoS) {
        self.send(&Packet::Subscribe(
            SubscribePacket::new(packet_id).add_filter(filter, qos),
        ))
        .await;
        match self.recv(TIMEOUT).await {
            Some(Packet::SubAck(suback)) => assert_eq!(suback.packet_id, packet_id),
            other => panic!("expected SUBACK, got {other:?}"),
        }
    }

    /// Next decoded packet, or `None` on timeout, close, or a decode error.
    pub async fn recv(&mut self, timeout_dur: Duration) -> Option<Packet> {
        tokio::time::timeout(timeout_dur, async {
            loop {
                match Packet::decode(&mut self.read_buffer) {
                    Ok(Some(packet)) => return Some(packet),
                    Ok(None) => {}
                    Err(_) => return None,
                }
                match self.stream.read_buf(&mut self.read_buffer).await {
                    Ok(0) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// `true` once the broker closes the connection without sending anything
    /// further.
    pub async fn expect_disconnect(&mut self, timeout_dur: Duration) -> bool {
        if !self.read_buffer.is_empty() {
            return false;
        }
        let mut buf = [0u8; 1024];
        matches!(
            tokio::time::timeout(timeout_dur, self.stream.read(&mut buf)).await,
            Ok(Ok(0) | Err(_))
        )
    }

    /// `true` if nothing arrives and the connection stays open.
    pub async fn expect_silence(&mut self, quiet: Duration) -> bool {
        if !self.read_buffer.is_empty() {
            return false;
        }
        tokio::time::timeout(quiet, self.stream.read_buf(&mut self.read_buffer))
            .await
            .is_err()
    }
}

/// Hand-built packets the typed codec will not produce.
pub struct RawPacketBuilder;

impl RawPacketBuilder {
    pub fn connect_with_protocol(name: &str, version: u8, client_id: &str) -> Vec<u8> {
        let mut body = BytesMut::new();
        put_string(&mut body, name);
        body.put_u8(version);
        body.put_u8(0x02);
        body.put_u16(60);
        put_string(&mut body, client_id);
        wrap_fixed_header(0x10, &body)
    }

    pub fn publish_qos0(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = BytesMut::new();
        put_string(&mut body, topic);
        body.put_slice(payload);
        wrap_fixed_header(0x30, &body)
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u16(u16::try_from(value.len()).unwrap());
    buf.put_slice(value.as_bytes());
}

fn wrap_fixed_header(first_byte: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![first_byte];
    let mut remaining = body.len();
    loop {
        let mut byte = u8::try_from(remaining % 128).unwrap();
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if remaining == 0 {
            break;
        }
    }
    out.extend_from_slice(body);
    out
}
