//! Client connection handler for the MQTT broker

mod connect;
mod lifecycle;
mod publish;
mod subscribe;

pub use lifecycle::generate_client_id;

use crate::broker::auth::AuthProvider;
use crate::broker::config::BrokerConfig;
use crate::broker::router::MessageRouter;
use crate::broker::session::SharedSession;
use crate::broker::transport::BrokerTransport;
use crate::packet::{Packet, PublishPacket};
use crate::{MqttError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Drives one client connection from CONNECT to close.
pub struct ClientHandler {
    pub(super) transport: BrokerTransport,
    pub(super) client_addr: SocketAddr,
    pub(super) config: Arc<BrokerConfig>,
    pub(super) router: Arc<MessageRouter>,
    pub(super) auth_provider: Arc<dyn AuthProvider>,
    pub(super) shutdown_rx: broadcast::Receiver<()>,
    pub(super) connection_id: u64,
    /// Set once this connection is the registered live channel
    pub(super) client_id: Option<String>,
    pub(super) session: Option<SharedSession>,
    pub(super) publish_tx: flume::Sender<PublishPacket>,
    pub(super) publish_rx: flume::Receiver<PublishPacket>,
    pub(super) disconnect_tx: Option<oneshot::Sender<()>>,
}

impl ClientHandler {
    pub fn new(
        transport: BrokerTransport,
        client_addr: SocketAddr,
        config: Arc<BrokerConfig>,
        router: Arc<MessageRouter>,
        auth_provider: Arc<dyn AuthProvider>,
        shutdown_rx: broadcast::Receiver<()>,
        connection_id: u64,
    ) -> Self {
        let (publish_tx, publish_rx) = flume::bounded(config.client_channel_capacity);
        Self {
            transport,
            client_addr,
            config,
            router,
            auth_provider,
            shutdown_rx,
            connection_id,
            client_id: None,
            session: None,
            publish_tx,
            publish_rx,
            disconnect_tx: None,
        }
    }

    /// Runs the connection until the client leaves, misbehaves, goes idle,
    /// is taken over, or the broker shuts down.
    ///
    /// # Errors
    ///
    /// Returns the error that closed the connection. Graceful closes report
    /// an error for which [`MqttError::is_normal_disconnect`] is true, or `Ok`.
    pub async fn run(mut self) -> Result<()> {
        debug!(
            addr = %self.client_addr,
            connection_id = self.connection_id,
            "Client handler started"
        );

        let (disconnect_tx, mut disconnect_rx) = oneshot::channel();
        self.disconnect_tx = Some(disconnect_tx);

        match timeout(self.config.connect_timeout, self.wait_for_connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if e.is_normal_disconnect() {
                    debug!(addr = %self.client_addr, "Client disconnected during connect phase: {e}");
                } else {
                    warn!(addr = %self.client_addr, "Connect error: {e}");
                }
                self.cleanup(false);
                return Err(e);
            }
            Err(_) => {
                warn!("Connect timeout from {}", self.client_addr);
                self.cleanup(false);
                return Err(MqttError::Timeout);
            }
        }

        let client_id = self.connected_client_id()?;
        info!(client_id = %client_id, addr = %self.client_addr, "Client connected");

        let result = self.handle_packets(&mut disconnect_rx).await;
        let taken_over = matches!(result, Ok(true));
        self.cleanup(taken_over);

        info!("Client {} disconnected", client_id);
        result.map(|_| ())
    }

    async fn wait_for_connect(&mut self) -> Result<()> {
        match self.transport.read_packet().await? {
            Packet::Connect(connect) => self.handle_connect(*connect).await,
            other => Err(MqttError::ProtocolError(format!(
                "Expected CONNECT packet, received {:?}",
                other.packet_type()
            ))),
        }
    }

    /// Returns `Ok(true)` when another connection took over the client id.
    async fn handle_packets(&mut self, disconnect_rx: &mut oneshot::Receiver<()>) -> Result<bool> {
        let idle_timeout = self.config.idle_timeout;
        let idle = sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                packet_result = self.transport.read_packet() => {
                    match packet_result {
                        Ok(packet) => {
                            idle.as_mut().reset(Instant::now() + idle_timeout);
                            self.handle_packet(packet).await?;
                        }
                        Err(e) if e.is_normal_disconnect() => {
                            debug!("Client disconnected");
                            return Ok(false);
                        }
                        Err(e) => {
                            return Err(e);
                        }
                    }
                }

                publish_result = self.publish_rx.recv_async() => {
                    if let Ok(publish) = publish_result {
                        self.send_publish(publish).await?;
                        while let Ok(more) = self.publish_rx.try_recv() {
                            self.send_publish(more).await?;
                        }
                    } else {
                        warn!("Publish channel closed unexpectedly");
                        return Ok(false);
                    }
                }

                () = &mut idle => {
                    warn!(
                        client_id = ?self.client_id,
                        timeout = ?idle_timeout,
                        "Idle timeout, closing connection"
                    );
                    return Err(MqttError::KeepAliveTimeout);
                }

                _ = &mut *disconnect_rx => {
                    info!("Session taken over by another client");
                    return Ok(true);
                }

                _ = self.shutdown_rx.recv() => {
                    debug!("Shutdown signal received");
                    return Ok(false);
                }
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Connect(_) => Err(MqttError::ProtocolError("Duplicate CONNECT".to_string())),
            Packet::Subscribe(subscribe) => self.handle_subscribe(subscribe).await,
            Packet::Unsubscribe(unsubscribe) => self.handle_unsubscribe(unsubscribe).await,
            Packet::Publish(publish) => self.handle_publish(publish).await,
            Packet::PubAck(puback) => {
                self.handle_puback(puback.packet_id);
                Ok(())
            }
            Packet::PubRec(pubrec) => self.handle_pubrec(pubrec.packet_id).await,
            Packet::PubRel(pubrel) => self.handle_pubrel(pubrel.packet_id).await,
            Packet::PubComp(pubcomp) => {
                self.handle_pubcomp(pubcomp.packet_id);
                Ok(())
            }
            Packet::PingReq => self.handle_pingreq().await,
            Packet::Disconnect => self.handle_disconnect(),
            other => Err(MqttError::ProtocolError(format!(
                "Unexpected {:?} packet from client",
                other.packet_type()
            ))),
        }
    }

    pub(super) fn connected_client_id(&self) -> Result<String> {
        self.client_id
            .clone()
            .ok_or_else(|| MqttError::InvalidState("client is not connected".to_string()))
    }

    pub(super) fn current_session(&self) -> Result<SharedSession> {
        self.session
            .clone()
            .ok_or_else(|| MqttError::InvalidState("no session for connection".to_string()))
    }

    /// Releases the live channel and drops a clean session. A stale handle
    /// left behind by a takeover never touches the newer connection's state.
    fn cleanup(&mut self, taken_over: bool) {
        let Some(client_id) = self.client_id.take() else {
            return;
        };
        let registry = self.router.registry();

        if taken_over {
            info!(
                "Skipping unregister for client {} (session taken over)",
                client_id
            );
        } else {
            registry.unregister_client(&client_id, self.connection_id);
        }

        if let Some(session) = self.session.take() {
            let clean_session = session.lock().clean_session;
            if clean_session {
                registry.close_session(&client_id, &session);
            }
        }
    }
}
