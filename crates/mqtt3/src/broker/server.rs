//! TCP accept loop and broker lifecycle

use crate::broker::auth::{create_auth_provider, AuthProvider};
use crate::broker::client_handler::ClientHandler;
use crate::broker::config::BrokerConfig;
use crate::broker::registry::SessionRegistry;
use crate::broker::router::MessageRouter;
use crate::broker::transport::BrokerTransport;
use crate::{MqttError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct AcceptLoopState {
    config: Arc<BrokerConfig>,
    router: Arc<MessageRouter>,
    auth_provider: Arc<dyn AuthProvider>,
    shutdown_tx: broadcast::Sender<()>,
    open_connections: Arc<AtomicUsize>,
    next_connection_id: Arc<AtomicU64>,
}

impl AcceptLoopState {
    fn accept(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let open = self.open_connections.fetch_add(1, Ordering::AcqRel);
        if open >= self.config.max_clients {
            self.open_connections.fetch_sub(1, Ordering::AcqRel);
            warn!(
                "Connection rejected from {}: max_clients ({}) reached",
                addr, self.config.max_clients
            );
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %addr, "Failed to set TCP_NODELAY: {e}");
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let handler = ClientHandler::new(
            BrokerTransport::new(stream, self.config.max_packet_size),
            addr,
            Arc::clone(&self.config),
            Arc::clone(&self.router),
            Arc::clone(&self.auth_provider),
            self.shutdown_tx.subscribe(),
            connection_id,
        );

        let open_connections = Arc::clone(&self.open_connections);
        tokio::spawn(async move {
            if let Err(e) = handler.run().await {
                if e.is_normal_disconnect() {
                    debug!("Client handler finished");
                } else {
                    warn!("Client handler error: {e}");
                }
            }
            open_connections.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// MQTT 3.1 / 3.1.1 broker
pub struct MqttBroker {
    config: Arc<BrokerConfig>,
    router: Arc<MessageRouter>,
    auth_provider: Arc<dyn AuthProvider>,
    listeners: Vec<TcpListener>,
    local_addrs: Vec<SocketAddr>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MqttBroker {
    /// Creates a broker with default settings listening on `addr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or binding fails
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        let addr = addr
            .as_ref()
            .parse::<SocketAddr>()
            .map_err(|e| MqttError::Configuration(format!("Invalid address: {e}")))?;

        Self::with_config(BrokerConfig::default().with_bind_address(addr)).await
    }

    /// Creates a new broker with custom configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid, the credential store
    /// cannot be loaded, or no address can be bound
    pub async fn with_config(config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let mut listeners = Vec::with_capacity(config.bind_addresses.len());
        let mut failures = Vec::new();
        for addr in &config.bind_addresses {
            match TcpListener::bind(addr).await {
                Ok(listener) => listeners.push(listener),
                Err(e) => {
                    warn!("Failed to bind TCP listener on {addr}: {e}");
                    failures.push(format!("{addr}: {e}"));
                }
            }
        }
        if listeners.is_empty() {
            return Err(MqttError::Configuration(format!(
                "Failed to bind any TCP address: {}",
                failures.join(", ")
            )));
        }

        let local_addrs = listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect();

        let auth_provider = create_auth_provider(&config.authentication).await?;
        let router = Arc::new(MessageRouter::new(Arc::new(SessionRegistry::new())));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config),
            router,
            auth_provider,
            listeners,
            local_addrs,
            shutdown_tx,
        })
    }

    /// Replaces the credential provider built from the configuration
    #[must_use]
    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = provider;
        self
    }

    /// Runs the broker until [`MqttBroker::shutdown`] is called.
    ///
    /// Accepts incoming connections and spawns one handler task for each.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker is already running
    pub async fn run(&mut self) -> Result<()> {
        if self.listeners.is_empty() {
            return Err(MqttError::InvalidState(
                "Broker already running".to_string(),
            ));
        }
        let listeners = std::mem::take(&mut self.listeners);

        let state = AcceptLoopState {
            config: Arc::clone(&self.config),
            router: Arc::clone(&self.router),
            auth_provider: Arc::clone(&self.auth_provider),
            shutdown_tx: self.shutdown_tx.clone(),
            open_connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            "Starting TCP accept tasks for {} listeners",
            listeners.len()
        );
        let mut task_handles = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let state = state.clone();
            let mut shutdown_rx_tcp = state.shutdown_tx.subscribe();

            task_handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accept_result = listener.accept() => {
                            match accept_result {
                                Ok((stream, addr)) => {
                                    debug!(addr = %addr, "New TCP connection");
                                    state.accept(stream, addr);
                                }
                                Err(e) => {
                                    error!("TCP accept error: {e}");
                                }
                            }
                        }
                        _ = shutdown_rx_tcp.recv() => {
                            debug!("TCP accept task shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        info!("Broker ready - accepting connections");

        shutdown_rx.recv().await.ok();
        info!("Broker shutting down");

        for handle in task_handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Signals the accept loop and every connection task to stop
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is listening for the signal
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .map(|_| ())
            .map_err(|_| MqttError::InvalidState("No receivers for shutdown signal".to_string()))
    }

    /// A handle that can stop the broker after it has been moved into a task
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addrs.first().copied()
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(self.router.registry())
    }

    /// Connections that completed CONNECT and are currently live
    #[must_use]
    pub fn active_connection_count(&self) -> usize {
        self.router.registry().active_connection_count()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.router.registry().session_count()
    }
}

/// Cloneable trigger for [`MqttBroker::shutdown`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Returns `false` if the broker had already stopped.
    pub fn shutdown(&self) -> bool {
        self.shutdown_tx.send(()).is_ok()
    }
}
