//! MQTT broker
//!
//! A `MqttBroker` binds one or more TCP listeners and spawns a
//! [`ClientHandler`] task per connection. All tasks share one
//! [`SessionRegistry`] through the [`MessageRouter`].
//!
//! ```rust,no_run
//! use mqtt3::broker::{BrokerConfig, MqttBroker};
//!
//! # async fn example() -> mqtt3::Result<()> {
//! let config = BrokerConfig::default()
//!     .with_bind_address(([127, 0, 0, 1], 1883))
//!     .with_max_clients(500);
//!
//! let mut broker = MqttBroker::with_config(config).await?;
//! let stop = broker.shutdown_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     stop.shutdown();
//! });
//! broker.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client_handler;
pub mod config;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

pub use auth::{AllowAllAuthProvider, AuthProvider, PasswordAuthProvider};
pub use client_handler::ClientHandler;
pub use config::{AuthConfig, BrokerConfig, UserCredential};
pub use registry::{SessionRegistry, Subscription};
pub use router::MessageRouter;
pub use server::{MqttBroker, ShutdownHandle};
pub use session::{Session, SharedSession};
pub use transport::{BrokerTransport, ConnectionStream};
