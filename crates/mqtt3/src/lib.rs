//! # MQTT 3.1 / 3.1.1 broker
//!
//! An async publish/subscribe broker for the MQTT 3.1 (`MQIsdp`) and 3.1.1
//! wire protocols, built on tokio.
//!
//! ## Architecture
//!
//! - [`mqtt3_protocol`] provides the packet codec and sans-io protocol rules
//! - [`broker::SessionRegistry`] owns sessions, live connections and the
//!   subscription index, shared by every connection task
//! - one [`broker::client_handler::ClientHandler`] task per TCP connection
//!   drives the CONNECT handshake and the `QoS` 0/1/2 flows
//! - [`broker::MessageRouter`] fans a publish out to all matching subscribers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtt3::broker::MqttBroker;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut broker = MqttBroker::bind("0.0.0.0:1883").await?;
//!     broker.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod broker;

pub use mqtt3_protocol::{
    encoding, packet, packet_id, qos2, types, validation, MqttError, ProtocolVersion, QoS, Result,
};
pub use mqtt3_protocol::{is_valid_topic_filter, is_valid_topic_name, topic_matches_filter};
