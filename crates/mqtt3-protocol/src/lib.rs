//! MQTT 3.1 / 3.1.1 protocol primitives.
//!
//! Sans-io building blocks shared by the broker: the packet codec, the
//! `QoS` 2 handshake decisions, topic validation and matching, and the
//! packet identifier generator.

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_lossless)]

pub mod encoding;
pub mod error;
pub mod packet;
pub mod packet_id;
pub mod qos2;
pub mod types;
pub mod validation;

pub use error::{MqttError, Result};
pub use packet::{FixedHeader, MqttPacket, Packet, PacketType};
pub use packet_id::PacketIdGenerator;
pub use types::{ProtocolVersion, QoS};
pub use validation::{
    is_valid_topic_filter, is_valid_topic_name, topic_matches_filter, validate_topic_filter,
    validate_topic_name,
};
