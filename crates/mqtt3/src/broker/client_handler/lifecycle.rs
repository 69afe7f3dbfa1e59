//! Client lifecycle management - disconnect, ping and assigned identifiers

use crate::packet::Packet;
use crate::{MqttError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::ClientHandler;

static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Builds an identifier for a 3.1.1 client that connected without one.
///
/// The millisecond timestamp keeps identifiers distinct across restarts; the
/// counter keeps them distinct within one process.
pub fn generate_client_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let n = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("mqtt3-{millis}-{n}")
}

impl ClientHandler {
    pub(super) fn handle_disconnect(&mut self) -> Result<()> {
        debug!(client_id = ?self.client_id, "Received DISCONNECT");
        Err(MqttError::ClientClosed)
    }

    pub(super) async fn handle_pingreq(&mut self) -> Result<()> {
        self.transport.write_packet(&Packet::PingResp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_client_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.starts_with("mqtt3-")));
    }
}
