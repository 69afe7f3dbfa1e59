//! CONNECT handling: version and identifier checks, authentication and
//! session setup

use crate::packet::{ConnAckPacket, ConnectPacket, ConnectReturnCode, Packet};
use crate::{MqttError, ProtocolVersion, Result};
use tracing::{debug, info, warn};

use super::{generate_client_id, ClientHandler};

impl ClientHandler {
    pub(super) async fn handle_connect(&mut self, connect: ConnectPacket) -> Result<()> {
        debug!(
            client_id = %connect.client_id,
            addr = %self.client_addr,
            version = connect.protocol_version,
            clean_session = connect.clean_session,
            "Processing CONNECT packet"
        );

        let version = self.validate_protocol_version(&connect).await?;
        let client_id = Self::resolve_client_id(&connect, version)?;
        self.authenticate_client(&connect, &client_id).await?;

        let disconnect_tx = self
            .disconnect_tx
            .take()
            .ok_or_else(|| MqttError::InvalidState("connection already registered".to_string()))?;

        let registry = self.router.registry();
        registry.register_client(
            &client_id,
            self.connection_id,
            self.publish_tx.clone(),
            disconnect_tx,
        );
        let (session, resumed) =
            registry.open_session(&client_id, connect.clean_session, connect.keep_alive);
        self.client_id = Some(client_id.clone());
        self.session = Some(session);

        let session_present = !connect.clean_session && resumed;
        debug!(client_id = %client_id, session_present, "Sending CONNACK");
        self.transport
            .write_packet(&Packet::ConnAck(ConnAckPacket::new(
                session_present,
                ConnectReturnCode::Accepted,
            )))
            .await
    }

    async fn validate_protocol_version(
        &mut self,
        connect: &ConnectPacket,
    ) -> Result<ProtocolVersion> {
        let Some(version) = connect.version() else {
            info!(
                version = connect.protocol_version,
                addr = %self.client_addr,
                "Unsupported protocol version"
            );
            self.transport
                .write_packet(&Packet::ConnAck(ConnAckPacket::rejected(
                    ConnectReturnCode::UnacceptableProtocolVersion,
                )))
                .await?;
            return Err(MqttError::UnsupportedProtocolVersion);
        };

        if connect.protocol_name != version.protocol_name() {
            return Err(MqttError::ProtocolError(format!(
                "Protocol name {:?} does not match protocol level {}",
                connect.protocol_name, connect.protocol_version
            )));
        }

        Ok(version)
    }

    /// 3.1 requires an identifier; 3.1.1 lets the broker assign one.
    fn resolve_client_id(connect: &ConnectPacket, version: ProtocolVersion) -> Result<String> {
        if !connect.client_id.is_empty() {
            return Ok(connect.client_id.clone());
        }

        match version {
            ProtocolVersion::V31 => Err(MqttError::InvalidClientId(
                "empty client identifier is not allowed in MQTT 3.1".to_string(),
            )),
            ProtocolVersion::V311 => {
                let generated = generate_client_id();
                debug!(client_id = %generated, "Assigned client identifier");
                Ok(generated)
            }
        }
    }

    async fn authenticate_client(&mut self, connect: &ConnectPacket, client_id: &str) -> Result<()> {
        let outcome = match connect.username.as_deref() {
            Some(username) => {
                self.auth_provider
                    .authenticate(username, connect.password.as_deref())
                    .await
            }
            None => Ok(!self.config.authentication.enabled),
        };

        let return_code = match outcome {
            Ok(true) => return Ok(()),
            Ok(false) => ConnectReturnCode::BadUsernameOrPassword,
            Err(e) => {
                warn!(client_id = %client_id, "Authentication check failed: {e}");
                ConnectReturnCode::ServerUnavailable
            }
        };

        warn!(
            client_id = %client_id,
            username = ?connect.username,
            addr = %self.client_addr,
            "Authentication failed"
        );
        self.transport
            .write_packet(&Packet::ConnAck(ConnAckPacket::rejected(return_code)))
            .await?;
        Err(MqttError::AuthenticationFailed)
    }
}
