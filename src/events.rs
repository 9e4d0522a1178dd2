use crate::binary::Node;
use crate::connection::ConnectionState;

/// Lifecycle position reported through `connection.update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Close,
}

/// Host-facing `connection.update` payload; only the changed fields are set.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionStatus>,
    pub qr: Option<String>,
    pub is_new_login: Option<bool>,
    pub error: Option<String>,
}

/// Events emitted by the connection manager and authenticator.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Pairing/login progress for the host UI.
    ConnectionUpdate(ConnectionUpdate),
    /// The Noise handshake finished and the transport keys are live.
    HandshakeComplete,
    /// Credentials changed and should be persisted.
    CredsUpdate,
    /// A stanza arrived.
    NodeReceived(Node),
    /// A stanza was written.
    NodeSent(Node),
    /// The connection state machine moved.
    StateChange {
        state: ConnectionState,
        error: Option<String>,
    },
    /// The transport closed.
    WsClose { code: u16, reason: String },
}

impl ConnectionUpdate {
    /// Update carrying only a QR payload.
    pub fn qr(qr: String) -> Self {
        Self {
            qr: Some(qr),
            ..Self::default()
        }
    }

    /// Update carrying only a status change.
    pub fn status(connection: ConnectionStatus) -> Self {
        Self {
            connection: Some(connection),
            ..Self::default()
        }
    }
}
