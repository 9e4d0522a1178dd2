use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Default WebSocket endpoint for the multi-device gateway.
pub const DEFAULT_WS_URL: &str = "wss://web.whatsapp.com/ws/chat";

/// Origin header the gateway expects.
pub const DEFAULT_ORIGIN: &str = "https://web.whatsapp.com";

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Close code for a clean shutdown.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Close code for an error shutdown.
pub const CLOSE_CODE_ERROR: u16 = 1011;

/// Events a transport implementation delivers to the connection manager,
/// serialized over a single channel. Message boundaries are not assumed to
/// align with frame boundaries.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The underlying channel is connected.
    Open,
    /// A binary payload arrived.
    Message(Bytes),
    /// The channel failed.
    Error(String),
    /// The channel closed.
    Close { code: u16, reason: String },
}

/// Duplex byte channel consumed by the connection manager. Implementations
/// deliver their [`TransportEvent`]s through the channel handed over at
/// construction time.
#[async_trait]
pub trait Transport: Send {
    /// Opens the channel; `Open` is delivered once connected.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Writes one binary payload.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Closes the channel with a code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}
