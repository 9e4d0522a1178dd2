use std::time::Duration;

use prost::Message;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::authenticator::{AuthAction, Authenticator};
use crate::binary::{self, Node};
use crate::error::{ConnectionError, HandshakeError, HandshakePhase, TransportError};
use crate::events::{ClientEvent, ConnectionStatus, ConnectionUpdate};
use crate::frame::FrameCodec;
use crate::handshake::{
    build_client_finish, build_client_hello, build_client_payload, process_server_hello,
};
use crate::keys::{KeyPair, generate_keypair};
use crate::noise::NoiseState;
use crate::proto::HandshakeMessage;
use crate::store::AuthStateProvider;
use crate::transport::{
    CLOSE_CODE_ERROR, CLOSE_CODE_NORMAL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE_INTERVAL,
    DEFAULT_ORIGIN, DEFAULT_WS_URL, Transport, TransportEvent,
};
use crate::version::WaVersion;

/// Grace window added to the keep-alive interval before the inbound stream
/// counts as starved.
const KEEP_ALIVE_GRACE: Duration = Duration::from_secs(5);

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub ws_url: String,
    pub origin: String,
    pub connect_timeout: Duration,
    /// Keep-alive ping interval; `None` disables the timer.
    pub keep_alive: Option<Duration>,
    pub version: WaVersion,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_owned(),
            origin: DEFAULT_ORIGIN.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive: Some(DEFAULT_KEEP_ALIVE_INTERVAL),
            version: WaVersion::pinned(),
        }
    }
}

/// Lifecycle position of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Handshaking,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

/// Commands accepted by the connection task.
#[derive(Debug)]
pub enum Command {
    SendNode(Node, oneshot::Sender<Result<(), ConnectionError>>),
    Close(oneshot::Sender<()>),
}

/// Cheap handle for callers to reach a running connection task.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    /// Sends a stanza; fails synchronously unless the connection is open.
    pub async fn send_node(&self, node: Node) -> Result<(), ConnectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::SendNode(node, reply_tx))
            .await
            .map_err(|_| ConnectionError::NotOpen("closed"))?;
        reply_rx
            .await
            .map_err(|_| ConnectionError::NotOpen("closed"))?
    }

    /// Requests a clean shutdown; idempotent, resolves once torn down.
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Close(reply_tx))
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

/// Owns the byte transport, drives the Noise handshake, dispatches frames
/// as stanzas and runs keep-alive. All callbacks are serialised onto the
/// single `run` task.
pub struct Connection<T: Transport> {
    config: ConnectionConfig,
    transport: T,
    transport_rx: Option<mpsc::Receiver<TransportEvent>>,
    command_rx: Option<mpsc::Receiver<Command>>,
    events: mpsc::Sender<ClientEvent>,
    auth: AuthStateProvider,
    authenticator: Authenticator,
    state: ConnectionState,
    noise: NoiseState,
    frames: FrameCodec,
    ephemeral: KeyPair,
    last_inbound: Instant,
    qr_deadline: Option<Instant>,
    tag_counter: u64,
}

impl<T: Transport> Connection<T> {
    /// Wires a connection over a transport whose events arrive on
    /// `transport_rx`. Returns the connection, its command handle and the
    /// client event stream.
    pub fn new(
        transport: T,
        transport_rx: mpsc::Receiver<TransportEvent>,
        auth: AuthStateProvider,
        config: ConnectionConfig,
    ) -> (Self, ConnectionHandle, mpsc::Receiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::channel(16);

        let ephemeral = generate_keypair();
        let noise = NoiseState::new(&ephemeral.public);
        let frames = FrameCodec::new(auth.creds.routing_info.as_deref());

        let connection = Self {
            config,
            transport,
            transport_rx: Some(transport_rx),
            command_rx: Some(command_rx),
            events: event_tx,
            auth,
            authenticator: Authenticator::new(),
            state: ConnectionState::Closed,
            noise,
            frames,
            ephemeral,
            last_inbound: Instant::now(),
            qr_deadline: None,
            tag_counter: 0,
        };

        let handle = ConnectionHandle {
            commands: command_tx,
        };
        (connection, handle, event_rx)
    }

    /// Drives the connection until it reaches `Closed`.
    pub async fn run(mut self) {
        let mut transport_rx = self
            .transport_rx
            .take()
            .expect("transport receiver consumed once");
        let mut command_rx = self
            .command_rx
            .take()
            .expect("command receiver consumed once");

        self.set_state(ConnectionState::Connecting, None).await;
        self.emit(ClientEvent::ConnectionUpdate(ConnectionUpdate::status(
            ConnectionStatus::Connecting,
        )))
        .await;

        let connected =
            tokio::time::timeout(self.config.connect_timeout, self.transport.connect()).await;
        match connected {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                self.teardown(Some(error.to_string())).await;
                return;
            }
            Err(_) => {
                let error = TransportError::ConnectTimeout(self.config.connect_timeout);
                self.teardown(Some(error.to_string())).await;
                return;
            }
        }

        let keep_alive_interval = self.config.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE_INTERVAL);
        let mut keep_alive = tokio::time::interval(keep_alive_interval);
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keep_alive.tick().await;

        loop {
            let qr_deadline = self.qr_deadline;
            let qr_wait = async move {
                match qr_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                maybe_event = transport_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.on_transport_event(event).await,
                        None => {
                            self.teardown(Some(TransportError::Closed.to_string())).await;
                        }
                    }
                }
                maybe_command = command_rx.recv() => {
                    match maybe_command {
                        Some(Command::SendNode(node, reply)) => {
                            let result = self.send_node(node).await;
                            let _ = reply.send(result);
                        }
                        Some(Command::Close(reply)) => {
                            self.close(None).await;
                            let _ = reply.send(());
                        }
                        None => self.close(None).await,
                    }
                }
                _ = qr_wait => {
                    self.qr_deadline = None;
                    let actions = self.authenticator.on_qr_timeout(&self.auth.creds);
                    self.apply_auth_actions(actions).await;
                }
                _ = keep_alive.tick(), if self.config.keep_alive.is_some()
                    && self.state == ConnectionState::Open =>
                {
                    self.on_keep_alive_tick(keep_alive_interval).await;
                }
            }

            if self.state == ConnectionState::Closed {
                break;
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                self.last_inbound = Instant::now();
                self.set_state(ConnectionState::Handshaking, None).await;
                self.authenticator.on_handshaking();
                if let Err(error) = self.send_client_hello().await {
                    self.teardown(Some(error.to_string())).await;
                }
            }
            TransportEvent::Message(bytes) => {
                self.last_inbound = Instant::now();
                let payloads = self.frames.decode(&mut self.noise, &bytes);
                for payload in payloads {
                    match self.state {
                        ConnectionState::Handshaking => {
                            if let Err(error) = self.on_handshake_payload(&payload).await {
                                self.teardown(Some(error.to_string())).await;
                                return;
                            }
                        }
                        ConnectionState::Open | ConnectionState::Closing => {
                            self.on_stanza_payload(&payload).await;
                        }
                        _ => {
                            tracing::debug!(
                                state = self.state.label(),
                                "dropping frame outside session"
                            );
                        }
                    }
                    if self.state == ConnectionState::Closed {
                        return;
                    }
                }
            }
            TransportEvent::Error(error) => {
                self.teardown(Some(error)).await;
            }
            TransportEvent::Close { code, reason } => {
                self.emit(ClientEvent::WsClose {
                    code,
                    reason: reason.clone(),
                })
                .await;
                self.cancel_timers();
                self.set_state(ConnectionState::Closed, None).await;
            }
        }
    }

    async fn send_client_hello(&mut self) -> Result<(), ConnectionError> {
        let hello = build_client_hello(self.ephemeral.public);
        let encoded = hello.encode_to_vec();
        let framed = self
            .frames
            .encode(&mut self.noise, &encoded)
            .map_err(HandshakeError::Frame)?;
        self.transport.send(&framed).await?;
        Ok(())
    }

    async fn on_handshake_payload(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        let message = HandshakeMessage::decode(payload).map_err(HandshakeError::Decode)?;
        if message.server_hello.is_none() {
            return Err(ConnectionError::Handshake(HandshakeError::with_phase(
                HandshakePhase::ServerHello,
                "unexpected handshake message",
            )));
        }

        let encrypted_static = process_server_hello(
            &mut self.noise,
            &message,
            &self.auth.creds.noise_key,
            &self.ephemeral,
        )?;
        let client_payload = build_client_payload(&self.auth.creds, self.config.version)?;
        let finish = build_client_finish(&mut self.noise, encrypted_static, &client_payload)?;

        let framed = self
            .frames
            .encode(&mut self.noise, &finish.encode_to_vec())
            .map_err(HandshakeError::Frame)?;
        self.transport.send(&framed).await?;

        // The session is considered open the moment our finish is written.
        self.noise.finalize().map_err(HandshakeError::Noise)?;
        self.set_state(ConnectionState::Open, None).await;
        self.emit(ClientEvent::HandshakeComplete).await;
        self.authenticator.on_open();
        Ok(())
    }

    async fn on_stanza_payload(&mut self, payload: &[u8]) {
        let node = match binary::decode(payload) {
            Ok(node) => node,
            Err(error) => {
                // Codec failures are per-frame; the session stays up.
                tracing::warn!(error = %error, len = payload.len(), "stanza decode failed");
                return;
            }
        };

        self.emit(ClientEvent::NodeReceived(node.clone())).await;

        match self.authenticator.handle_node(&node, &mut self.auth.creds) {
            Ok(actions) => self.apply_auth_actions(actions).await,
            Err(error) => {
                let message = error.to_string();
                self.emit(ClientEvent::ConnectionUpdate(ConnectionUpdate {
                    connection: Some(ConnectionStatus::Close),
                    error: Some(message.clone()),
                    ..ConnectionUpdate::default()
                }))
                .await;
                self.close(Some(message)).await;
            }
        }
    }

    async fn apply_auth_actions(&mut self, actions: Vec<AuthAction>) {
        for action in actions {
            match action {
                AuthAction::SendNode(node) => {
                    if let Err(error) = self.send_node(node).await {
                        tracing::warn!(error = %error, "failed to send auth stanza");
                    }
                }
                AuthAction::Emit(update) => {
                    self.emit(ClientEvent::ConnectionUpdate(update)).await;
                }
                AuthAction::CredsUpdated => {
                    if let Err(error) = self.auth.save_creds().await {
                        tracing::warn!(error = %error, "failed to persist creds");
                    }
                    self.emit(ClientEvent::CredsUpdate).await;
                }
                AuthAction::ScheduleQrTimeout(timeout) => {
                    self.qr_deadline = Some(Instant::now() + timeout);
                }
                AuthAction::CancelQrTimeout => {
                    self.qr_deadline = None;
                }
                AuthAction::Close { error } => {
                    self.close(error).await;
                }
            }
        }
    }

    async fn send_node(&mut self, node: Node) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::NotOpen(self.state.label()));
        }

        let encoded = binary::encode(&node)?;
        let framed = self.frames.encode(&mut self.noise, &encoded)?;
        self.transport.send(&framed).await?;
        self.emit(ClientEvent::NodeSent(node)).await;
        Ok(())
    }

    async fn on_keep_alive_tick(&mut self, interval: Duration) {
        if self.last_inbound.elapsed() > interval + KEEP_ALIVE_GRACE {
            let error = ConnectionError::KeepAliveTimeout;
            self.teardown(Some(error.to_string())).await;
            return;
        }

        let ping = self.ping_node();
        if let Err(error) = self.send_node(ping).await {
            tracing::warn!(error = %error, "keep-alive ping failed");
        }
    }

    fn ping_node(&mut self) -> Node {
        self.tag_counter += 1;
        let tag = format!("ka-{}", self.tag_counter);
        Node::with_children(
            "iq",
            binary::attrs([
                ("id", tag.as_str()),
                ("xmlns", "w:p"),
                ("type", "get"),
                ("to", "s.whatsapp.net"),
            ]),
            vec![Node::new("ping", binary::attrs([]))],
        )
    }

    /// Idempotent shutdown: cancels timers, closes the transport (1000 for
    /// a clean close, 1011 on error) and reports the final state.
    async fn close(&mut self, error: Option<String>) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }

        self.set_state(ConnectionState::Closing, error.clone()).await;
        self.cancel_timers();

        let (code, reason) = match &error {
            Some(reason) => (CLOSE_CODE_ERROR, reason.as_str()),
            None => (CLOSE_CODE_NORMAL, "closed"),
        };
        if let Err(close_error) = self.transport.close(code, reason).await {
            tracing::debug!(error = %close_error, "transport close failed");
        }

        self.emit(ClientEvent::WsClose {
            code,
            reason: reason.to_owned(),
        })
        .await;
        self.set_state(ConnectionState::Closed, error).await;
    }

    async fn teardown(&mut self, error: Option<String>) {
        self.close(error).await;
    }

    fn cancel_timers(&mut self) {
        self.qr_deadline = None;
    }

    async fn set_state(&mut self, state: ConnectionState, error: Option<String>) {
        if self.state == state && error.is_none() {
            return;
        }

        self.state = state;
        self.emit(ClientEvent::StateChange { state, error }).await;
    }

    async fn emit(&self, event: ClientEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}
