#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tokio::sync::mpsc;

use wacore::crypto::shared_secret;
use wacore::error::TransportError;
use wacore::keys::{KeyPair, generate_keypair};
use wacore::noise::NoiseState;
use wacore::proto::cert_chain::{NoiseCertificate, noise_certificate};
use wacore::proto::{CertChain, ClientPayload, HandshakeMessage, handshake_message};
use wacore::transport::{Transport, TransportEvent};

/// Test hooks around a [`MockTransport`]: inject inbound transport events,
/// observe outbound writes and the final close code.
pub struct TransportProbe {
    pub events: mpsc::Sender<TransportEvent>,
    pub written: mpsc::UnboundedReceiver<Vec<u8>>,
    pub closed: Arc<Mutex<Option<(u16, String)>>>,
}

impl TransportProbe {
    /// Delivers raw bytes as one inbound transport message.
    pub async fn deliver(&self, bytes: Vec<u8>) {
        self.events
            .send(TransportEvent::Message(Bytes::from(bytes)))
            .await
            .expect("connection task alive");
    }

    /// Reads the next outbound write.
    pub async fn next_written(&mut self) -> Vec<u8> {
        self.written.recv().await.expect("write recorded")
    }
}

/// In-memory stand-in for the WebSocket transport.
pub struct MockTransport {
    events: mpsc::Sender<TransportEvent>,
    written: mpsc::UnboundedSender<Vec<u8>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
    connect_opens: bool,
}

impl MockTransport {
    /// Builds the transport, the event receiver to hand to the connection
    /// and the probe for the test side. `connect_opens` controls whether
    /// `connect()` immediately delivers the `Open` event.
    pub fn new(connect_opens: bool) -> (Self, mpsc::Receiver<TransportEvent>, TransportProbe) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Mutex::new(None));

        let transport = Self {
            events: event_tx.clone(),
            written: written_tx,
            closed: closed.clone(),
            connect_opens,
        };
        let probe = TransportProbe {
            events: event_tx,
            written: written_rx,
            closed,
        };
        (transport, event_rx, probe)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connect_opens {
            self.events
                .send(TransportEvent::Open)
                .await
                .map_err(|_| TransportError::Connect("event channel closed".into()))?;
        }
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.written
            .send(bytes.to_vec())
            .map_err(|_| TransportError::Write("probe dropped".into()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        *self.closed.lock().expect("closed lock") = Some((code, reason.to_owned()));
        Ok(())
    }
}

/// Splits concatenated `len24 || body` frames, skipping a leading preamble
/// when present.
pub fn unframe_all(mut raw: &[u8]) -> Vec<Vec<u8>> {
    if raw.starts_with(b"WA") {
        raw = &raw[4..];
    }

    let mut frames = Vec::new();
    while raw.len() >= 3 {
        let len = ((raw[0] as usize) << 16) | ((raw[1] as usize) << 8) | raw[2] as usize;
        frames.push(raw[3..3 + len].to_vec());
        raw = &raw[3 + len..];
    }
    frames
}

/// Wraps a payload in the 3-byte length framing.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(3 + len);
    out.push(((len >> 16) & 0xFF) as u8);
    out.push(((len >> 8) & 0xFF) as u8);
    out.push((len & 0xFF) as u8);
    out.extend_from_slice(payload);
    out
}

/// Certificate chain that passes the issuer-serial check.
pub fn test_cert_chain() -> CertChain {
    let details = noise_certificate::Details {
        serial: 21,
        issuer_serial: 0,
        key: vec![0_u8; 32],
        not_before: 0,
        not_after: 0,
    };
    CertChain {
        leaf: None,
        intermediate: Some(NoiseCertificate {
            details: details.encode_to_vec(),
            signature: vec![0_u8; 64],
        }),
    }
}

/// Scripted server half of the XX exchange built from the same primitives.
pub struct ServerSide {
    pub noise: NoiseState,
    pub ephemeral: KeyPair,
    pub static_key: KeyPair,
}

impl ServerSide {
    /// Consumes a ClientHello and produces the matching ServerHello.
    pub fn respond_to_hello(hello: &HandshakeMessage) -> anyhow::Result<(Self, HandshakeMessage)> {
        let client_ephemeral: [u8; 32] = hello
            .client_hello
            .as_ref()
            .expect("client_hello")
            .ephemeral
            .as_slice()
            .try_into()?;

        let ephemeral = generate_keypair();
        let static_key = generate_keypair();
        let mut noise = NoiseState::new(&client_ephemeral);

        noise.mix_hash(&ephemeral.public);
        let dh1 = shared_secret(&ephemeral.private, &client_ephemeral)?;
        noise.mix_into_key(&dh1)?;
        let static_ct = noise.encrypt_handshake(&static_key.public)?;

        let dh2 = shared_secret(&static_key.private, &client_ephemeral)?;
        noise.mix_into_key(&dh2)?;
        let cert_ct = noise.encrypt_handshake(&test_cert_chain().encode_to_vec())?;

        let message = HandshakeMessage {
            client_hello: None,
            server_hello: Some(handshake_message::ServerHello {
                ephemeral: ephemeral.public.to_vec(),
                r#static: static_ct,
                payload: cert_ct,
            }),
            client_finish: None,
        };

        Ok((
            Self {
                noise,
                ephemeral,
                static_key,
            },
            message,
        ))
    }

    /// Consumes the ClientFinish, switches to transport keys and returns
    /// the decrypted client payload.
    pub fn accept_finish(&mut self, finish: &HandshakeMessage) -> anyhow::Result<ClientPayload> {
        let finish = finish.client_finish.as_ref().expect("client_finish");

        let client_static: [u8; 32] = self
            .noise
            .decrypt_handshake(&finish.r#static)?
            .as_slice()
            .try_into()?;
        let dh3 = shared_secret(&self.ephemeral.private, &client_static)?;
        self.noise.mix_into_key(&dh3)?;

        let payload = self.noise.decrypt_handshake(&finish.payload)?;
        self.noise.finalize_responder()?;
        Ok(ClientPayload::decode(payload.as_slice())?)
    }
}
