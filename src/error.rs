use thiserror::Error;

/// Errors surfaced by byte-transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect transport: {0}")]
    Connect(String),
    #[error("transport write failed: {0}")]
    Write(String),
    #[error("transport closed by peer")]
    Closed,
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),
}

/// Errors for low-level crypto primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("cipher init failed")]
    CipherInit,
    #[error("aead seal failed")]
    Seal,
    #[error("aead open failed")]
    Open,
    #[error("cbc unpad failed")]
    Unpad,
    #[error("invalid public key length {0}")]
    InvalidPublicKeyLength(usize),
    #[error("hkdf output length {0} out of range")]
    HkdfLength(usize),
}

/// Errors for Noise processor operations.
#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("cipher error")]
    Cipher,
    #[error("invalid key material for {0}")]
    InvalidKeyMaterial(&'static str),
    #[error("handshake already finished")]
    AlreadyFinished,
    #[error("handshake not finished")]
    NotFinished,
    #[error("certificate validation failed: {0}")]
    Certificate(String),
}

/// Errors for frame push/pull over the byte transport.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload exceeds max 24-bit frame size")]
    FrameTooLarge,
    #[error(transparent)]
    Noise(#[from] NoiseError),
}

/// Errors for binary stanza codec operations, with the failing offset.
#[derive(Debug, Error)]
pub enum BinaryError {
    #[error("unexpected end of payload at offset {0}")]
    UnexpectedEof(usize),
    #[error("unknown tag byte {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("unknown dictionary index {dict}:{index} at offset {offset}")]
    UnknownDictionaryToken { dict: u8, index: u8, offset: usize },
    #[error("invalid packed nibble {value:#x} at offset {offset}")]
    InvalidNibble { value: u8, offset: usize },
    #[error("invalid jid: {0}")]
    InvalidJid(String),
    #[error("invalid utf-8 string at offset {0}")]
    InvalidUtf8(usize),
    #[error("node list size {0} exceeds u16 range")]
    ListTooLong(usize),
    #[error("byte payload exceeds u32 max length")]
    PayloadTooLarge,
    #[error("failed to inflate compressed stanza: {0}")]
    Inflate(String),
    #[error("trailing bytes after node decode at offset {0}")]
    TrailingBytes(usize),
}

/// Phase labels attached to handshake failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    ClientHello,
    ServerHello,
    ClientFinish,
    PostFinish,
}

impl std::fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::ClientHello => "client_hello",
            Self::ServerHello => "server_hello",
            Self::ClientFinish => "client_finish",
            Self::PostFinish => "post_finish",
        };
        f.write_str(label)
    }
}

/// Errors for Noise XX handshake orchestration.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake failed at {phase}: {message}")]
    Phase {
        phase: HandshakePhase,
        message: String,
    },
    #[error(transparent)]
    Noise(#[from] NoiseError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("handshake proto decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("missing handshake field: {0}")]
    MissingField(&'static str),
    #[error("invalid handshake key length for {0}")]
    InvalidKeyLength(&'static str),
}

impl HandshakeError {
    /// Builds a phase-tagged handshake error.
    pub fn with_phase(phase: HandshakePhase, message: impl Into<String>) -> Self {
        Self::Phase {
            phase,
            message: message.into(),
        }
    }
}

/// Errors for pairing and login flows.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("pair-device iq carried no refs")]
    EmptyRefList,
    #[error("qr refs exhausted after {0} attempts")]
    QrRefsExhausted(u32),
    #[error("device identity hmac mismatch")]
    InvalidDeviceIdentityHmac,
    #[error("account signature invalid")]
    InvalidAccountSignature,
    #[error("missing element in pair-success: {0}")]
    MissingPairElement(&'static str),
    #[error("login failed with reason {code}")]
    LoginFailure { code: u16 },
    #[error("adv identity decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error(transparent)]
    Binary(#[from] BinaryError),
}

/// Errors for credential and key-store persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors for connection manager operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("send_node is only valid while open (state: {0})")]
    NotOpen(&'static str),
    #[error("keep-alive timed out waiting for inbound data")]
    KeepAliveTimeout,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Binary(#[from] BinaryError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}
