//! Core WhatsApp Web multi-device protocol stack.
//!
//! The crate sits between a raw duplex byte transport and higher-level
//! message semantics: it performs the Noise XX handshake, frames and
//! encrypts session traffic, speaks the compact binary stanza format and
//! drives device pairing (QR) or re-login over persisted credentials.

pub mod authenticator;
pub mod binary;
pub mod connection;
pub mod creds;
pub mod crypto;
pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod keys;
pub mod noise;
pub mod proto;
pub mod store;
pub mod transport;
pub mod version;

pub use authenticator::{AuthAction, AuthState, Authenticator, generate_qr_string};
pub use binary::{Attrs, Jid, Node, NodeContent};
pub use connection::{Command, Connection, ConnectionConfig, ConnectionHandle, ConnectionState};
pub use creds::{AuthenticationCreds, MeInfo, SignalIdentity, init_auth_creds};
pub use error::{
    AuthError, BinaryError, ConnectionError, CryptoError, FrameError, HandshakeError, NoiseError,
    StoreError, TransportError,
};
pub use events::{ClientEvent, ConnectionStatus, ConnectionUpdate};
pub use frame::FrameCodec;
pub use keys::{KeyPair, SignedPreKey, generate_keypair, generate_registration_id};
pub use noise::NoiseState;
pub use store::{
    AuthStateProvider, MemoryDatabase, SignalDataKind, SignalDataSet, SignalKeyStore, SignalValue,
    StorageDatabase,
};
pub use transport::{Transport, TransportEvent};
pub use version::WaVersion;
