use prost::Message;

use crate::crypto::{aes_gcm_open, aes_gcm_seal, hkdf_sha256, sha256};
use crate::error::NoiseError;
use crate::proto::CertChain;
use crate::proto::cert_chain::noise_certificate;

/// Noise protocol name, padded with zeros to the 32-byte hash width.
pub const NOISE_PROTOCOL_NAME: &[u8] = b"Noise_XX_25519_AESGCM_SHA256";

/// Fixed prologue mixed into the handshake transcript.
pub const NOISE_WA_PROLOGUE: [u8; 4] = [0x57, 0x41, 0x06, 0x02];

/// Issuer serial the intermediate certificate must carry.
const EXPECTED_CERT_ISSUER_SERIAL: u32 = 0;

#[derive(Debug, Clone)]
struct TransportKeys {
    enc_key: [u8; 32],
    dec_key: [u8; 32],
    write_counter: u64,
    read_counter: u64,
}

/// Noise XX processor: transcript hash, chaining key and the working AEAD
/// key during the handshake, split per-direction keys afterwards.
///
/// A single counter serves both directions until finalisation because only
/// one direction is keyed per handshake stage; it must not be split early.
#[derive(Debug, Clone)]
pub struct NoiseState {
    hash: [u8; 32],
    salt: [u8; 32],
    key: [u8; 32],
    counter: u64,
    transport: Option<TransportKeys>,
}

impl NoiseState {
    /// Creates the handshake state, mixing the prologue and the local
    /// ephemeral public key into the transcript.
    pub fn new(ephemeral_public: &[u8; 32]) -> Self {
        let hash = initialize_handshake_hash(NOISE_PROTOCOL_NAME);

        let mut state = Self {
            hash,
            salt: hash,
            key: hash,
            counter: 0,
            transport: None,
        };
        state.mix_hash(&NOISE_WA_PROLOGUE);
        state.mix_hash(ephemeral_public);
        state
    }

    /// True once transport keys have been derived.
    pub fn is_finished(&self) -> bool {
        self.transport.is_some()
    }

    /// Returns the current transcript hash.
    pub fn handshake_hash(&self) -> [u8; 32] {
        self.hash
    }

    /// Mixes data into the transcript hash. No-op after finalisation.
    pub fn mix_hash(&mut self, data: &[u8]) {
        if self.transport.is_none() {
            let mut buf = Vec::with_capacity(32 + data.len());
            buf.extend_from_slice(&self.hash);
            buf.extend_from_slice(data);
            self.hash = sha256(&buf);
        }
    }

    /// Mixes key material: HKDF over the chaining key, new working key,
    /// counter back to zero.
    pub fn mix_into_key(&mut self, ikm: &[u8]) -> Result<(), NoiseError> {
        let okm = hkdf_sha256(ikm, 64, Some(&self.salt), &[])
            .map_err(|_| NoiseError::InvalidKeyMaterial("mix_into_key"))?;
        self.salt.copy_from_slice(&okm[..32]);
        self.key.copy_from_slice(&okm[32..]);
        self.counter = 0;
        Ok(())
    }

    /// Encrypts a handshake payload with the transcript hash as AAD, then
    /// mixes the ciphertext into the transcript.
    pub fn encrypt_handshake(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.transport.is_some() {
            return Err(NoiseError::AlreadyFinished);
        }

        let nonce = build_nonce(self.counter);
        let aad = self.hash;
        let ciphertext =
            aes_gcm_seal(&self.key, &nonce, &aad, plaintext).map_err(|_| NoiseError::Cipher)?;
        self.counter += 1;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// Decrypts a handshake payload, advancing the shared counter and mixing
    /// the ciphertext (not the plaintext) into the transcript.
    pub fn decrypt_handshake(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.transport.is_some() {
            return Err(NoiseError::AlreadyFinished);
        }

        let nonce = build_nonce(self.counter);
        let aad = self.hash;
        let plaintext =
            aes_gcm_open(&self.key, &nonce, &aad, ciphertext).map_err(|_| NoiseError::Cipher)?;
        self.counter += 1;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Derives the split transport keys, clears the transcript hash and
    /// resets both directional counters.
    pub fn finalize(&mut self) -> Result<(), NoiseError> {
        if self.transport.is_some() {
            return Err(NoiseError::AlreadyFinished);
        }

        let okm = hkdf_sha256(&[], 64, Some(&self.salt), &[])
            .map_err(|_| NoiseError::InvalidKeyMaterial("finalize"))?;
        let mut enc_key = [0_u8; 32];
        let mut dec_key = [0_u8; 32];
        enc_key.copy_from_slice(&okm[..32]);
        dec_key.copy_from_slice(&okm[32..]);

        self.transport = Some(TransportKeys {
            enc_key,
            dec_key,
            write_counter: 0,
            read_counter: 0,
        });
        self.hash = [0_u8; 32];
        Ok(())
    }

    /// Derives the transport keys with the directions swapped: the
    /// responder half of the split, for peers standing on the server side
    /// of the exchange.
    pub fn finalize_responder(&mut self) -> Result<(), NoiseError> {
        self.finalize()?;
        let transport = self.transport.as_mut().ok_or(NoiseError::NotFinished)?;
        std::mem::swap(&mut transport.enc_key, &mut transport.dec_key);
        Ok(())
    }

    /// Encrypts a transport payload with the write counter and empty AAD.
    pub fn encrypt_transport(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let transport = self.transport.as_mut().ok_or(NoiseError::NotFinished)?;

        let nonce = build_nonce(transport.write_counter);
        let ciphertext = aes_gcm_seal(&transport.enc_key, &nonce, &[], plaintext)
            .map_err(|_| NoiseError::Cipher)?;
        transport.write_counter += 1;
        Ok(ciphertext)
    }

    /// Decrypts a transport payload with the read counter and empty AAD.
    pub fn decrypt_transport(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let transport = self.transport.as_mut().ok_or(NoiseError::NotFinished)?;

        let nonce = build_nonce(transport.read_counter);
        let plaintext = aes_gcm_open(&transport.dec_key, &nonce, &[], ciphertext)
            .map_err(|_| NoiseError::Cipher)?;
        transport.read_counter += 1;
        Ok(plaintext)
    }

    /// Current (write, read) transport counters; both zero pre-finalisation.
    pub fn transport_counters(&self) -> (u64, u64) {
        self.transport
            .as_ref()
            .map(|keys| (keys.write_counter, keys.read_counter))
            .unwrap_or((0, 0))
    }
}

/// Validates the decrypted ServerHello certificate chain: the intermediate
/// certificate must be present and carry the expected issuer serial.
pub fn verify_cert_chain(payload: &[u8]) -> Result<(), NoiseError> {
    let chain =
        CertChain::decode(payload).map_err(|error| NoiseError::Certificate(error.to_string()))?;

    let Some(intermediate) = chain.intermediate else {
        return Err(NoiseError::Certificate("missing intermediate cert".into()));
    };

    let details = noise_certificate::Details::decode(intermediate.details.as_slice())
        .map_err(|error| NoiseError::Certificate(error.to_string()))?;

    if details.issuer_serial != EXPECTED_CERT_ISSUER_SERIAL {
        return Err(NoiseError::Certificate(format!(
            "unexpected cert issuer serial {}",
            details.issuer_serial
        )));
    }

    Ok(())
}

fn build_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0_u8; 12];
    nonce[8..].copy_from_slice(&(counter as u32).to_be_bytes());
    nonce
}

fn initialize_handshake_hash(protocol_name: &[u8]) -> [u8; 32] {
    let mut hash = [0_u8; 32];
    if protocol_name.len() <= hash.len() {
        hash[..protocol_name.len()].copy_from_slice(protocol_name);
        return hash;
    }

    sha256(protocol_name)
}
