use curve25519_dalek::{
    constants::ED25519_BASEPOINT_TABLE, edwards::CompressedEdwardsY, montgomery::MontgomeryPoint,
    scalar::Scalar,
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::KEY_BUNDLE_TYPE;

/// X25519 keypair used by the Noise handshake and Signal identity flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Public key bytes.
    pub public: [u8; 32],
    /// Private key bytes.
    pub private: [u8; 32],
}

impl KeyPair {
    /// Builds a keypair from a private key.
    pub fn from_private(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret).to_bytes();

        Self { public, private }
    }
}

/// Generates a new random X25519 keypair.
pub fn generate_keypair() -> KeyPair {
    let mut private = [0_u8; 32];
    rand::rng().fill_bytes(&mut private);
    KeyPair::from_private(private)
}

/// Generates a 14-bit registration identifier.
pub fn generate_registration_id() -> u32 {
    let mut raw = [0_u8; 4];
    rand::rng().fill_bytes(&mut raw);
    u32::from_le_bytes(raw) & 0x3FFF
}

/// Prepends the libsignal key-bundle prefix to a 32-byte public key.
pub fn signal_public_key(public: &[u8; 32]) -> [u8; 33] {
    let mut out = [0_u8; 33];
    out[0] = KEY_BUNDLE_TYPE;
    out[1..].copy_from_slice(public);
    out
}

/// Signed pre-key pair with its identity-key signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKey {
    /// Pre-key pair.
    pub key_pair: KeyPair,
    /// Signature over the prefixed public key, by the identity private key.
    #[serde(with = "serde_sig64")]
    pub signature: [u8; 64],
    /// Rotating pre-key identifier.
    pub key_id: u32,
}

/// Creates a signed pre-key: the signature covers `0x05 || public`.
pub fn signed_pre_key(identity: &KeyPair, key_id: u32) -> SignedPreKey {
    let key_pair = generate_keypair();
    let signature = sign_message(
        identity.private,
        identity.public,
        &signal_public_key(&key_pair.public),
    );

    SignedPreKey {
        key_pair,
        signature,
        key_id,
    }
}

/// Signs an arbitrary message using a Curve25519-compatible XEdDSA-style flow.
pub fn sign_message(private: [u8; 32], public: [u8; 32], message: &[u8]) -> [u8; 64] {
    let secret = Scalar::from_bytes_mod_order(private);
    let nonce = hash_to_scalar(&[&private, &public, message]);
    let nonce_point = (&nonce * ED25519_BASEPOINT_TABLE).compress().to_bytes();
    let challenge = hash_to_scalar(&[&nonce_point, &public, message]);
    let s = nonce + challenge * secret;

    let mut out = [0_u8; 64];
    out[..32].copy_from_slice(&nonce_point);
    out[32..].copy_from_slice(&s.to_bytes());
    out
}

/// Verifies a Curve25519-compatible XEdDSA-style signature. Returns `false`
/// on any malformed input instead of failing.
pub fn verify_message(public: [u8; 32], message: &[u8], signature: &[u8]) -> bool {
    if signature.len() != 64 {
        return false;
    }

    // Try Ed25519 pure first (used for WA certificates)
    if let Ok(verifying_key) = VerifyingKey::from_bytes(&public) {
        if let Ok(sig) = Signature::from_slice(signature) {
            if verifying_key.verify(message, &sig).is_ok() {
                return true;
            }
        }
    }

    // Fallback to XEdDSA for Curve25519 keys
    let mut r_bytes = [0_u8; 32];
    r_bytes.copy_from_slice(&signature[..32]);
    let Some(r_point) = CompressedEdwardsY(r_bytes).decompress() else {
        return false;
    };

    let mut s_bytes = [0_u8; 32];
    s_bytes.copy_from_slice(&signature[32..]);
    let Some(s) = Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) else {
        return false;
    };

    let mont = MontgomeryPoint(public);
    let challenge = hash_to_scalar(&[&r_bytes, &public, message]);
    let lhs = &s * ED25519_BASEPOINT_TABLE;
    for sign in [0, 1] {
        let Some(a_point) = mont.to_edwards(sign) else {
            continue;
        };
        let rhs = r_point + (challenge * a_point);
        if lhs == rhs {
            return true;
        }
    }

    false
}

fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }

    let mut wide = [0_u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

pub(crate) mod serde_sig64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as DeError};

    pub fn serialize<S>(value: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(DeError::custom)?;
        if bytes.len() != 64 {
            return Err(D::Error::invalid_length(bytes.len(), &"64 bytes"));
        }

        let mut out = [0_u8; 64];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trip() {
        let identity = generate_keypair();
        let signature = sign_message(identity.private, identity.public, b"adv details");
        assert!(verify_message(identity.public, b"adv details", &signature));
        assert!(!verify_message(identity.public, b"other payload", &signature));
    }

    #[test]
    fn verify_tolerates_garbage_signature() {
        let identity = generate_keypair();
        assert!(!verify_message(identity.public, b"msg", &[0_u8; 63]));
        assert!(!verify_message(identity.public, b"msg", &[0xFF_u8; 64]));
    }

    #[test]
    fn signed_pre_key_signature_covers_prefixed_public() {
        let identity = generate_keypair();
        let spk = signed_pre_key(&identity, 1);
        assert!(verify_message(
            identity.public,
            &signal_public_key(&spk.key_pair.public),
            &spk.signature
        ));
        assert_eq!(spk.key_id, 1);
    }

    #[test]
    fn registration_id_fits_fourteen_bits() {
        for _ in 0..64 {
            assert!(generate_registration_id() < 16_384);
        }
    }
}
