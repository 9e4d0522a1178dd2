use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Prefix byte used by libsignal when serializing Curve25519 public keys.
pub const KEY_BUNDLE_TYPE: u8 = 5;

/// Computes SHA-256 of the input.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0_u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Computes HMAC-SHA-256 over the message with the given key.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(message);

    let mut out = [0_u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Derives `len` bytes via HKDF-SHA-256.
pub fn hkdf_sha256(
    ikm: &[u8],
    len: usize,
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut out = vec![0_u8; len];
    hk.expand(info, &mut out)
        .map_err(|_| CryptoError::HkdfLength(len))?;
    Ok(out)
}

/// Encrypts with AES-256-GCM; the 16-byte tag is appended to the ciphertext.
pub fn aes_gcm_seal(
    key: &[u8; 32],
    iv: &[u8; 12],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::CipherInit)?;
    cipher
        .encrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Seal)
}

/// Decrypts AES-256-GCM ciphertext, rejecting with an error on any
/// authenticity failure.
pub fn aes_gcm_open(
    key: &[u8; 32],
    iv: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::CipherInit)?;
    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Open)
}

/// Encrypts with AES-256-CBC and PKCS#7 padding.
pub fn aes_cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypts AES-256-CBC ciphertext, validating the PKCS#7 padding.
pub fn aes_cbc_decrypt(
    key: &[u8; 32],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Unpad)
}

/// Fills a buffer of `n` cryptographically secure random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0_u8; n];
    rand::rng().fill_bytes(&mut out);
    out
}

/// Computes the X25519 shared secret. Accepts a 33-byte public key with the
/// libsignal 0x05 version prefix and strips it; any other non-32 length is
/// rejected.
pub fn shared_secret(private: &[u8; 32], peer_public: &[u8]) -> Result<[u8; 32], CryptoError> {
    use x25519_dalek::{PublicKey, StaticSecret};

    let raw: &[u8] = match peer_public.len() {
        32 => peer_public,
        33 if peer_public[0] == KEY_BUNDLE_TYPE => &peer_public[1..],
        other => return Err(CryptoError::InvalidPublicKeyLength(other)),
    };

    let mut public = [0_u8; 32];
    public.copy_from_slice(raw);

    let secret = StaticSecret::from(*private);
    Ok(secret.diffie_hellman(&PublicKey::from(public)).to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcm_seal_open_round_trip() {
        let key: [u8; 32] = random_bytes(32).try_into().unwrap();
        let iv: [u8; 12] = random_bytes(12).try_into().unwrap();
        let aad = random_bytes(20);
        let plaintext = random_bytes(100);

        let sealed = aes_gcm_seal(&key, &iv, &aad, &plaintext).expect("seal");
        let opened = aes_gcm_open(&key, &iv, &aad, &sealed).expect("open");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn gcm_open_rejects_tampered_ciphertext() {
        let key = [7_u8; 32];
        let iv = [9_u8; 12];
        let mut sealed = aes_gcm_seal(&key, &iv, b"aad", b"payload").expect("seal");
        sealed[0] ^= 0x01;
        assert!(aes_gcm_open(&key, &iv, b"aad", &sealed).is_err());
    }

    #[test]
    fn cbc_round_trip_and_bad_padding() {
        let key = [1_u8; 32];
        let iv = [2_u8; 16];
        let ciphertext = aes_cbc_encrypt(&key, &iv, b"cbc payload");
        assert_eq!(
            aes_cbc_decrypt(&key, &iv, &ciphertext).expect("decrypt"),
            b"cbc payload"
        );

        let wrong_key = [3_u8; 32];
        assert!(aes_cbc_decrypt(&wrong_key, &iv, &ciphertext).is_err());
    }

    #[test]
    fn shared_secret_strips_version_byte() {
        use x25519_dalek::{PublicKey, StaticSecret};

        let a = StaticSecret::from([4_u8; 32]);
        let b = StaticSecret::from([5_u8; 32]);
        let b_public = PublicKey::from(&b).to_bytes();

        let plain = shared_secret(&a.to_bytes(), &b_public).expect("plain");

        let mut prefixed = [0_u8; 33];
        prefixed[0] = KEY_BUNDLE_TYPE;
        prefixed[1..].copy_from_slice(&b_public);
        let stripped = shared_secret(&a.to_bytes(), &prefixed).expect("prefixed");

        assert_eq!(plain, stripped);
        assert!(shared_secret(&a.to_bytes(), &b_public[..31]).is_err());
    }

    #[test]
    fn hkdf_expands_noise_vector() {
        let ikm = hex::decode("9551a0c91a9844475e9a165d5fcfff987f4ef0dd98f53fb1edc9676b24171e26")
            .unwrap();
        let salt = hex::decode("4e6f6973655f58585f32353531395f41455347434d5f53484132353600000000")
            .unwrap();

        let okm = hkdf_sha256(&ikm, 64, Some(&salt), &[]).expect("expand");
        assert_eq!(
            hex::encode(&okm[..32]),
            "80e77ec30d23005db64103da1f843a791428204e6d9981f06b75225244076323"
        );
        assert_eq!(
            hex::encode(&okm[32..]),
            "ca40f3f22ca8a3dff4728bf1f4db7b4435ab9b55d3efa885510baa0c7b746006"
        );
    }
}
