use serde::{Deserialize, Serialize};

use crate::binary::Jid;
use crate::crypto::random_bytes;
use crate::keys::{KeyPair, SignedPreKey, generate_keypair, generate_registration_id, signed_pre_key};

/// Account information available once paired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeInfo {
    /// Full JID assigned by the server.
    pub id: Jid,
    /// Optional profile or business display name.
    pub name: Option<String>,
}

/// Signal protocol address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalAddress {
    pub name: String,
    pub device_id: u32,
}

/// Trusted identity observed during pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalIdentity {
    pub identifier: SignalAddress,
    /// 0x05-prefixed public key bytes.
    #[serde(with = "serde_b64")]
    pub identifier_key: Vec<u8>,
}

/// Per-account settings mirrored from the primary device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccountSettings {
    pub unarchive_chats: bool,
}

/// Long-lived, mutable credentials persisted across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationCreds {
    /// Static Noise handshake key pair.
    pub noise_key: KeyPair,
    /// Ephemeral key pair used during pairing.
    pub pairing_ephemeral_key_pair: KeyPair,
    /// Signal identity key pair.
    pub signed_identity_key: KeyPair,
    /// Current signed pre-key.
    pub signed_pre_key: SignedPreKey,
    /// 14-bit registration identifier.
    pub registration_id: u32,
    /// HMAC key for ADV identity verification.
    #[serde(with = "serde_key32")]
    pub adv_secret_key: [u8; 32],
    /// Present once paired.
    pub me: Option<MeInfo>,
    /// Server-signed device identity blob, counter-signed by us
    /// (prost-encoded `AdvSignedDeviceIdentity`).
    #[serde(with = "serde_opt_b64")]
    pub account: Option<Vec<u8>>,
    /// Append-only list of identities observed during pairing.
    pub signal_identities: Vec<SignalIdentity>,
    /// Server platform label.
    pub platform: Option<String>,
    /// True once `account` and `me` are both present.
    pub registered: bool,
    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    pub account_sync_counter: u32,
    pub account_settings: AccountSettings,
    /// Opaque load-balancer blob replayed in reconnect preambles.
    #[serde(with = "serde_opt_b64")]
    pub routing_info: Option<Vec<u8>>,
}

/// Canonical initialiser for a fresh, unpaired credential set.
pub fn init_auth_creds() -> AuthenticationCreds {
    let signed_identity_key = generate_keypair();
    let signed_pre_key = signed_pre_key(&signed_identity_key, 1);

    let mut adv_secret_key = [0_u8; 32];
    adv_secret_key.copy_from_slice(&random_bytes(32));

    AuthenticationCreds {
        noise_key: generate_keypair(),
        pairing_ephemeral_key_pair: generate_keypair(),
        signed_identity_key,
        signed_pre_key,
        registration_id: generate_registration_id(),
        adv_secret_key,
        me: None,
        account: None,
        signal_identities: Vec::new(),
        platform: None,
        registered: false,
        next_pre_key_id: 1,
        first_unuploaded_pre_key_id: 1,
        account_sync_counter: 0,
        account_settings: AccountSettings::default(),
        routing_info: None,
    }
}

pub(crate) mod serde_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as DeError};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(DeError::custom)
    }
}

pub(crate) mod serde_key32 {
    use serde::{Deserializer, Serializer, de::Error as DeError};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::serde_b64::serialize(&value.to_vec(), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = super::serde_b64::deserialize(deserializer)?;
        if bytes.len() != 32 {
            return Err(D::Error::invalid_length(bytes.len(), &"32 bytes"));
        }

        let mut out = [0_u8; 32];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

pub(crate) mod serde_opt_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as DeError};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|value| STANDARD.decode(value.as_bytes()).map_err(DeError::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_creds_are_unregistered_with_valid_key_material() {
        let creds = init_auth_creds();

        assert!(!creds.registered);
        assert!(creds.me.is_none());
        assert!(creds.account.is_none());
        assert!(creds.registration_id < 16_384);
        assert!(creds.next_pre_key_id >= creds.first_unuploaded_pre_key_id);
        assert_eq!(creds.signed_pre_key.key_id, 1);
    }

    #[test]
    fn creds_serde_round_trip() {
        let mut creds = init_auth_creds();
        creds.me = Some(MeInfo {
            id: "5511999999999:2@s.whatsapp.net".parse().unwrap(),
            name: Some("name".into()),
        });
        creds.account = Some(vec![1, 2, 3]);
        creds.routing_info = Some(vec![8, 8]);

        let serialized = serde_json::to_string(&creds).expect("serialize");
        let loaded: AuthenticationCreds = serde_json::from_str(&serialized).expect("deserialize");
        assert_eq!(creds, loaded);
    }
}
