use prost::Message;

use crate::creds::AuthenticationCreds;
use crate::crypto::shared_secret;
use crate::error::{HandshakeError, HandshakePhase};
use crate::keys::KeyPair;
use crate::noise::{NoiseState, verify_cert_chain};
use crate::proto::{
    ClientPayload, DeviceProps, HandshakeMessage, client_payload, device_props, handshake_message,
};
use crate::version::WaVersion;

const DEFAULT_OS: &str = "Linux";
const DEFAULT_OS_VERSION: &str = "0.1.0";

/// Builds the ClientHello carrying the plain local ephemeral key.
pub fn build_client_hello(ephemeral_public: [u8; 32]) -> HandshakeMessage {
    HandshakeMessage {
        client_hello: Some(handshake_message::ClientHello {
            ephemeral: ephemeral_public.to_vec(),
            r#static: Vec::new(),
            payload: Vec::new(),
        }),
        server_hello: None,
        client_finish: None,
    }
}

/// Processes the ServerHello: mixes the server ephemeral, performs the two
/// middle DH operations, validates the certificate chain and returns the
/// encrypted local static key for the ClientFinish.
pub fn process_server_hello(
    noise: &mut NoiseState,
    message: &HandshakeMessage,
    noise_key: &KeyPair,
    ephemeral_key: &KeyPair,
) -> Result<Vec<u8>, HandshakeError> {
    let server_hello = message
        .server_hello
        .as_ref()
        .ok_or(HandshakeError::MissingField("server_hello"))?;

    let server_ephemeral = fixed_key(&server_hello.ephemeral, "server_hello.ephemeral")?;
    noise.mix_hash(&server_ephemeral);

    let dh_ephemeral = shared_secret(&ephemeral_key.private, &server_ephemeral)
        .map_err(|_| HandshakeError::InvalidKeyLength("server_hello.ephemeral"))?;
    noise
        .mix_into_key(&dh_ephemeral)
        .map_err(HandshakeError::Noise)?;

    let decrypted_static = noise.decrypt_handshake(&server_hello.r#static).map_err(|_| {
        HandshakeError::with_phase(
            HandshakePhase::ServerHello,
            format!(
                "decrypt failed at server_hello.static (ephemeral_len={}, static_len={}, payload_len={})",
                server_hello.ephemeral.len(),
                server_hello.r#static.len(),
                server_hello.payload.len()
            ),
        )
    })?;
    let server_static = fixed_key(&decrypted_static, "server_hello.static")?;

    let dh_static = shared_secret(&ephemeral_key.private, &server_static)
        .map_err(|_| HandshakeError::InvalidKeyLength("server_hello.static"))?;
    noise
        .mix_into_key(&dh_static)
        .map_err(HandshakeError::Noise)?;

    let cert_payload = noise.decrypt_handshake(&server_hello.payload).map_err(|_| {
        HandshakeError::with_phase(
            HandshakePhase::ServerHello,
            "decrypt failed at server_hello.payload",
        )
    })?;
    verify_cert_chain(&cert_payload).map_err(HandshakeError::Noise)?;

    let encrypted_static = noise
        .encrypt_handshake(&noise_key.public)
        .map_err(HandshakeError::Noise)?;
    let dh_noise = shared_secret(&noise_key.private, &server_ephemeral)
        .map_err(|_| HandshakeError::InvalidKeyLength("server_hello.ephemeral"))?;
    noise
        .mix_into_key(&dh_noise)
        .map_err(HandshakeError::Noise)?;

    Ok(encrypted_static)
}

/// Builds the ClientFinish: the already-encrypted static key plus the
/// encrypted serialized login-or-register payload.
pub fn build_client_finish(
    noise: &mut NoiseState,
    encrypted_static: Vec<u8>,
    client_payload: &ClientPayload,
) -> Result<HandshakeMessage, HandshakeError> {
    let encoded = client_payload.encode_to_vec();
    let encrypted_payload = noise.encrypt_handshake(&encoded).map_err(HandshakeError::Noise)?;

    Ok(HandshakeMessage {
        client_hello: None,
        server_hello: None,
        client_finish: Some(handshake_message::ClientFinish {
            r#static: encrypted_static,
            payload: encrypted_payload,
        }),
    })
}

/// Builds the login payload for paired credentials, or the registration
/// payload carrying the device pairing data when unpaired.
pub fn build_client_payload(
    creds: &AuthenticationCreds,
    version: WaVersion,
) -> Result<ClientPayload, HandshakeError> {
    let user_agent = client_payload::UserAgent {
        platform: client_payload::user_agent::Platform::Web as i32,
        app_version: Some(client_payload::user_agent::AppVersion {
            primary: version.primary,
            secondary: version.secondary,
            tertiary: version.tertiary,
            quaternary: 0,
            quinary: 0,
        }),
        mcc: "000".to_owned(),
        mnc: "000".to_owned(),
        os_version: DEFAULT_OS_VERSION.to_owned(),
        manufacturer: String::new(),
        device: "Desktop".to_owned(),
        os_build_number: DEFAULT_OS_VERSION.to_owned(),
        release_channel: client_payload::user_agent::ReleaseChannel::Release as i32,
        locale_language_iso_639_1: "en".to_owned(),
        locale_country_iso_3166_1_alpha_2: "US".to_owned(),
    };

    let mut payload = ClientPayload {
        username: 0,
        passive: false,
        user_agent: Some(user_agent),
        web_info: Some(client_payload::WebInfo {
            web_sub_platform: client_payload::web_info::WebSubPlatform::WebBrowser as i32,
        }),
        push_name: String::new(),
        connect_type: client_payload::ConnectType::WifiUnknown as i32,
        connect_reason: client_payload::ConnectReason::UserActivated as i32,
        device: 0,
        device_pairing_data: None,
        pull: false,
    };

    match creds.me.as_ref() {
        Some(me) => {
            let username = me.id.user.parse::<u64>().map_err(|_| {
                HandshakeError::with_phase(HandshakePhase::ClientFinish, "invalid persisted me.id")
            })?;
            payload.username = username;
            payload.device = u32::from(me.id.device.unwrap_or(0));
            payload.passive = true;
            payload.pull = true;
            payload.push_name = me.name.clone().unwrap_or_default();
        }
        None => {
            payload.device_pairing_data = Some(build_registration_data(creds, version));
        }
    }

    Ok(payload)
}

fn build_registration_data(
    creds: &AuthenticationCreds,
    version: WaVersion,
) -> client_payload::DevicePairingRegistrationData {
    let device_props = DeviceProps {
        os: DEFAULT_OS.to_owned(),
        version: Some(client_payload::user_agent::AppVersion {
            primary: 10,
            secondary: 15,
            tertiary: 7,
            quaternary: 0,
            quinary: 0,
        }),
        platform_type: device_props::PlatformType::Chrome as i32,
        require_full_sync: false,
    };

    client_payload::DevicePairingRegistrationData {
        e_regid: encode_big_endian(creds.registration_id, 4),
        e_keytype: vec![crate::crypto::KEY_BUNDLE_TYPE],
        e_ident: creds.signed_identity_key.public.to_vec(),
        e_skey_id: encode_big_endian(creds.signed_pre_key.key_id, 3),
        e_skey_val: creds.signed_pre_key.key_pair.public.to_vec(),
        e_skey_sig: creds.signed_pre_key.signature.to_vec(),
        build_hash: version.build_hash().to_vec(),
        device_props: device_props.encode_to_vec(),
    }
}

fn encode_big_endian(value: u32, width: usize) -> Vec<u8> {
    let mut out = vec![0_u8; width];
    for (index, byte) in out.iter_mut().enumerate() {
        let shift = ((width - 1 - index) * 8) as u32;
        *byte = ((value >> shift) & 0xFF) as u8;
    }
    out
}

fn fixed_key(bytes: &[u8], field: &'static str) -> Result<[u8; 32], HandshakeError> {
    if bytes.is_empty() {
        return Err(HandshakeError::MissingField(field));
    }

    if bytes.len() != 32 {
        return Err(HandshakeError::InvalidKeyLength(field));
    }

    let mut out = [0_u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creds::{MeInfo, init_auth_creds};

    #[test]
    fn unpaired_creds_build_registration_payload() {
        let creds = init_auth_creds();
        let payload = build_client_payload(&creds, WaVersion::pinned()).expect("payload");

        assert!(!payload.passive);
        assert!(!payload.pull);
        let pairing = payload.device_pairing_data.expect("pairing data");
        assert_eq!(pairing.e_keytype, vec![5]);
        assert_eq!(pairing.e_regid.len(), 4);
        assert_eq!(pairing.e_skey_id.len(), 3);
        assert_eq!(pairing.e_ident, creds.signed_identity_key.public.to_vec());
        assert_eq!(pairing.build_hash.len(), 16);
    }

    #[test]
    fn paired_creds_build_login_payload() {
        let mut creds = init_auth_creds();
        creds.me = Some(MeInfo {
            id: "5511999999999:3@s.whatsapp.net".parse().unwrap(),
            name: None,
        });

        let payload = build_client_payload(&creds, WaVersion::pinned()).expect("payload");
        assert_eq!(payload.username, 5_511_999_999_999);
        assert_eq!(payload.device, 3);
        assert!(payload.pull);
        assert!(payload.device_pairing_data.is_none());
    }

    #[test]
    fn login_rejects_non_numeric_user() {
        let mut creds = init_auth_creds();
        creds.me = Some(MeInfo {
            id: "not-a-number@s.whatsapp.net".parse().unwrap(),
            name: None,
        });
        assert!(build_client_payload(&creds, WaVersion::pinned()).is_err());
    }
}
