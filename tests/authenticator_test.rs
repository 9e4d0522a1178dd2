use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use prost::Message;

use wacore::authenticator::{
    AuthAction, AuthState, Authenticator, QR_TIMEOUT_FIRST, QR_TIMEOUT_REFRESH,
};
use wacore::binary::{Node, attrs};
use wacore::creds::{AuthenticationCreds, init_auth_creds};
use wacore::crypto::hmac_sha256;
use wacore::error::AuthError;
use wacore::events::ConnectionStatus;
use wacore::keys::{KeyPair, generate_keypair, sign_message, verify_message};
use wacore::proto::{AdvDeviceIdentity, AdvSignedDeviceIdentity, AdvSignedDeviceIdentityHmac};

fn pair_device_iq(refs: &[&str]) -> Node {
    let children = refs
        .iter()
        .map(|reference| Node::with_bytes("ref", attrs([]), reference.as_bytes().to_vec()))
        .collect();
    Node::with_children(
        "iq",
        attrs([("id", "pair-1"), ("type", "set"), ("from", "@s.whatsapp.net")]),
        vec![Node::with_children("pair-device", attrs([]), children)],
    )
}

fn qr_payload(actions: &[AuthAction]) -> Option<String> {
    actions.iter().find_map(|action| match action {
        AuthAction::Emit(update) => update.qr.clone(),
        _ => None,
    })
}

fn scheduled_timeout(actions: &[AuthAction]) -> Option<std::time::Duration> {
    actions.iter().find_map(|action| match action {
        AuthAction::ScheduleQrTimeout(timeout) => Some(*timeout),
        _ => None,
    })
}

/// Builds a pair-success stanza whose ADV blob verifies against `creds`.
fn pair_success_iq(creds: &AuthenticationCreds, account: &KeyPair) -> Node {
    let details = AdvDeviceIdentity {
        raw_id: 4921,
        timestamp: 1_700_000_000,
        key_index: 2,
    }
    .encode_to_vec();

    let mut signed = Vec::from([0x06, 0x00]);
    signed.extend_from_slice(&details);
    signed.extend_from_slice(&creds.signed_identity_key.public);
    let account_signature = sign_message(account.private, account.public, &signed).to_vec();

    let identity = AdvSignedDeviceIdentity {
        details,
        account_signature_key: account.public.to_vec(),
        account_signature,
        device_signature: Vec::new(),
    }
    .encode_to_vec();

    let wrapped = AdvSignedDeviceIdentityHmac {
        hmac: hmac_sha256(&creds.adv_secret_key, &identity).to_vec(),
        details: identity,
    }
    .encode_to_vec();

    Node::with_children(
        "iq",
        attrs([("id", "pair-2"), ("type", "result"), ("from", "@s.whatsapp.net")]),
        vec![Node::with_children(
            "pair-success",
            attrs([]),
            vec![
                Node::with_bytes("device-identity", attrs([]), wrapped),
                Node::new("device", attrs([("jid", "5511912345678:4@s.whatsapp.net")])),
                Node::new("platform", attrs([("name", "smba")])),
                Node::new("biz", attrs([("name", "Acme Desk")])),
            ],
        )],
    )
}

#[test]
fn qr_rotation_walks_the_ref_list_then_fails() -> anyhow::Result<()> {
    let mut auth = Authenticator::new();
    let mut creds = init_auth_creds();

    let actions = auth.handle_node(&pair_device_iq(&["R0", "R1", "R2"]), &mut creds)?;

    // Ack first, then exactly one QR with the first ref and a 60s timeout.
    assert!(matches!(
        actions.first(),
        Some(AuthAction::SendNode(node)) if node.tag == "iq" && node.attr("type") == Some("result")
    ));
    let qr = qr_payload(&actions).expect("qr emitted");
    let expected_suffix = format!(
        ",{},{},{}",
        STANDARD.encode(creds.noise_key.public),
        STANDARD.encode(creds.signed_identity_key.public),
        STANDARD.encode(creds.adv_secret_key)
    );
    assert_eq!(qr, format!("R0{expected_suffix}"));
    assert_eq!(scheduled_timeout(&actions), Some(QR_TIMEOUT_FIRST));
    assert_eq!(auth.state(), AuthState::QrShown { retry: 0 });

    // Refreshes rotate refs on the shorter timeout.
    let actions = auth.on_qr_timeout(&creds);
    assert_eq!(qr_payload(&actions), Some(format!("R1{expected_suffix}")));
    assert_eq!(scheduled_timeout(&actions), Some(QR_TIMEOUT_REFRESH));

    let actions = auth.on_qr_timeout(&creds);
    assert_eq!(qr_payload(&actions), Some(format!("R2{expected_suffix}")));

    // Running out of refs is a fatal pairing failure.
    let actions = auth.on_qr_timeout(&creds);
    assert!(qr_payload(&actions).is_none());
    assert!(
        actions
            .iter()
            .any(|action| matches!(action, AuthAction::Close { .. }))
    );
    assert_eq!(auth.state(), AuthState::Failed);
    Ok(())
}

#[test]
fn empty_ref_list_is_rejected() {
    let mut auth = Authenticator::new();
    let mut creds = init_auth_creds();
    let result = auth.handle_node(&pair_device_iq(&[]), &mut creds);
    assert!(matches!(result, Err(AuthError::EmptyRefList)));
}

#[test]
fn pair_success_counter_signs_and_updates_creds() -> anyhow::Result<()> {
    let mut auth = Authenticator::new();
    let mut creds = init_auth_creds();
    let account = generate_keypair();

    let actions = auth.handle_node(&pair_success_iq(&creds, &account), &mut creds)?;

    // Creds reflect the paired account.
    let me = creds.me.as_ref().expect("me set");
    assert_eq!(me.id.user, "5511912345678");
    assert_eq!(me.id.device, Some(4));
    assert_eq!(me.name.as_deref(), Some("Acme Desk"));
    assert_eq!(creds.platform.as_deref(), Some("smba"));
    assert!(creds.registered);
    assert_eq!(creds.signal_identities.len(), 1);
    assert_eq!(creds.signal_identities[0].identifier_key[0], 0x05);

    let account_blob = creds.account.as_ref().expect("account stored");
    let stored = AdvSignedDeviceIdentity::decode(account_blob.as_slice())?;
    assert_eq!(stored.account_signature_key, account.public.to_vec());

    // Our counter-signature covers 0x06 0x01 || details || identity || account key.
    let mut device_message = Vec::from([0x06, 0x01]);
    device_message.extend_from_slice(&stored.details);
    device_message.extend_from_slice(&creds.signed_identity_key.public);
    device_message.extend_from_slice(&account.public);
    assert!(verify_message(
        creds.signed_identity_key.public,
        &device_message,
        &stored.device_signature
    ));

    // The reply strips the account signature key and echoes the key index.
    let reply = actions
        .iter()
        .find_map(|action| match action {
            AuthAction::SendNode(node) => Some(node.clone()),
            _ => None,
        })
        .expect("reply sent");
    assert_eq!(reply.attr("id"), Some("pair-2"));
    let device_identity = reply
        .child("pair-device-sign")
        .and_then(|sign| sign.child("device-identity"))
        .expect("device-identity");
    assert_eq!(device_identity.attr("key-index"), Some("2"));
    let echoed = AdvSignedDeviceIdentity::decode(device_identity.bytes().expect("bytes"))?;
    assert!(echoed.account_signature_key.is_empty());
    assert!(!echoed.device_signature.is_empty());

    assert!(
        actions
            .iter()
            .any(|action| matches!(action, AuthAction::CredsUpdated))
    );
    assert!(actions.iter().any(|action| matches!(
        action,
        AuthAction::Emit(update) if update.is_new_login == Some(true)
    )));
    assert_eq!(auth.state(), AuthState::Authenticated);
    Ok(())
}

#[test]
fn pair_success_with_bad_hmac_changes_nothing_and_closes() {
    let mut auth = Authenticator::new();
    let mut creds = init_auth_creds();
    let account = generate_keypair();
    let before = creds.clone();

    let mut node = pair_success_iq(&creds, &account);
    // Corrupt the HMAC inside the device-identity blob.
    let pair_success = node.child("pair-success").unwrap().clone();
    let mut wrapped = AdvSignedDeviceIdentityHmac::decode(
        pair_success
            .child("device-identity")
            .and_then(Node::bytes)
            .unwrap(),
    )
    .unwrap();
    wrapped.hmac[0] ^= 0xFF;
    node = Node::with_children(
        "iq",
        node.attrs.clone(),
        vec![Node::with_children(
            "pair-success",
            attrs([]),
            vec![
                Node::with_bytes("device-identity", attrs([]), wrapped.encode_to_vec()),
                Node::new("device", attrs([("jid", "5511912345678:4@s.whatsapp.net")])),
            ],
        )],
    );

    let result = auth.handle_node(&node, &mut creds);
    assert!(matches!(result, Err(AuthError::InvalidDeviceIdentityHmac)));
    assert_eq!(creds, before);
}

#[test]
fn pair_success_is_guarded_against_reentry() -> anyhow::Result<()> {
    let mut auth = Authenticator::new();
    let mut creds = init_auth_creds();
    let account = generate_keypair();
    let node = pair_success_iq(&creds, &account);

    let first = auth.handle_node(&node, &mut creds)?;
    assert!(!first.is_empty());

    let second = auth.handle_node(&node, &mut creds)?;
    assert!(second.is_empty());
    Ok(())
}

#[test]
fn login_success_reconciles_creds_and_opens() -> anyhow::Result<()> {
    let mut auth = Authenticator::new();
    let mut creds = init_auth_creds();
    creds.me = Some(wacore::creds::MeInfo {
        id: "5511912345678@s.whatsapp.net".parse()?,
        name: Some("old name".into()),
    });

    let node = Node::new(
        "success",
        attrs([("platform", "smba"), ("pushname", "fresh name")]),
    );
    let actions = auth.handle_node(&node, &mut creds)?;

    assert!(creds.registered);
    assert_eq!(creds.platform.as_deref(), Some("smba"));
    assert_eq!(
        creds.me.as_ref().and_then(|me| me.name.as_deref()),
        Some("fresh name")
    );
    assert!(
        actions
            .iter()
            .any(|action| matches!(action, AuthAction::CredsUpdated))
    );
    assert!(actions.iter().any(|action| matches!(
        action,
        AuthAction::Emit(update) if update.connection == Some(ConnectionStatus::Open)
    )));
    assert_eq!(auth.state(), AuthState::Authenticated);
    Ok(())
}

#[test]
fn login_failure_defaults_to_401_and_requests_teardown() -> anyhow::Result<()> {
    let mut auth = Authenticator::new();
    let mut creds = init_auth_creds();

    let actions = auth.handle_node(&Node::new("fail", attrs([])), &mut creds)?;
    let close_error = actions
        .iter()
        .find_map(|action| match action {
            AuthAction::Close { error } => error.clone(),
            _ => None,
        })
        .expect("close requested");
    assert!(close_error.contains("401"));
    assert_eq!(auth.state(), AuthState::Failed);

    let actions = auth.handle_node(
        &Node::new("fail", attrs([("reason", "403")])),
        &mut creds,
    )?;
    assert!(actions.iter().any(|action| matches!(
        action,
        AuthAction::Close { error: Some(error) } if error.contains("403")
    )));
    Ok(())
}

#[test]
fn stream_error_is_tolerated() -> anyhow::Result<()> {
    let mut auth = Authenticator::new();
    let mut creds = init_auth_creds();
    let actions = auth.handle_node(
        &Node::new("stream:error", attrs([("code", "515")])),
        &mut creds,
    )?;
    assert!(
        !actions
            .iter()
            .any(|action| matches!(action, AuthAction::Close { .. }))
    );
    Ok(())
}

#[test]
fn qr_string_format_matches_expected_layout() {
    let noise = [1_u8; 32];
    let identity = [2_u8; 32];
    let secret = [3_u8; 32];
    let qr = wacore::generate_qr_string("2@ref", &noise, &identity, &secret);

    let parts: Vec<&str> = qr.split(',').collect();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0], "2@ref");
    assert_eq!(parts[1], STANDARD.encode(noise));
    assert_eq!(parts[2], STANDARD.encode(identity));
    assert_eq!(STANDARD.decode(parts[3]).unwrap(), secret.to_vec());
}
