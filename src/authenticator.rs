use std::collections::VecDeque;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use prost::Message;

use crate::binary::{Jid, Node, NodeContent, attrs};
use crate::creds::{AuthenticationCreds, MeInfo, SignalAddress, SignalIdentity};
use crate::crypto::hmac_sha256;
use crate::error::AuthError;
use crate::events::{ConnectionStatus, ConnectionUpdate};
use crate::keys::{sign_message, signal_public_key, verify_message};
use crate::proto::{AdvDeviceIdentity, AdvSignedDeviceIdentity, AdvSignedDeviceIdentityHmac};

/// First QR is shown for a full minute, refreshes rotate faster.
pub const QR_TIMEOUT_FIRST: Duration = Duration::from_secs(60);
pub const QR_TIMEOUT_REFRESH: Duration = Duration::from_secs(20);

const ACCOUNT_SIGNATURE_PREFIX: [u8; 2] = [0x06, 0x00];
const DEVICE_SIGNATURE_PREFIX: [u8; 2] = [0x06, 0x01];

/// Pairing/login progress of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Handshaking,
    AwaitingQr,
    QrShown { retry: u32 },
    AwaitingPairSuccess,
    Authenticated,
    Failed,
}

/// Side effects the connection manager executes on the authenticator's
/// behalf; the authenticator itself never touches the wire or timers.
#[derive(Debug, Clone)]
pub enum AuthAction {
    SendNode(Node),
    Emit(ConnectionUpdate),
    CredsUpdated,
    ScheduleQrTimeout(Duration),
    CancelQrTimeout,
    Close { error: Option<String> },
}

/// Consumes inbound stanzas and drives pairing and login.
#[derive(Debug)]
pub struct Authenticator {
    state: AuthState,
    qr_refs: VecDeque<String>,
    qr_retry_count: u32,
    processing_pair_success: bool,
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator {
    pub fn new() -> Self {
        Self {
            state: AuthState::Idle,
            qr_refs: VecDeque::new(),
            qr_retry_count: 0,
            processing_pair_success: false,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn qr_retry_count(&self) -> u32 {
        self.qr_retry_count
    }

    /// Marks the handshake as in flight.
    pub fn on_handshaking(&mut self) {
        self.state = AuthState::Handshaking;
    }

    /// Marks the encrypted session as established; pairing stanzas follow.
    pub fn on_open(&mut self) {
        self.state = AuthState::AwaitingQr;
    }

    /// Dispatches one inbound stanza. Unknown stanzas produce no actions.
    pub fn handle_node(
        &mut self,
        node: &Node,
        creds: &mut AuthenticationCreds,
    ) -> Result<Vec<AuthAction>, AuthError> {
        match node.tag.as_str() {
            "iq" if node.child("pair-device").is_some() && node.attr("type") == Some("set") => {
                self.handle_pair_device(node, creds)
            }
            "iq" if node.child("pair-success").is_some() => self.handle_pair_success(node, creds),
            "success" => Ok(self.handle_login_success(node, creds)),
            "fail" => Ok(self.handle_login_failure(node)),
            "stream:error" => {
                tracing::warn!(attrs = ?node.attrs, "stream error from server");
                Ok(vec![AuthAction::Emit(ConnectionUpdate {
                    error: Some("stream errored".to_owned()),
                    ..ConnectionUpdate::default()
                })])
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Advances the QR rotation when the refresh timeout fires. Running out
    /// of refs is a fatal pairing failure.
    pub fn on_qr_timeout(&mut self, creds: &AuthenticationCreds) -> Vec<AuthAction> {
        self.qr_retry_count += 1;
        self.next_qr(creds)
    }

    fn handle_pair_device(
        &mut self,
        node: &Node,
        creds: &AuthenticationCreds,
    ) -> Result<Vec<AuthAction>, AuthError> {
        let pair_device = node
            .child("pair-device")
            .ok_or(AuthError::MissingPairElement("pair-device"))?;

        let refs: VecDeque<String> = pair_device
            .children()
            .iter()
            .filter(|child| child.tag == "ref")
            .filter_map(ref_text)
            .collect();
        if refs.is_empty() {
            return Err(AuthError::EmptyRefList);
        }

        self.qr_refs = refs;
        self.qr_retry_count = 0;

        let mut actions = vec![AuthAction::SendNode(ack_iq(node))];
        actions.extend(self.next_qr(creds));
        Ok(actions)
    }

    fn next_qr(&mut self, creds: &AuthenticationCreds) -> Vec<AuthAction> {
        let Some(reference) = self.qr_refs.pop_front() else {
            self.state = AuthState::Failed;
            let error = AuthError::QrRefsExhausted(self.qr_retry_count).to_string();
            return vec![
                AuthAction::Emit(ConnectionUpdate {
                    connection: Some(ConnectionStatus::Close),
                    error: Some(error.clone()),
                    ..ConnectionUpdate::default()
                }),
                AuthAction::Close { error: Some(error) },
            ];
        };

        let qr = generate_qr_string(
            &reference,
            &creds.noise_key.public,
            &creds.signed_identity_key.public,
            &creds.adv_secret_key,
        );
        let timeout = if self.qr_retry_count == 0 {
            QR_TIMEOUT_FIRST
        } else {
            QR_TIMEOUT_REFRESH
        };
        self.state = AuthState::QrShown {
            retry: self.qr_retry_count,
        };

        vec![
            AuthAction::Emit(ConnectionUpdate::qr(qr)),
            AuthAction::ScheduleQrTimeout(timeout),
        ]
    }

    fn handle_pair_success(
        &mut self,
        node: &Node,
        creds: &mut AuthenticationCreds,
    ) -> Result<Vec<AuthAction>, AuthError> {
        if self.processing_pair_success {
            return Ok(Vec::new());
        }
        self.processing_pair_success = true;
        self.state = AuthState::AwaitingPairSuccess;

        let msg_id = node.attr("id").unwrap_or_default().to_owned();
        let pair_success = node
            .child("pair-success")
            .ok_or(AuthError::MissingPairElement("pair-success"))?;

        let identity_bytes = pair_success
            .child("device-identity")
            .and_then(Node::bytes)
            .ok_or(AuthError::MissingPairElement("device-identity"))?;
        let device_jid: Jid = pair_success
            .child("device")
            .and_then(|device| device.attr("jid"))
            .ok_or(AuthError::MissingPairElement("device"))?
            .parse()?;
        let platform = pair_success
            .child("platform")
            .and_then(|platform| platform.attr("name"))
            .map(str::to_owned);
        let biz_name = pair_success
            .child("biz")
            .and_then(|biz| biz.attr("name"))
            .map(str::to_owned);

        let wrapped = AdvSignedDeviceIdentityHmac::decode(identity_bytes)?;
        let expected_hmac = hmac_sha256(&creds.adv_secret_key, &wrapped.details);
        if expected_hmac[..] != wrapped.hmac[..] {
            return Err(AuthError::InvalidDeviceIdentityHmac);
        }

        let mut identity = AdvSignedDeviceIdentity::decode(wrapped.details.as_slice())?;

        let account_signature_key: [u8; 32] = identity
            .account_signature_key
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::InvalidAccountSignature)?;
        let mut account_message = Vec::with_capacity(2 + identity.details.len() + 32);
        account_message.extend_from_slice(&ACCOUNT_SIGNATURE_PREFIX);
        account_message.extend_from_slice(&identity.details);
        account_message.extend_from_slice(&creds.signed_identity_key.public);
        if !verify_message(
            account_signature_key,
            &account_message,
            &identity.account_signature,
        ) {
            return Err(AuthError::InvalidAccountSignature);
        }

        let mut device_message =
            Vec::with_capacity(2 + identity.details.len() + 32 + account_signature_key.len());
        device_message.extend_from_slice(&DEVICE_SIGNATURE_PREFIX);
        device_message.extend_from_slice(&identity.details);
        device_message.extend_from_slice(&creds.signed_identity_key.public);
        device_message.extend_from_slice(&account_signature_key);
        identity.device_signature = sign_message(
            creds.signed_identity_key.private,
            creds.signed_identity_key.public,
            &device_message,
        )
        .to_vec();

        let key_index = AdvDeviceIdentity::decode(identity.details.as_slice())?.key_index;

        creds.me = Some(MeInfo {
            id: device_jid.clone(),
            name: biz_name,
        });
        creds.platform = platform;
        creds.signal_identities.push(SignalIdentity {
            identifier: SignalAddress {
                name: device_jid.to_string(),
                device_id: 0,
            },
            identifier_key: signal_public_key(&account_signature_key).to_vec(),
        });
        creds.account = Some(identity.encode_to_vec());
        creds.registered = true;

        // The reply omits the account signature key.
        let reply_identity = AdvSignedDeviceIdentity {
            account_signature_key: Vec::new(),
            ..identity
        };
        let reply = Node::with_children(
            "iq",
            attrs([
                ("to", "@s.whatsapp.net"),
                ("type", "result"),
                ("id", &msg_id),
            ]),
            vec![Node::with_children(
                "pair-device-sign",
                attrs([]),
                vec![Node::with_bytes(
                    "device-identity",
                    attrs([("key-index", &key_index.to_string())]),
                    reply_identity.encode_to_vec(),
                )],
            )],
        );

        self.state = AuthState::Authenticated;

        // The server tears the socket down itself after the counter-sign.
        Ok(vec![
            AuthAction::CancelQrTimeout,
            AuthAction::SendNode(reply),
            AuthAction::CredsUpdated,
            AuthAction::Emit(ConnectionUpdate {
                is_new_login: Some(true),
                ..ConnectionUpdate::default()
            }),
        ])
    }

    fn handle_login_success(
        &mut self,
        node: &Node,
        creds: &mut AuthenticationCreds,
    ) -> Vec<AuthAction> {
        self.state = AuthState::Authenticated;

        let mut changed = false;
        if let Some(platform) = node.attr("platform") {
            if creds.platform.as_deref() != Some(platform) {
                creds.platform = Some(platform.to_owned());
                changed = true;
            }
        }
        if let Some(push_name) = node.attr("pushname") {
            if let Some(me) = creds.me.as_mut() {
                if me.name.as_deref() != Some(push_name) {
                    me.name = Some(push_name.to_owned());
                    changed = true;
                }
            }
        }
        if !creds.registered {
            creds.registered = true;
            changed = true;
        }

        let mut actions = vec![AuthAction::CancelQrTimeout];
        if changed {
            actions.push(AuthAction::CredsUpdated);
        }
        actions.push(AuthAction::Emit(ConnectionUpdate::status(
            ConnectionStatus::Open,
        )));
        actions
    }

    fn handle_login_failure(&mut self, node: &Node) -> Vec<AuthAction> {
        let code = node
            .attr("reason")
            .and_then(|reason| reason.parse::<u16>().ok())
            .unwrap_or(401);
        self.state = AuthState::Failed;

        let error = AuthError::LoginFailure { code }.to_string();
        vec![
            AuthAction::CancelQrTimeout,
            AuthAction::Emit(ConnectionUpdate {
                connection: Some(ConnectionStatus::Close),
                error: Some(error.clone()),
                ..ConnectionUpdate::default()
            }),
            AuthAction::Close { error: Some(error) },
        ]
    }
}

/// Builds the QR payload string in the expected comma-separated format.
pub fn generate_qr_string(
    reference: &str,
    noise_public: &[u8; 32],
    identity_public: &[u8; 32],
    adv_secret_key: &[u8; 32],
) -> String {
    format!(
        "{reference},{},{},{}",
        STANDARD.encode(noise_public),
        STANDARD.encode(identity_public),
        STANDARD.encode(adv_secret_key)
    )
}

fn ref_text(node: &Node) -> Option<String> {
    match &node.content {
        NodeContent::Bytes(bytes) => std::str::from_utf8(bytes).ok().map(str::to_owned),
        NodeContent::Text(text) => Some(text.clone()),
        _ => None,
    }
    .map(|value| value.trim().to_owned())
    .filter(|value| !value.is_empty())
}

fn ack_iq(node: &Node) -> Node {
    Node::new(
        "iq",
        attrs([
            ("to", "@s.whatsapp.net"),
            ("type", "result"),
            ("id", node.attr("id").unwrap_or_default()),
        ]),
    )
}
