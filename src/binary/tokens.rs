//! Token dictionaries and tag bytes for the compact stanza wire format.
//!
//! Tag bytes 1..=235 index the single-byte token table; 236..=255 are the
//! structural markers below. Double-byte tokens are addressed by one of four
//! dictionary markers followed by an index byte.

use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const LIST_EMPTY: u8 = 0;
pub const DICTIONARY_0: u8 = 236;
pub const DICTIONARY_1: u8 = 237;
pub const DICTIONARY_2: u8 = 238;
pub const DICTIONARY_3: u8 = 239;
pub const AD_JID: u8 = 247;
pub const LIST_8: u8 = 248;
pub const LIST_16: u8 = 249;
pub const JID_PAIR: u8 = 250;
pub const HEX_8: u8 = 251;
pub const BINARY_8: u8 = 252;
pub const BINARY_20: u8 = 253;
pub const BINARY_32: u8 = 254;
pub const NIBBLE_8: u8 = 255;

/// Leading stanza flag bit marking a zlib-compressed body.
pub const FLAG_COMPRESSED: u8 = 0x02;

/// Single-byte token table; index 0 is reserved (collides with LIST_EMPTY).
pub const SINGLE_BYTE_TOKENS: &[&str] = &[
    "",
    "xmlstreamstart",
    "xmlstreamend",
    "s.whatsapp.net",
    "type",
    "participant",
    "from",
    "receipt",
    "id",
    "broadcast",
    "status",
    "unavailable",
    "notification",
    "notify",
    "to",
    "jid",
    "user",
    "class",
    "offline",
    "g.us",
    "result",
    "mediatype",
    "enc",
    "skmsg",
    "off_cnt",
    "xmlns",
    "presence",
    "participants",
    "ack",
    "t",
    "iq",
    "device_hash",
    "read",
    "value",
    "media",
    "picture",
    "chatstate",
    "unknown",
    "image",
    "device",
    "add",
    "edge_routing",
    "routing_info",
    "get",
    "read-self",
    "urn:xmpp:whatsapp:push",
    "category",
    "message",
    "composing",
    "phash",
    "set",
    "error",
    "available",
    "text",
    "urn:xmpp:whatsapp:dirty",
    "remove",
    "w:profile:picture",
    "notice",
    "w:p",
    "url",
    "video",
    "fail",
    "lid",
    "count",
    "verified_name",
    "w:stats",
    "delete",
    "vertical",
    "duration",
    "creation",
    "meta",
    "preview",
    "config_value",
    "sticker",
    "config_code",
    "code",
    "fallback_class",
    "config_expo_param",
    "device-identity",
    "pair-device",
    "pair-success",
    "pair-device-sign",
    "ref",
    "ping",
    "success",
    "stream:error",
    "active",
    "platform",
    "biz",
    "key-index",
    "contact",
    "subject",
    "subscribe",
    "unsubscribe",
    "location",
    "document",
    "audio",
    "gif",
    "retry",
    "direct_path",
    "file_length",
    "file_sha256",
    "file_enc_sha256",
    "media_key",
    "width",
    "height",
    "mimetype",
    "w:gp2",
    "create",
    "leave",
    "invite",
    "promote",
    "demote",
    "member",
    "admin",
    "superadmin",
    "announcement",
    "locked",
    "unlocked",
    "not-authorized",
    "item-not-found",
    "service-unavailable",
    "internal-server-error",
    "bad-request",
    "forbidden",
    "conflict",
    "expired",
    "replaced",
    "device_sort_version",
    "props",
    "prop",
    "name",
    "version",
    "true",
    "false",
];

/// Double-byte token tables, one per dictionary marker.
pub const DOUBLE_BYTE_TOKENS: [&[&str]; 4] = [
    &[
        "media-gig2-1.cdn.whatsapp.net",
        "media-bog1-1.cdn.whatsapp.net",
        "media-mia3-1.cdn.whatsapp.net",
        "media-mia3-2.cdn.whatsapp.net",
        "media-eze1-1.cdn.whatsapp.net",
        "account_sync",
        "status_v3",
        "status_v4",
        "disappearing_mode",
        "ephemeral",
        "privacy",
        "blocklist",
        "block",
        "unblock",
        "encrypt",
        "registration",
        "identity",
        "skey",
        "pre-key",
        "list",
        "w:m",
        "w:profile:picture:stream",
        "w:web",
        "w:sync:app:state",
        "collection",
        "patch",
        "snapshot",
        "critical_block",
        "critical_unblock_low",
        "regular_high",
        "regular_low",
        "regular",
    ],
    &[
        "verified_biz_name",
        "biz-cover-photo",
        "business",
        "business_hours",
        "business_hours_config",
        "catalog_status",
        "catalog_not_created",
        "commerce_experience",
        "open_now",
        "day_of_week",
        "mode",
        "specific_hours",
        "profile_options",
        "cart_enabled",
        "direct_connection",
        "shops",
        "order",
        "payment",
        "invoice",
    ],
    &[
        "newsletter",
        "newsletter_admin_count",
        "newsletter_message",
        "newsletter_subscribers",
        "mute",
        "unmute",
        "plaintext",
        "reaction",
        "view_once",
        "server_sync",
        "fbid",
        "fbid:devices",
        "fbid:thread",
        "fbid:user",
    ],
    &[
        "mexp",
        "tctoken",
        "tokens",
        "dirty",
        "clean",
        "groups",
        "history",
        "app_state_sync_key_share",
        "app_state_sync_key_request",
        "md_app_state",
        "md_blocklist",
        "companion_enc_static",
        "companion_platform_id",
        "companion_platform_display",
        "companion_server_auth_key_pub",
    ],
];

/// Reverse index: token string to single-byte tag.
static SINGLE_BYTE_INDEX: Lazy<HashMap<&'static str, u8>> = Lazy::new(|| {
    SINGLE_BYTE_TOKENS
        .iter()
        .enumerate()
        .skip(1)
        .map(|(index, token)| (*token, index as u8))
        .collect()
});

/// Reverse index: token string to (dictionary, index) pair.
static DOUBLE_BYTE_INDEX: Lazy<HashMap<&'static str, (u8, u8)>> = Lazy::new(|| {
    let mut index = HashMap::new();
    for (dict, tokens) in DOUBLE_BYTE_TOKENS.iter().enumerate() {
        for (position, token) in tokens.iter().enumerate() {
            index.insert(*token, (dict as u8, position as u8));
        }
    }
    index
});

/// Looks up the single-byte tag for a token.
pub fn single_byte_token(symbol: &str) -> Option<u8> {
    SINGLE_BYTE_INDEX.get(symbol).copied()
}

/// Looks up the (dictionary, index) pair for a double-byte token.
pub fn double_byte_token(symbol: &str) -> Option<(u8, u8)> {
    DOUBLE_BYTE_INDEX.get(symbol).copied()
}

/// Resolves a single-byte token by tag value.
pub fn resolve_single(tag: u8) -> Option<&'static str> {
    SINGLE_BYTE_TOKENS
        .get(tag as usize)
        .copied()
        .filter(|token| !token.is_empty())
}

/// Resolves a double-byte token by dictionary and index.
pub fn resolve_double(dict: u8, index: u8) -> Option<&'static str> {
    DOUBLE_BYTE_TOKENS
        .get(dict as usize)
        .and_then(|tokens| tokens.get(index as usize))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_tokens_fit_below_first_marker() {
        assert!(SINGLE_BYTE_TOKENS.len() <= DICTIONARY_0 as usize);
    }

    #[test]
    fn reverse_index_round_trips() {
        let tag = single_byte_token("s.whatsapp.net").expect("token");
        assert_eq!(resolve_single(tag), Some("s.whatsapp.net"));

        let (dict, index) = double_byte_token("pre-key").expect("token");
        assert_eq!(resolve_double(dict, index), Some("pre-key"));
    }

    #[test]
    fn reserved_index_zero_is_never_resolvable() {
        assert_eq!(resolve_single(0), None);
        assert_eq!(single_byte_token(""), None);
    }
}
