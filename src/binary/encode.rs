use std::str::FromStr;

use crate::binary::jid::{DEFAULT_USER_SERVER, Jid, LID_SERVER};
use crate::binary::node::{Node, NodeContent};
use crate::binary::tokens::{
    AD_JID, BINARY_8, BINARY_20, BINARY_32, DICTIONARY_0, JID_PAIR, LIST_8, LIST_16, LIST_EMPTY,
    double_byte_token, single_byte_token,
};
use crate::error::BinaryError;

/// Encodes a [`Node`] into its framed wire form. The body is never
/// compressed on the way out, so the flag byte is always zero.
pub fn encode(node: &Node) -> Result<Vec<u8>, BinaryError> {
    let mut out = vec![0_u8];
    write_node(node, &mut out)?;
    Ok(out)
}

fn write_node(node: &Node, out: &mut Vec<u8>) -> Result<(), BinaryError> {
    let has_content = !matches!(node.content, NodeContent::None);
    let size = 1 + 2 * node.attrs.len() + usize::from(has_content);
    write_list_start(size, out)?;

    write_string(&node.tag, out)?;
    for (key, value) in &node.attrs {
        write_string(key, out)?;
        write_string(value, out)?;
    }

    match &node.content {
        NodeContent::None => {}
        NodeContent::Nodes(children) => {
            write_list_start(children.len(), out)?;
            for child in children {
                write_node(child, out)?;
            }
        }
        NodeContent::Bytes(payload) => write_bytes(payload, out)?,
        NodeContent::Text(text) => write_string(text, out)?,
    }

    Ok(())
}

fn write_list_start(size: usize, out: &mut Vec<u8>) -> Result<(), BinaryError> {
    if size == 0 {
        out.push(LIST_EMPTY);
    } else if size < 256 {
        out.push(LIST_8);
        out.push(size as u8);
    } else if size < 65_536 {
        out.push(LIST_16);
        out.extend_from_slice(&(size as u16).to_be_bytes());
    } else {
        return Err(BinaryError::ListTooLong(size));
    }
    Ok(())
}

fn write_string(symbol: &str, out: &mut Vec<u8>) -> Result<(), BinaryError> {
    if let Some(tag) = single_byte_token(symbol) {
        out.push(tag);
        return Ok(());
    }

    if let Some((dict, index)) = double_byte_token(symbol) {
        out.push(DICTIONARY_0 + dict);
        out.push(index);
        return Ok(());
    }

    if symbol.contains('@') {
        if let Ok(jid) = Jid::from_str(symbol) {
            if jid_encodable(&jid) {
                return write_jid(&jid, out);
            }
        }
    }

    write_bytes(symbol.as_bytes(), out)
}

// AD encoding only expresses the two agent-addressable servers; anything
// else falls back to a plain string payload.
fn jid_encodable(jid: &Jid) -> bool {
    if !jid.is_ad() {
        return true;
    }

    !jid.user.is_empty()
        && (jid.server == LID_SERVER
            || (jid.server == DEFAULT_USER_SERVER && jid.agent.unwrap_or(0) == 0))
}

fn write_jid(jid: &Jid, out: &mut Vec<u8>) -> Result<(), BinaryError> {
    if jid.is_ad() {
        let agent = match jid.agent {
            Some(agent) => agent,
            None if jid.server == LID_SERVER => 1,
            None => 0,
        };

        out.push(AD_JID);
        out.push(agent);
        out.push(jid.device.unwrap_or(0));
        return write_string(&jid.user, out);
    }

    out.push(JID_PAIR);
    if jid.user.is_empty() {
        out.push(LIST_EMPTY);
    } else {
        write_string(&jid.user, out)?;
    }
    write_string(&jid.server, out)
}

fn write_bytes(payload: &[u8], out: &mut Vec<u8>) -> Result<(), BinaryError> {
    let len = payload.len();
    if len < 256 {
        out.push(BINARY_8);
        out.push(len as u8);
    } else if len < (1 << 20) {
        out.push(BINARY_20);
        out.push(((len >> 16) & 0x0F) as u8);
        out.push(((len >> 8) & 0xFF) as u8);
        out.push((len & 0xFF) as u8);
    } else if u32::try_from(len).is_ok() {
        out.push(BINARY_32);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    } else {
        return Err(BinaryError::PayloadTooLarge);
    }

    out.extend_from_slice(payload);
    Ok(())
}
