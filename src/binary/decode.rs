use std::io::Read;

use bytes::Bytes;

use crate::binary::jid::{DEFAULT_USER_SERVER, Jid, LID_SERVER};
use crate::binary::node::{Attrs, Node, NodeContent};
use crate::binary::tokens::{
    AD_JID, BINARY_8, BINARY_20, BINARY_32, DICTIONARY_0, DICTIONARY_3, FLAG_COMPRESSED, HEX_8,
    JID_PAIR, LIST_8, LIST_16, LIST_EMPTY, NIBBLE_8, resolve_double, resolve_single,
};
use crate::error::BinaryError;

/// Decodes a framed stanza payload into a [`Node`]. The leading flag byte
/// may mark a zlib-compressed body.
pub fn decode(input: &[u8]) -> Result<Node, BinaryError> {
    let (flags, body) = input
        .split_first()
        .ok_or(BinaryError::UnexpectedEof(0))?;

    if flags & FLAG_COMPRESSED != 0 {
        let mut inflated = Vec::new();
        flate2::read::ZlibDecoder::new(body)
            .read_to_end(&mut inflated)
            .map_err(|error| BinaryError::Inflate(error.to_string()))?;
        return decode_body(&inflated);
    }

    decode_body(body)
}

fn decode_body(body: &[u8]) -> Result<Node, BinaryError> {
    let mut decoder = Decoder::new(body);
    let node = decoder.read_node()?;

    if !decoder.is_eof() {
        return Err(BinaryError::TrailingBytes(decoder.position));
    }

    Ok(node)
}

struct Decoder<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }

    fn is_eof(&self) -> bool {
        self.position == self.input.len()
    }

    fn read_node(&mut self) -> Result<Node, BinaryError> {
        let size_tag = self.read_u8()?;
        let size = self.read_list_size(size_tag)?;
        if size == 0 {
            return Err(BinaryError::UnknownTag {
                tag: LIST_EMPTY,
                offset: self.position.saturating_sub(1),
            });
        }

        let tag_byte = self.read_u8()?;
        let tag = self.read_string(tag_byte)?;

        let attr_count = (size - 1) / 2;
        let mut attrs = Attrs::with_capacity(attr_count);
        for _ in 0..attr_count {
            let key_byte = self.read_u8()?;
            let key = self.read_string(key_byte)?;
            let value_byte = self.read_u8()?;
            let value = self.read_string(value_byte)?;
            attrs.insert(key, value);
        }

        // An even list size means one trailing content element.
        let content = if size % 2 == 0 {
            self.read_content()?
        } else {
            NodeContent::None
        };

        Ok(Node {
            tag,
            attrs,
            content,
        })
    }

    fn read_content(&mut self) -> Result<NodeContent, BinaryError> {
        let tag = self.read_u8()?;
        match tag {
            LIST_EMPTY | LIST_8 | LIST_16 => {
                let count = self.read_list_size(tag)?;
                let mut nodes = Vec::with_capacity(count);
                for _ in 0..count {
                    nodes.push(self.read_node()?);
                }
                Ok(NodeContent::Nodes(nodes))
            }
            BINARY_8 => {
                let len = self.read_u8()? as usize;
                let payload = self.read_bytes(len)?;
                Ok(NodeContent::Bytes(Bytes::copy_from_slice(payload)))
            }
            BINARY_20 => {
                let len = self.read_u20()?;
                let payload = self.read_bytes(len)?;
                Ok(NodeContent::Bytes(Bytes::copy_from_slice(payload)))
            }
            BINARY_32 => {
                let len = self.read_u32()? as usize;
                let payload = self.read_bytes(len)?;
                Ok(NodeContent::Bytes(Bytes::copy_from_slice(payload)))
            }
            other => Ok(NodeContent::Text(self.read_string(other)?)),
        }
    }

    fn read_list_size(&mut self, tag: u8) -> Result<usize, BinaryError> {
        match tag {
            LIST_EMPTY => Ok(0),
            LIST_8 => Ok(self.read_u8()? as usize),
            LIST_16 => Ok(self.read_u16()? as usize),
            other => Err(BinaryError::UnknownTag {
                tag: other,
                offset: self.position.saturating_sub(1),
            }),
        }
    }

    fn read_string(&mut self, tag: u8) -> Result<String, BinaryError> {
        match tag {
            LIST_EMPTY => Ok(String::new()),
            token_tag if token_tag < DICTIONARY_0 => resolve_single(token_tag)
                .map(str::to_owned)
                .ok_or(BinaryError::UnknownTag {
                    tag: token_tag,
                    offset: self.position.saturating_sub(1),
                }),
            DICTIONARY_0..=DICTIONARY_3 => {
                let dict = tag - DICTIONARY_0;
                let index = self.read_u8()?;
                resolve_double(dict, index).map(str::to_owned).ok_or(
                    BinaryError::UnknownDictionaryToken {
                        dict,
                        index,
                        offset: self.position.saturating_sub(1),
                    },
                )
            }
            JID_PAIR => self.read_jid_pair(),
            AD_JID => self.read_ad_jid(),
            HEX_8 => self.read_packed(hex_char),
            NIBBLE_8 => self.read_packed(nibble_char),
            BINARY_8 => {
                let len = self.read_u8()? as usize;
                self.read_utf8(len)
            }
            BINARY_20 => {
                let len = self.read_u20()?;
                self.read_utf8(len)
            }
            BINARY_32 => {
                let len = self.read_u32()? as usize;
                self.read_utf8(len)
            }
            other => Err(BinaryError::UnknownTag {
                tag: other,
                offset: self.position.saturating_sub(1),
            }),
        }
    }

    fn read_jid_pair(&mut self) -> Result<String, BinaryError> {
        let user_tag = self.read_u8()?;
        let user = self.read_string(user_tag)?;
        let server_tag = self.read_u8()?;
        let server = self.read_string(server_tag)?;
        if server.is_empty() {
            return Err(BinaryError::InvalidJid("jid pair without server".into()));
        }

        Ok(format!("{user}@{server}"))
    }

    fn read_ad_jid(&mut self) -> Result<String, BinaryError> {
        let agent = self.read_u8()?;
        let device = self.read_u8()?;
        let user_tag = self.read_u8()?;
        let user = self.read_string(user_tag)?;
        if user.is_empty() {
            return Err(BinaryError::InvalidJid("ad jid without user".into()));
        }

        let server = if agent == 0 {
            DEFAULT_USER_SERVER
        } else {
            LID_SERVER
        };
        let jid = Jid {
            user,
            server: server.to_owned(),
            agent: (agent > 1).then_some(agent),
            device: Some(device),
        };
        Ok(jid.to_string())
    }

    fn read_packed(
        &mut self,
        unpack: impl Fn(u8) -> Option<char>,
    ) -> Result<String, BinaryError> {
        let start = self.read_u8()?;
        let byte_count = (start & 0x7F) as usize;
        let drop_trailing = start & 0x80 != 0;

        let mut out = String::with_capacity(byte_count * 2);
        for index in 0..byte_count {
            let offset = self.position;
            let byte = self.read_u8()?;
            let high = byte >> 4;
            let low = byte & 0x0F;

            out.push(unpack(high).ok_or(BinaryError::InvalidNibble {
                value: high,
                offset,
            })?);

            // The flagged trailing half-byte is padding and never validated.
            if drop_trailing && index == byte_count - 1 {
                continue;
            }
            out.push(unpack(low).ok_or(BinaryError::InvalidNibble { value: low, offset })?);
        }

        Ok(out)
    }

    fn read_utf8(&mut self, len: usize) -> Result<String, BinaryError> {
        let offset = self.position;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BinaryError::InvalidUtf8(offset))
    }

    fn read_u8(&mut self) -> Result<u8, BinaryError> {
        let byte = self
            .input
            .get(self.position)
            .copied()
            .ok_or(BinaryError::UnexpectedEof(self.position))?;
        self.position += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, BinaryError> {
        let raw = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn read_u20(&mut self) -> Result<usize, BinaryError> {
        let raw = self.read_bytes(3)?;
        Ok((((raw[0] & 0x0F) as usize) << 16) | ((raw[1] as usize) << 8) | raw[2] as usize)
    }

    fn read_u32(&mut self) -> Result<u32, BinaryError> {
        let raw = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BinaryError> {
        let end = self
            .position
            .checked_add(len)
            .ok_or(BinaryError::UnexpectedEof(self.position))?;

        if end > self.input.len() {
            return Err(BinaryError::UnexpectedEof(self.position));
        }

        let bytes = &self.input[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

fn nibble_char(value: u8) -> Option<char> {
    match value {
        0..=9 => Some((b'0' + value) as char),
        10 => Some('-'),
        11 => Some('.'),
        _ => None,
    }
}

fn hex_char(value: u8) -> Option<char> {
    match value {
        0..=9 => Some((b'0' + value) as char),
        10..=15 => Some((b'A' + value - 10) as char),
        _ => None,
    }
}
