//! Compact stanza codec: the token-dictionary wire format WhatsApp Web
//! speaks after the Noise transport layer is stripped.

mod decode;
mod encode;
pub mod jid;
pub mod node;
pub mod tokens;

pub use decode::decode;
pub use encode::encode;
pub use jid::Jid;
pub use node::{Attrs, Node, NodeContent, attrs};
