use bytes::Bytes;
use indexmap::IndexMap;

/// Attribute map; insertion order is preserved for deterministic encodes,
/// equality ignores order.
pub type Attrs = IndexMap<String, String>;

/// Stanza tree node used as the application-layer message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    /// Node tag.
    pub tag: String,
    /// Node attributes.
    pub attrs: Attrs,
    /// Node body.
    pub content: NodeContent,
}

/// Body content carried by a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NodeContent {
    /// No body.
    #[default]
    None,
    /// Nested child nodes.
    Nodes(Vec<Node>),
    /// Raw payload bytes.
    Bytes(Bytes),
    /// Token, JID or packed string body.
    Text(String),
}

impl Node {
    /// Builds a node without content.
    pub fn new(tag: impl Into<String>, attrs: Attrs) -> Self {
        Self {
            tag: tag.into(),
            attrs,
            content: NodeContent::None,
        }
    }

    /// Builds a node with child nodes.
    pub fn with_children(tag: impl Into<String>, attrs: Attrs, children: Vec<Node>) -> Self {
        Self {
            tag: tag.into(),
            attrs,
            content: NodeContent::Nodes(children),
        }
    }

    /// Builds a node with a byte payload.
    pub fn with_bytes(tag: impl Into<String>, attrs: Attrs, payload: impl Into<Bytes>) -> Self {
        Self {
            tag: tag.into(),
            attrs,
            content: NodeContent::Bytes(payload.into()),
        }
    }

    /// Returns an attribute value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Returns the child nodes, empty for non-list content.
    pub fn children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Nodes(nodes) => nodes,
            _ => &[],
        }
    }

    /// Finds the first direct child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|node| node.tag == tag)
    }

    /// Returns the byte payload, if the content is bytes.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(payload) => Some(payload.as_ref()),
            _ => None,
        }
    }
}

/// Builds an attribute map from string pairs.
pub fn attrs<const N: usize>(pairs: [(&str, &str); N]) -> Attrs {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}
