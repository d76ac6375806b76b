//! Editor document model.
//!
//! The editing surface exchanges a ProseMirror-shaped JSON tree:
//!
//! ```json
//! { "type": "doc",
//!   "content": [
//!     { "type": "heading", "attrs": { "blockId": 1, "level": 1 },
//!       "content": [ { "type": "text", "text": "Hello" } ] } ] }
//! ```
//!
//! Only the top level carries block identity. Each top-level [`Node`] has a
//! fixed attribute record ([`NodeAttrs`]) instead of a free-form bag, and
//! [`Document::validate`] checks it at the boundary.

use serde::{Deserialize, Deserializer, Serialize};

use pradera_types::{Block, BlockId, BlockType};

use crate::DocError;

/// Deepest heading level the editor can produce.
pub const MAX_HEADING_LEVEL: u8 = 6;

/// Level used for projected titles.
pub const TITLE_LEVEL: u8 = 1;

/// Top-level node type. Closed; mirrors [`BlockType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Heading,
    Paragraph,
    Chapter,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Heading => "heading",
            NodeType::Paragraph => "paragraph",
            NodeType::Chapter => "chapter",
        }
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            NodeType::Heading => BlockType::Title,
            NodeType::Paragraph => BlockType::Paragraph,
            NodeType::Chapter => BlockType::Chapter,
        }
    }
}

impl From<BlockType> for NodeType {
    fn from(block_type: BlockType) -> Self {
        match block_type {
            BlockType::Title => NodeType::Heading,
            BlockType::Paragraph => NodeType::Paragraph,
            BlockType::Chapter => NodeType::Chapter,
        }
    }
}

/// Fixed attribute record of a top-level node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttrs {
    /// Source block, or `None` for nodes the user just created.
    #[serde(default, deserialize_with = "deserialize_block_id")]
    pub block_id: Option<BlockId>,
    /// Heading level; only present on headings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
}

/// Accepts a number, `null`, `""` (the editor's default for new nodes), or a
/// numeric string.
fn deserialize_block_id<'de, D>(deserializer: D) -> Result<Option<BlockId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(BlockId::new(n))),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => BlockId::parse(&s)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid blockId '{s}'"))),
    }
}

/// Inline content of a top-level node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inline {
    Text { text: String },
    HardBreak,
}

impl Inline {
    pub fn text(text: impl Into<String>) -> Self {
        Inline::Text { text: text.into() }
    }
}

/// One top-level node; corresponds to one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub attrs: NodeAttrs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Inline>,
}

impl Node {
    /// Node with the given type and text. Empty text yields no inline children.
    pub fn new(node_type: NodeType, text: &str) -> Self {
        let content = if text.is_empty() {
            Vec::new()
        } else {
            vec![Inline::text(text)]
        };
        let level = (node_type == NodeType::Heading).then_some(TITLE_LEVEL);
        Self {
            node_type,
            attrs: NodeAttrs {
                block_id: None,
                level,
            },
            content,
        }
    }

    pub fn heading(text: &str) -> Self {
        Self::new(NodeType::Heading, text)
    }

    pub fn paragraph(text: &str) -> Self {
        Self::new(NodeType::Paragraph, text)
    }

    pub fn chapter(text: &str) -> Self {
        Self::new(NodeType::Chapter, text)
    }

    pub fn with_block_id(mut self, id: BlockId) -> Self {
        self.attrs.block_id = Some(id);
        self
    }

    /// Node for a block, carrying its id. Content is verbatim.
    pub fn from_block(block: &Block) -> Self {
        Self::new(NodeType::from(block.block_type), block.content()).with_block_id(block.id)
    }

    pub fn block_id(&self) -> Option<BlockId> {
        self.attrs.block_id
    }

    pub fn block_type(&self) -> BlockType {
        self.node_type.block_type()
    }

    /// Concatenated text; hard breaks become `\n`.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for inline in &self.content {
            match inline {
                Inline::Text { text } => out.push_str(text),
                Inline::HardBreak => out.push('\n'),
            }
        }
        out
    }

    fn validate(&self, position: usize) -> Result<(), DocError> {
        match (self.node_type, self.attrs.level) {
            (NodeType::Heading, Some(level)) if (1..=MAX_HEADING_LEVEL).contains(&level) => Ok(()),
            (NodeType::Heading, Some(level)) => Err(DocError::MalformedDocument(format!(
                "node {position}: heading level {level} outside 1..={MAX_HEADING_LEVEL}"
            ))),
            (NodeType::Heading, None) => Err(DocError::MalformedDocument(format!(
                "node {position}: heading without level"
            ))),
            (other, Some(_)) => Err(DocError::MalformedDocument(format!(
                "node {position}: {} cannot carry a level",
                other.as_str()
            ))),
            (_, None) => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
enum DocTag {
    #[default]
    #[serde(rename = "doc")]
    Doc,
}

/// The whole editor document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "type")]
    tag: DocTag,
    #[serde(default)]
    pub content: Vec<Node>,
}

impl Document {
    pub fn new(content: Vec<Node>) -> Self {
        Self {
            tag: DocTag::Doc,
            content,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Check the fixed attribute contract of every node.
    pub fn validate(&self) -> Result<(), DocError> {
        self.content
            .iter()
            .enumerate()
            .try_for_each(|(position, node)| node.validate(position))
    }

    /// Decode and validate.
    pub fn from_json(json: &str) -> Result<Self, DocError> {
        let doc: Document = serde_json::from_str(json)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Decode and validate from an already-parsed value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, DocError> {
        let doc: Document = serde_json::from_value(value)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String, DocError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, DocError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Block ids in document order (nodes without an id are skipped).
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.content.iter().filter_map(Node::block_id).collect()
    }

    /// Write ids into nodes by position. Out-of-range positions are ignored.
    pub fn assign_ids(&mut self, assignments: impl IntoIterator<Item = (usize, BlockId)>) {
        for (position, id) in assignments {
            if let Some(node) = self.content.get_mut(position) {
                node.attrs.block_id = Some(id);
            }
        }
    }

    /// Give freshly created ids to nodes that still have none.
    ///
    /// The k-th id-less node receives the k-th id. Used when a newer edit of
    /// the document was produced before the ids of its new nodes were known.
    /// Returns the `(position, id)` pairs that were written.
    pub fn adopt_new_ids(&mut self, ids: impl IntoIterator<Item = BlockId>) -> Vec<(usize, BlockId)> {
        let mut ids = ids.into_iter();
        let mut assigned = Vec::new();
        for (position, node) in self.content.iter_mut().enumerate() {
            if node.attrs.block_id.is_some() {
                continue;
            }
            let Some(id) = ids.next() else { break };
            node.attrs.block_id = Some(id);
            assigned.push((position, id));
        }
        assigned
    }
}
