//! Block records: the unit of content a flow orders.
//!
//! Two shapes exist for the same entity:
//!
//! - [`BlockDto`] is the record exactly as the store sends it. Its `type` is
//!   kept as the raw string, because a store may hold values this client
//!   does not know about.
//! - [`Block`] is the validated entity. Converting a DTO fails with
//!   [`TypeError::UnknownBlockType`] rather than coercing the type.
//!
//! `content` and `hash` are private on [`Block`]: [`Block::set_content`] is
//! the only way to change content, and it always recomputes the hash.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::hash::content_hash;
use crate::ids::{BlockId, UserId};

/// The closed set of block types.
///
/// Serialized as `TITLE | PARAGRAPH | CHAPTER` over the wire; mapped to the
/// editor node types `heading | paragraph | chapter` at the document boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum BlockType {
    /// Top-level heading of a flow or chapter.
    Title,
    /// Body text.
    #[default]
    Paragraph,
    /// Chapter marker.
    Chapter,
}

impl BlockType {
    /// All variants, in declaration order.
    pub const ALL: [BlockType; 3] = [BlockType::Title, BlockType::Paragraph, BlockType::Chapter];

    /// Parse the wire representation. Exact uppercase match only.
    pub fn parse(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Title => "TITLE",
            BlockType::Paragraph => "PARAGRAPH",
            BlockType::Chapter => "CHAPTER",
        }
    }

    /// Editor node type this block projects to.
    pub fn editor_type(&self) -> &'static str {
        match self {
            BlockType::Title => "heading",
            BlockType::Paragraph => "paragraph",
            BlockType::Chapter => "chapter",
        }
    }

    /// Inverse of [`BlockType::editor_type`]. Exact match only.
    pub fn from_editor_type(s: &str) -> Option<Self> {
        match s {
            "heading" => Some(BlockType::Title),
            "paragraph" => Some(BlockType::Paragraph),
            "chapter" => Some(BlockType::Chapter),
            _ => None,
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors converting wire records into validated entities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("block {block_id:?} has unknown type '{value}'")]
    UnknownBlockType {
        block_id: Option<BlockId>,
        value: String,
    },
    #[error("{entity} record is missing required field '{field}'")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },
    #[error("flow name must be at least {min} characters, got '{name}'")]
    InvalidName { name: String, min: usize },
}

/// Reference to a user as embedded in block and flow records.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

impl UserRef {
    pub fn new(id: UserId) -> Self {
        Self { id, login: None }
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }
}

/// Embedded `{ "id": … }` reference to another block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLink {
    pub id: BlockId,
}

/// A block record as exchanged with the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<BlockId>,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub parent: Option<BlockLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
}

impl BlockDto {
    /// Parse the raw `type` field.
    pub fn parsed_type(&self) -> Result<BlockType, TypeError> {
        BlockType::parse(&self.block_type).ok_or_else(|| TypeError::UnknownBlockType {
            block_id: self.id,
            value: self.block_type.clone(),
        })
    }
}

/// A validated block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "BlockDto", try_from = "BlockDto")]
pub struct Block {
    pub id: BlockId,
    pub block_type: BlockType,
    content: String,
    pub created_date: DateTime<Utc>,
    hash: String,
    pub parent: Option<BlockId>,
    pub owner: UserRef,
}

impl Block {
    /// Build a block from fresh content. The hash is computed here.
    pub fn new(
        id: BlockId,
        block_type: BlockType,
        content: impl Into<String>,
        created_date: DateTime<Utc>,
        owner: UserRef,
    ) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        Self {
            id,
            block_type,
            content,
            created_date,
            hash,
            parent: None,
            owner,
        }
    }

    /// Set the parent block (weak reference, no ownership).
    pub fn with_parent(mut self, parent: BlockId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Replace the content and recompute the hash.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.hash = content_hash(&self.content);
    }

    /// Whether the stored hash matches the content.
    ///
    /// Records arriving from a store carry whatever hash was persisted; this is
    /// the check for the "hash is a pure function of content" invariant.
    pub fn verify_hash(&self) -> bool {
        self.hash == content_hash(&self.content)
    }

    /// Whether this block would project to the same node as `(block_type, content)`.
    pub fn same_node(&self, block_type: BlockType, content: &str) -> bool {
        self.block_type == block_type && self.content == content
    }
}

impl TryFrom<BlockDto> for Block {
    type Error = TypeError;

    fn try_from(dto: BlockDto) -> Result<Self, Self::Error> {
        let block_type = dto.parsed_type()?;
        let id = dto.id.ok_or(TypeError::MissingField {
            entity: "block",
            field: "id",
        })?;
        let created_date = dto.created_date.ok_or(TypeError::MissingField {
            entity: "block",
            field: "createdDate",
        })?;
        let owner = dto.user.ok_or(TypeError::MissingField {
            entity: "block",
            field: "user",
        })?;
        // A record without a hash gets one; a record with a stale hash keeps it
        // so that concurrent-modification checks compare what the store holds.
        let hash = dto.hash.unwrap_or_else(|| content_hash(&dto.content));
        Ok(Self {
            id,
            block_type,
            content: dto.content,
            created_date,
            hash,
            parent: dto.parent.map(|p| p.id),
            owner,
        })
    }
}

impl From<Block> for BlockDto {
    fn from(block: Block) -> Self {
        Self {
            id: Some(block.id),
            block_type: block.block_type.as_str().to_string(),
            content: block.content,
            created_date: Some(block.created_date),
            hash: Some(block.hash),
            parent: block.parent.map(|id| BlockLink { id }),
            user: Some(block.owner),
        }
    }
}

/// Payload for creating a block. The store assigns `id` and `createdDate`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "BlockDto")]
pub struct NewBlock {
    pub block_type: BlockType,
    pub content: String,
    pub hash: String,
    pub parent: Option<BlockId>,
    pub owner: UserRef,
}

impl NewBlock {
    pub fn new(block_type: BlockType, content: impl Into<String>, owner: UserRef) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        Self {
            block_type,
            content,
            hash,
            parent: None,
            owner,
        }
    }

    /// Wire form for `POST /blocks`.
    pub fn to_dto(&self) -> BlockDto {
        BlockDto {
            id: None,
            block_type: self.block_type.as_str().to_string(),
            content: self.content.clone(),
            created_date: None,
            hash: Some(self.hash.clone()),
            parent: self.parent.map(|id| BlockLink { id }),
            user: Some(self.owner.clone()),
        }
    }
}

impl From<NewBlock> for BlockDto {
    fn from(block: NewBlock) -> Self {
        block.to_dto()
    }
}

/// Partial update for `PATCH /blocks/{id}` (merge-patch semantics).
///
/// Setting `content` always sets `hash` too: construct through
/// [`BlockPatch::content`] so the pair cannot drift apart.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

impl BlockPatch {
    pub fn block_type(mut self, block_type: BlockType) -> Self {
        self.block_type = Some(block_type);
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.hash = Some(content_hash(&content));
        self.content = Some(content);
        self
    }

    pub fn content_value(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn hash_value(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.block_type.is_none() && self.content.is_none()
    }

    /// Apply to a block in place.
    pub fn apply_to(&self, block: &mut Block) {
        if let Some(block_type) = self.block_type {
            block.block_type = block_type;
        }
        if let Some(content) = &self.content {
            block.set_content(content.clone());
        }
    }
}
