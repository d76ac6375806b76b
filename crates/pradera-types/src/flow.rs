//! Flows, the join rows that order blocks inside them, and books.

use serde::{Deserialize, Serialize};

use crate::block::{BlockLink, TypeError, UserRef};
use crate::ids::{BlockId, BookId, FlowBlockId, FlowId, UserId};

/// Minimum flow name length accepted by the store.
pub const MIN_FLOW_NAME_LEN: usize = 3;

/// A book. Pure grouping entity; flows point at it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
}

/// Embedded reference to a book inside a flow record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRef {
    pub id: BookId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// An ordered sequence of blocks belonging to a user and optionally a book.
///
/// The ordering itself lives in [`FlowBlock`] rows, not here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    #[serde(default, rename = "user")]
    pub owner: Option<UserRef>,
    #[serde(default)]
    pub book: Option<BookRef>,
}

impl Flow {
    pub fn new(id: FlowId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: None,
            book: None,
        }
    }

    pub fn with_owner(mut self, owner: UserRef) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_book(mut self, book: BookId) -> Self {
        self.book = Some(BookRef { id: book, title: None });
        self
    }

    pub fn owned_by(&self, user: UserId) -> bool {
        self.owner.as_ref().is_some_and(|o| o.id == user)
    }

    /// Check the name constraint the store enforces.
    pub fn validate_name(name: &str) -> Result<(), TypeError> {
        if name.chars().count() < MIN_FLOW_NAME_LEN {
            return Err(TypeError::InvalidName {
                name: name.to_string(),
                min: MIN_FLOW_NAME_LEN,
            });
        }
        Ok(())
    }
}

/// Payload for creating a flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewFlow {
    pub name: String,
    #[serde(rename = "user", skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book: Option<BookRef>,
}

impl NewFlow {
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Flow::validate_name(&name)?;
        Ok(Self {
            name,
            owner: None,
            book: None,
        })
    }

    pub fn with_owner(mut self, owner: UserRef) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Embedded `{ "id": … }` reference to a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLink {
    pub id: FlowId,
}

/// A flow-block row as exchanged with the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowBlockDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FlowBlockId>,
    pub block_order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockLink>,
}

/// Position of one block inside one flow.
///
/// `block_order` values are unique within a flow; ascending order is the
/// document order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "FlowBlockDto", try_from = "FlowBlockDto")]
pub struct FlowBlock {
    pub id: FlowBlockId,
    pub block_order: i64,
    pub flow_id: FlowId,
    pub block_id: BlockId,
}

impl TryFrom<FlowBlockDto> for FlowBlock {
    type Error = TypeError;

    fn try_from(dto: FlowBlockDto) -> Result<Self, Self::Error> {
        let missing = |field| TypeError::MissingField {
            entity: "flow-block",
            field,
        };
        Ok(Self {
            id: dto.id.ok_or_else(|| missing("id"))?,
            block_order: dto.block_order,
            flow_id: dto.flow.map(|f| f.id).ok_or_else(|| missing("flow"))?,
            block_id: dto.block.map(|b| b.id).ok_or_else(|| missing("block"))?,
        })
    }
}

impl From<FlowBlock> for FlowBlockDto {
    fn from(fb: FlowBlock) -> Self {
        Self {
            id: Some(fb.id),
            block_order: fb.block_order,
            flow: Some(FlowLink { id: fb.flow_id }),
            block: Some(BlockLink { id: fb.block_id }),
        }
    }
}

/// Payload for creating a flow-block row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewFlowBlock {
    pub flow_id: FlowId,
    pub block_id: BlockId,
    pub block_order: i64,
}

impl NewFlowBlock {
    pub fn to_dto(&self) -> FlowBlockDto {
        FlowBlockDto {
            id: None,
            block_order: self.block_order,
            flow: Some(FlowLink { id: self.flow_id }),
            block: Some(BlockLink { id: self.block_id }),
        }
    }
}
