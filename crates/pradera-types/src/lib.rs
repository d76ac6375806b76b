//! Shared entity types for Pradera.
//!
//! This crate is the relational foundation: typed ids, blocks, flows, the
//! flow-block join rows that order blocks inside a flow, and books. It has
//! **no internal pradera dependencies**, a pure leaf crate the document and
//! client crates build on.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Book (BookId)
//!     └── groups Flow
//!
//! Flow (FlowId) ← ordered sequence, owned by a user
//!     └── FlowBlock (FlowBlockId, block_order) ← position of one block
//!             └── Block (BlockId)
//!
//! Block (BlockId) ← TITLE | PARAGRAPH | CHAPTER, content + hash
//!     └── parent: weak link to another Block
//!     └── may be referenced by several flows
//! ```
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`Block`]         | Validated block (hash tied to content)       |
//! | [`BlockDto`]      | Block record as the store sends it           |
//! | [`BlockType`]     | Closed enumeration of block types            |
//! | [`Flow`]          | Named, owned sequence of blocks              |
//! | [`FlowBlock`]     | One block's position inside one flow         |
//! | [`BlockCriteria`] | Local + remote block filter                  |
//! |-------------------|----------------------------------------------|

pub mod block;
pub mod criteria;
pub mod flow;
pub mod hash;
pub mod ids;

pub use block::{Block, BlockDto, BlockLink, BlockPatch, BlockType, NewBlock, TypeError, UserRef};
pub use criteria::{BlockCriteria, FlowBlockCriteria};
pub use flow::{
    Book, BookRef, Flow, FlowBlock, FlowBlockDto, FlowLink, MIN_FLOW_NAME_LEN, NewFlow,
    NewFlowBlock,
};
pub use hash::content_hash;
pub use ids::{BlockId, BookId, FlowBlockId, FlowId, UserId};
