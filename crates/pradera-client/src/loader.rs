//! Fetch a flow's rows and blocks and join them into a [`FlowSnapshot`].

use thiserror::Error;
use tracing::{debug, info};

use pradera_doc::{DocError, FlowSnapshot};
use pradera_types::{FlowBlockCriteria, FlowId};

use crate::store::{BlockStore, FlowStore, StoreError};

/// Why a snapshot could not be loaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The records were fetched but do not form a valid flow
    /// (unknown block type, duplicated order, missing block).
    #[error(transparent)]
    Doc(#[from] DocError),
}

/// Load the current state of `flow_id`.
///
/// The store returns blocks ordered by id; ordering by `block_order` happens
/// here, before anything is projected.
pub async fn load_snapshot(
    blocks: &dyn BlockStore,
    flows: &dyn FlowStore,
    flow_id: FlowId,
) -> Result<FlowSnapshot, SnapshotError> {
    let flow = flows.get_flow(flow_id).await?;
    let rows = flows.flow_blocks(&FlowBlockCriteria::for_flow(flow_id)).await?;
    let records = blocks.blocks_for_flow(flow_id).await?;
    debug!(
        "flow {} '{}': {} rows, {} block records",
        flow_id,
        flow.name,
        rows.len(),
        records.len()
    );
    let snapshot = FlowSnapshot::join(flow_id, rows, records)?;
    info!("loaded flow {} with {} blocks", flow_id, snapshot.len());
    Ok(snapshot)
}
