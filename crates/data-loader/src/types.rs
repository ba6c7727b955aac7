//! Core domain types for the recommendation batch.
//!
//! These are the rows that flow through the job: an [`InputRecord`] read from
//! an ingest CSV, the per-batch inference results, and the [`OutputRecord`]
//! written back to storage once the run completes.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Type Aliases
// =============================================================================

/// Catalog identifier of a product (the join key across every stage)
pub type ItemId = String;

/// Marketplace identifier as it appears in the input, e.g. `"000000"`
pub type MarketplaceId = String;

// =============================================================================
// Input
// =============================================================================

/// One row of an ingest CSV.
///
/// `position` is the row's index in the concatenation of all input files for
/// the run. Batching groups rows by marketplace and product type, so the
/// position is what puts the output back into input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub item_id: ItemId,
    pub marketplace_id: MarketplaceId,
    /// Physical image identifier sent to the embedding endpoint
    pub img_id: String,
    pub product_type: String,
    pub position: usize,
}

impl InputRecord {
    pub fn new(
        item_id: impl Into<String>,
        marketplace_id: impl Into<String>,
        img_id: impl Into<String>,
        product_type: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            marketplace_id: marketplace_id.into(),
            img_id: img_id.into(),
            product_type: product_type.into(),
            position,
        }
    }
}

// =============================================================================
// Inference results
// =============================================================================

/// Embedding vector produced by the first endpoint for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub item_id: ItemId,
    pub embedding: Vec<f32>,
}

/// Nearest neighbors returned by the second endpoint for one item.
///
/// `neighbor_item_ids[i]` is at distance `neighbors_dist[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborResult {
    pub item_id: ItemId,
    pub neighbor_item_ids: Vec<ItemId>,
    pub neighbors_dist: Vec<f32>,
}

// =============================================================================
// Output
// =============================================================================

/// Whether an output row carries real neighbors or a failure marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ok,
    Failed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Ok => write!(f, "ok"),
            RecordStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Final row written to the output CSV: an input row joined with its neighbors.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub item_id: ItemId,
    pub marketplace_id: MarketplaceId,
    pub img_id: String,
    pub product_type: String,
    pub neighbor_item_ids: Vec<ItemId>,
    pub neighbors_dist: Vec<f32>,
    pub status: RecordStatus,
    /// Failure reason; only set when `status` is `Failed`
    pub error: Option<String>,
    pub position: usize,
}

impl OutputRecord {
    /// Join an input row with the neighbors found for it.
    pub fn succeeded(input: &InputRecord, neighbors: NeighborResult) -> Self {
        Self {
            item_id: input.item_id.clone(),
            marketplace_id: input.marketplace_id.clone(),
            img_id: input.img_id.clone(),
            product_type: input.product_type.clone(),
            neighbor_item_ids: neighbors.neighbor_item_ids,
            neighbors_dist: neighbors.neighbors_dist,
            status: RecordStatus::Ok,
            error: None,
            position: input.position,
        }
    }

    /// Carry an input row through to the output with a failure marker.
    pub fn failed(input: &InputRecord, reason: impl Into<String>) -> Self {
        Self {
            item_id: input.item_id.clone(),
            marketplace_id: input.marketplace_id.clone(),
            img_id: input.img_id.clone(),
            product_type: input.product_type.clone(),
            neighbor_item_ids: Vec::new(),
            neighbors_dist: Vec::new(),
            status: RecordStatus::Failed,
            error: Some(reason.into()),
            position: input.position,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RecordStatus::Failed
    }

    /// True when the identity columns equal those of `input`.
    pub fn matches_input(&self, input: &InputRecord) -> bool {
        self.item_id == input.item_id
            && self.marketplace_id == input.marketplace_id
            && self.img_id == input.img_id
            && self.product_type == input.product_type
    }
}
