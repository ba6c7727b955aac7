use data_loader::{DataLoadError, ItemId};
use thiserror::Error;

/// Errors raised while checking records and results against each other
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Input file did not match the expected schema
    #[error("Schema error: {0}")]
    Schema(#[from] DataLoadError),

    #[error("Batch size must be at least 1")]
    ZeroBatchSize,

    #[error("Duplicate item ids in input: {}", .0.join(", "))]
    DuplicateItemIds(Vec<ItemId>),

    /// The endpoint returned a result for an item that is not in the batch
    #[error("Batch {batch}: result for unknown item {item_id}")]
    UnmatchedResult { batch: usize, item_id: ItemId },

    #[error("Batch {batch}: no result for item {item_id}")]
    MissingResult { batch: usize, item_id: ItemId },

    #[error("Expected {expected} output rows, got {actual}")]
    RowCountMismatch { expected: usize, actual: usize },

    #[error("Item {item_id} has no neighbors")]
    EmptyNeighbors { item_id: ItemId },

    #[error("Item {item_id} has {ids} neighbor ids but {distances} distances")]
    NeighborLengthMismatch {
        item_id: ItemId,
        ids: usize,
        distances: usize,
    },

    /// Output row at `position` does not carry its input's identity columns
    #[error("Output row {position} ({item_id}) does not match its input row")]
    IdentityMismatch { position: usize, item_id: ItemId },
}

pub type Result<T> = std::result::Result<T, ValidationError>;
