//! Joining endpoint results back onto the records they were computed for.

use std::collections::HashMap;

use data_loader::{NeighborResult, OutputRecord};
use tracing::debug;

use crate::batching::Batch;
use crate::error::{Result, ValidationError};

/// Join neighbor results to the batch's records on `item_id`.
///
/// Every record must receive exactly one result and every result must
/// belong to a record of the batch. Output rows follow the batch order.
pub fn join_batch(batch: &Batch, neighbors: Vec<NeighborResult>) -> Result<Vec<OutputRecord>> {
    let mut by_item: HashMap<String, NeighborResult> = HashMap::with_capacity(neighbors.len());
    for result in neighbors {
        let known = batch.records.iter().any(|r| r.item_id == result.item_id);
        if !known || by_item.contains_key(&result.item_id) {
            return Err(ValidationError::UnmatchedResult {
                batch: batch.index,
                item_id: result.item_id,
            });
        }
        by_item.insert(result.item_id.clone(), result);
    }

    let joined = batch
        .records
        .iter()
        .map(|record| {
            by_item
                .remove(&record.item_id)
                .map(|result| OutputRecord::succeeded(record, result))
                .ok_or_else(|| ValidationError::MissingResult {
                    batch: batch.index,
                    item_id: record.item_id.clone(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!("Joined {} results for batch {}", joined.len(), batch.index);
    Ok(joined)
}

/// One failed output row per record of the batch.
pub fn mark_failed(batch: &Batch, reason: &str) -> Vec<OutputRecord> {
    batch
        .records
        .iter()
        .map(|record| OutputRecord::failed(record, reason))
        .collect()
}

/// Concatenate per-batch outputs back into input order.
pub fn assemble(outputs: Vec<Vec<OutputRecord>>) -> Vec<OutputRecord> {
    let mut rows: Vec<OutputRecord> = outputs.into_iter().flatten().collect();
    rows.sort_by_key(|row| row.position);
    rows
}
