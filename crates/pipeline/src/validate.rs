//! Whole-run checks performed before anything is uploaded.

use data_loader::{find_duplicate_item_ids, InputRecord, OutputRecord};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{Result, ValidationError};

/// Check the assembled output against the run's input.
///
/// - item ids are unique across the input
/// - there is exactly one output row per input row
/// - each output row carries the identity columns of the input at its position
/// - successful rows have at least one neighbor and one distance per neighbor
///
/// `outputs` must already be in input order (see [`crate::assemble`]).
pub fn validate_run(inputs: &[InputRecord], outputs: &[OutputRecord]) -> Result<()> {
    let duplicates = find_duplicate_item_ids(inputs);
    if !duplicates.is_empty() {
        return Err(ValidationError::DuplicateItemIds(duplicates));
    }

    if inputs.len() != outputs.len() {
        return Err(ValidationError::RowCountMismatch {
            expected: inputs.len(),
            actual: outputs.len(),
        });
    }

    if let Some(err) = inputs
        .par_iter()
        .zip(outputs.par_iter())
        .find_map_first(|(input, output)| check_row(input, output).err())
    {
        return Err(err);
    }

    debug!("Validated {} output rows", outputs.len());
    Ok(())
}

fn check_row(input: &InputRecord, output: &OutputRecord) -> Result<()> {
    if output.position != input.position || !output.matches_input(input) {
        return Err(ValidationError::IdentityMismatch {
            position: input.position,
            item_id: output.item_id.clone(),
        });
    }
    if output.is_failed() {
        return Ok(());
    }
    if output.neighbor_item_ids.is_empty() {
        return Err(ValidationError::EmptyNeighbors {
            item_id: output.item_id.clone(),
        });
    }
    if output.neighbor_item_ids.len() != output.neighbors_dist.len() {
        return Err(ValidationError::NeighborLengthMismatch {
            item_id: output.item_id.clone(),
            ids: output.neighbor_item_ids.len(),
            distances: output.neighbors_dist.len(),
        });
    }
    Ok(())
}
