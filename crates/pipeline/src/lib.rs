//! Batch planning, result joining and run validation.
//!
//! This crate holds the pure, synchronous steps of a run:
//! - Grouping records into endpoint-sized [`Batch`]es
//! - Joining neighbor results back onto their records
//! - Reassembling per-batch output in input order
//! - Validating the assembled output before upload
//!
//! ## Architecture
//! The orchestrator drives a run through these steps:
//! 1. `plan_batches` groups records by marketplace and product type
//! 2. Each batch goes through the inference endpoints
//! 3. `join_batch` (or `mark_failed` when inference gave up) turns the batch
//!    into output rows
//! 4. `assemble` restores input order and `validate_run` checks the result
//!
//! ## Example Usage
//! ```ignore
//! use pipeline::{assemble, join_batch, plan_batches, validate_run};
//!
//! let batches = plan_batches(records.records(), 32)?;
//! let mut outputs = Vec::new();
//! for batch in &batches {
//!     let neighbors = lookup(batch).await?;
//!     outputs.push(join_batch(batch, neighbors)?);
//! }
//! let rows = assemble(outputs);
//! validate_run(records.records(), &rows)?;
//! ```

pub mod batching;
pub mod error;
pub mod merge;
pub mod validate;

// Re-export main types
pub use batching::{partition, plan_batches, Batch};
pub use error::{Result, ValidationError};
pub use merge::{assemble, join_batch, mark_failed};
pub use validate::validate_run;
