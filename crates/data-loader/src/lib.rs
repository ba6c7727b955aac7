//! # Data Loader Crate
//!
//! This crate owns the row types of the recommendation batch and the CSV
//! codec used at both ends of the job.
//!
//! ## Main Components
//!
//! - **types**: InputRecord, EmbeddingResult, NeighborResult, OutputRecord
//! - **parser**: Schema-checked ingest CSV parsing and result CSV writing
//! - **index**: RecordSet, the ordered concatenation of every ingest file
//! - **error**: Error types for data loading
//!
//! ## Example Usage
//!
//! ```ignore
//! use data_loader::{RecordSet, write_output_csv};
//!
//! let set = RecordSet::from_files([("items.csv", bytes.as_slice())])?;
//! println!("{} rows from {} files", set.len(), set.file_count());
//! ```

// Public modules
pub mod error;
pub mod types;
pub mod parser;
pub mod index;

// Re-export commonly used types for convenience
pub use error::{DataLoadError, Result};
pub use index::{find_duplicate_item_ids, RecordSet};
pub use parser::{
    check_input_schema, parse_input_csv, read_output_csv, write_output_csv, LIST_SEPARATOR,
    OUTPUT_COLUMNS, REQUIRED_COLUMNS,
};
pub use types::{
    // Type aliases
    ItemId,
    MarketplaceId,
    // Core types
    InputRecord,
    EmbeddingResult,
    NeighborResult,
    OutputRecord,
    RecordStatus,
};
