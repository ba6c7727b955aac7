//! Error types for the data-loader crate.
//!
//! Every variant here surfaces to the orchestrator as a validation failure:
//! the input cannot be trusted, so nothing downstream should run.

use thiserror::Error;

/// Errors that can occur while reading input CSVs or writing the result CSV
#[derive(Error, Debug)]
pub enum DataLoadError {
    /// A required column is absent from the header row
    #[error("Input file {file} is missing required column `{column}`")]
    MissingColumn { file: String, column: String },

    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Row in a data file couldn't be parsed
    ///
    /// This variant stores context about where the error occurred
    #[error("Parse error at line {line} in {file}: {reason}")]
    ParseError {
        file: String,
        line: usize,
        reason: String,
    },

    /// The csv reader or writer rejected the data
    #[error("CSV error in {file}: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, DataLoadError>;
