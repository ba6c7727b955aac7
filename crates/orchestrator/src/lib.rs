//! Orchestrator crate for the recs-batch job.
//!
//! This crate wires the storage gateway, the inference client and the batch
//! pipeline into a single run with a well-defined terminal state.
//!
//! ## Components
//!
//! - [`PipelineConfig`]: file + environment configuration, validated once
//! - [`RetryPolicy`]: bounded exponential backoff for transient endpoint errors
//! - [`BatchOrchestrator`]: the run state machine
//! - [`RunReport`] / [`RunSummary`]: what happened, and the process exit code
//!
//! ## Example Usage
//!
//! ```ignore
//! let config = PipelineConfig::load(Path::new("recs-batch.toml"))?;
//! let orchestrator = BatchOrchestrator::connect(config).await;
//! let report = orchestrator.run().await;
//! std::process::exit(report.exit_code());
//! ```

pub mod config;
pub mod orchestrator;
pub mod retry;
pub mod summary;

pub use config::{
    ConfigError, FailurePolicy, InferenceConfig, MarketplaceConfig, MarketplaceRoute,
    PipelineConfig, RunConfig, StorageConfig,
};
pub use orchestrator::{BatchOrchestrator, CancelToken, PipelineError, RunReport, RunState, Stage};
pub use retry::{Retried, RetryPolicy};
pub use summary::{BatchOutcome, BatchStatus, RunSummary};
