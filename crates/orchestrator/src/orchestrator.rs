//! # Batch Orchestrator
//!
//! This module drives one run end to end:
//! 1. Fetch the input CSVs from object storage
//! 2. Parse them, check their schema and reject duplicate item ids
//! 3. Back up the raw inputs
//! 4. Group the records into batches
//! 5. Embed each batch, then look up neighbors for the embeddings
//! 6. Join results to records and validate the whole output
//! 7. Upload the output CSV in a single write
//!
//! Nothing reaches inference before the backup is written and nothing is
//! uploaded unless the assembled output passes validation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use aws_config::timeout::TimeoutConfig;
use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use data_loader::{
    DataLoadError, EmbeddingResult, NeighborResult, OutputRecord, RecordSet, check_input_schema,
    find_duplicate_item_ids,
};
use ml_client::{
    CredentialCache, InferenceClient, InferenceError, SageMakerInvoker, StsCredentialProvider,
};
use pipeline::{Batch, ValidationError, assemble, join_batch, mark_failed, plan_batches, validate_run};
use storage::{
    ObjectLocation, RawFile, S3ObjectStore, StorageError, StorageGateway, resolve_output_key,
};

use crate::config::{FailurePolicy, MarketplaceRoute, PipelineConfig};
use crate::retry::RetryPolicy;
use crate::summary::{BatchOutcome, BatchStatus, RunSummary};

/// Step of the run an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Parse,
    Backup,
    Inference,
    Validation,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Backup => "backup",
            Stage::Inference => "inference",
            Stage::Validation => "validation",
            Stage::Upload => "upload",
        };
        write!(f, "{}", name)
    }
}

/// Where a run is. `Uploaded` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Started,
    Fetched,
    BackedUp,
    Processing { completed: usize, total: usize },
    Validated,
    Uploaded,
    Failed { stage: Stage, reason: String },
}

/// Errors that end a run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A batch gave up under the `abort` failure policy
    #[error("Batch {batch} failed: {reason}")]
    BatchFailed { batch: usize, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<DataLoadError> for PipelineError {
    fn from(err: DataLoadError) -> Self {
        PipelineError::Validation(err.into())
    }
}

/// Final state of a run with its summary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub summary: RunSummary,
    pub output_location: Option<ObjectLocation>,
}

impl RunReport {
    /// Uploaded with every batch succeeded
    pub fn is_success(&self) -> bool {
        self.state == RunState::Uploaded && self.summary.failed_batches() == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Shared flag asking a run to stop before its next batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct RunTracker {
    state: RunState,
    stage: Stage,
    summary: RunSummary,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            state: RunState::Started,
            stage: Stage::Fetch,
            summary: RunSummary::default(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
    }

    fn advance(&mut self, state: RunState) {
        debug!("Run state {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

/// What a finished batch task hands back
struct BatchReport {
    outcome: BatchOutcome,
    rows: Result<Vec<OutputRecord>, PipelineError>,
}

/// Runs one batch through both endpoints. Cloned into each batch task.
#[derive(Clone)]
struct BatchWorker {
    config: Arc<PipelineConfig>,
    client: InferenceClient,
    retry: RetryPolicy,
}

impl BatchWorker {
    async fn process(self, batch: Batch) -> BatchReport {
        let start = Instant::now();
        let Some(route) = self.config.route(&batch.marketplace_id) else {
            let reason = format!("no route for marketplace {}", batch.marketplace_id);
            return self.give_up(&batch, 0, 0, reason);
        };

        let mut attempts = 0;
        let mut calls = 1;
        let embedded = self
            .retry
            .run(&format!("Batch {} embedding", batch.index), || {
                self.client.embed(&route.embedding_endpoint, &batch.records)
            })
            .await;
        attempts += embedded.attempts;
        let embeddings = match embedded.result {
            Ok(embeddings) => embeddings,
            Err(err) => return self.inference_failed(&batch, attempts, calls, err),
        };

        calls += 1;
        let looked_up = self
            .retry
            .run(&format!("Batch {} neighbor lookup", batch.index), || {
                self.lookup(&route, &embeddings, &batch.product_type)
            })
            .await;
        attempts += looked_up.attempts;
        let neighbors = match looked_up.result {
            Ok(neighbors) => neighbors,
            Err(err) => return self.inference_failed(&batch, attempts, calls, err),
        };

        match join_batch(&batch, neighbors) {
            Ok(rows) => {
                debug!(
                    "Batch {} ({} records) done in {:.2?} after {} attempts",
                    batch.index,
                    batch.len(),
                    start.elapsed(),
                    attempts
                );
                BatchReport {
                    outcome: outcome(&batch, BatchStatus::Succeeded, attempts, calls, None),
                    rows: Ok(rows),
                }
            }
            Err(err) => BatchReport {
                outcome: outcome(&batch, BatchStatus::Failed, attempts, calls, Some(err.to_string())),
                rows: Err(err.into()),
            },
        }
    }

    async fn lookup(
        &self,
        route: &MarketplaceRoute,
        embeddings: &[EmbeddingResult],
        product_type: &str,
    ) -> Result<Vec<NeighborResult>, InferenceError> {
        self.client
            .lookup_neighbors(&route.neighbor_endpoint, embeddings, product_type, &route.code)
            .await
    }

    fn inference_failed(
        &self,
        batch: &Batch,
        attempts: u32,
        calls: u32,
        err: InferenceError,
    ) -> BatchReport {
        if err.is_authentication() {
            return BatchReport {
                outcome: outcome(batch, BatchStatus::Failed, attempts, calls, Some(err.to_string())),
                rows: Err(err.into()),
            };
        }
        self.give_up(batch, attempts, calls, err.to_string())
    }

    fn give_up(&self, batch: &Batch, attempts: u32, calls: u32, reason: String) -> BatchReport {
        let outcome = outcome(batch, BatchStatus::Failed, attempts, calls, Some(reason.clone()));
        match self.config.run.failure_policy {
            FailurePolicy::Abort => BatchReport {
                outcome,
                rows: Err(PipelineError::BatchFailed {
                    batch: batch.index,
                    reason,
                }),
            },
            FailurePolicy::MarkAndContinue => {
                warn!(
                    "Batch {} ({} records) marked failed after {} calls: {}",
                    batch.index,
                    batch.len(),
                    attempts,
                    reason
                );
                BatchReport {
                    outcome,
                    rows: Ok(mark_failed(batch, &reason)),
                }
            }
        }
    }
}

fn outcome(
    batch: &Batch,
    status: BatchStatus,
    attempts: u32,
    calls: u32,
    reason: Option<String>,
) -> BatchOutcome {
    BatchOutcome {
        index: batch.index,
        marketplace_id: batch.marketplace_id.clone(),
        product_type: batch.product_type.clone(),
        records: batch.len(),
        status,
        attempts,
        calls,
        reason,
    }
}

/// Coordinates storage and inference for one run.
pub struct BatchOrchestrator {
    config: Arc<PipelineConfig>,
    storage: StorageGateway,
    worker: BatchWorker,
    cancel: CancelToken,
    run_date: Option<NaiveDate>,
}

impl BatchOrchestrator {
    /// Build an orchestrator over already constructed collaborators.
    pub fn new(config: PipelineConfig, storage: StorageGateway, inference: InferenceClient) -> Self {
        let config = Arc::new(config);
        let retry = config.retry_policy();
        Self {
            worker: BatchWorker {
                config: config.clone(),
                client: inference,
                retry,
            },
            config,
            storage,
            cancel: CancelToken::new(),
            run_date: None,
        }
    }

    /// Build an orchestrator backed by S3, STS and SageMaker.
    ///
    /// Base credentials and region come from the default AWS provider chain;
    /// `inference.region` overrides the region.
    pub async fn connect(config: PipelineConfig) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.inference.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.storage_timeout())
                    .build(),
            )
            .load()
            .await;

        let storage = StorageGateway::new(Arc::new(S3ObjectStore::new(&sdk_config)))
            .with_timeout(config.storage_timeout());
        let provider = Arc::new(StsCredentialProvider::new(
            &sdk_config,
            config.inference.session_name.clone(),
        ));
        let credentials = Arc::new(CredentialCache::new(
            provider,
            config.inference.role_arn.clone(),
            config.inference.target_account_id.clone(),
        ));
        let invoker = Arc::new(SageMakerInvoker::new(config.inference.region.clone()));
        let inference = InferenceClient::new(
            invoker,
            credentials,
            config.timeout(),
            config.run.batch_size,
        );

        Self::new(config, storage, inference)
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Date substituted for `{date}` in the output key (defaults to today, UTC)
    pub fn with_run_date(mut self, date: NaiveDate) -> Self {
        self.run_date = Some(date);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run to a terminal state.
    pub async fn run(&self) -> RunReport {
        let start = Instant::now();
        info!(
            "Starting run over s3://{}/{}",
            self.config.storage.input_bucket, self.config.storage.input_prefix
        );

        let mut tracker = RunTracker::new();
        let result = self.execute(&mut tracker).await;
        tracker.summary.elapsed = start.elapsed();

        match result {
            Ok(location) => {
                info!(
                    "Run finished in {:.2?}: {} rows written to {} ({} of {} batches failed)",
                    tracker.summary.elapsed,
                    tracker.summary.output_rows,
                    location,
                    tracker.summary.failed_batches(),
                    tracker.summary.batches.len()
                );
                RunReport {
                    state: tracker.state,
                    summary: tracker.summary,
                    output_location: Some(location),
                }
            }
            Err(err) => {
                error!(
                    "Run failed during {} after {:.2?}: {}",
                    tracker.stage, tracker.summary.elapsed, err
                );
                RunReport {
                    state: RunState::Failed {
                        stage: tracker.stage,
                        reason: err.to_string(),
                    },
                    summary: tracker.summary,
                    output_location: None,
                }
            }
        }
    }

    async fn execute(&self, tracker: &mut RunTracker) -> Result<ObjectLocation, PipelineError> {
        let storage = &self.config.storage;

        tracker.enter(Stage::Fetch);
        let files = self
            .storage
            .fetch_inputs(&storage.input_bucket, &storage.input_prefix)
            .await?;
        tracker.advance(RunState::Fetched);

        tracker.enter(Stage::Parse);
        let start = Instant::now();
        let (files, records) = parse_inputs(files).await?;
        tracker.summary.input_rows = records.len();
        let duplicates = find_duplicate_item_ids(records.records());
        if !duplicates.is_empty() {
            return Err(ValidationError::DuplicateItemIds(duplicates).into());
        }
        info!(
            "Parsed {} records from {} files in {:.2?}",
            records.len(),
            records.file_count(),
            start.elapsed()
        );

        tracker.enter(Stage::Backup);
        self.storage
            .backup(&files, &storage.backup_bucket, &storage.backup_prefix)
            .await?;
        drop(files);
        tracker.advance(RunState::BackedUp);

        tracker.enter(Stage::Inference);
        let outputs = self.process_batches(&records, tracker).await?;

        tracker.enter(Stage::Validation);
        let rows = assemble(outputs);
        tracker.summary.output_rows = rows.len();
        validate_run(records.records(), &rows)?;
        tracker.advance(RunState::Validated);

        tracker.enter(Stage::Upload);
        let date = self.run_date.unwrap_or_else(|| Utc::now().date_naive());
        let key = resolve_output_key(&storage.output_key, date);
        let location = self
            .storage
            .upload(&rows, &storage.output_bucket, &key)
            .await?;
        tracker.advance(RunState::Uploaded);
        Ok(location)
    }

    /// Run every batch with at most `run.concurrency` in flight.
    ///
    /// Returns per-batch rows in completion order; callers reassemble them.
    async fn process_batches(
        &self,
        records: &RecordSet,
        tracker: &mut RunTracker,
    ) -> Result<Vec<Vec<OutputRecord>>, PipelineError> {
        let batches = plan_batches(records.records(), self.config.run.batch_size)?;
        let total = batches.len();
        let concurrency = self.config.run.concurrency;
        info!(
            "Processing {} records in {} batches ({} at a time)",
            records.len(),
            total,
            concurrency
        );
        tracker.advance(RunState::Processing { completed: 0, total });

        let mut tasks: JoinSet<BatchReport> = JoinSet::new();
        let mut outputs = Vec::with_capacity(total);

        for batch in batches {
            while tasks.len() >= concurrency {
                if let Some(joined) = tasks.join_next().await {
                    collect(joined?, tracker, &mut outputs, total)?;
                }
            }
            if self.cancel.is_cancelled() {
                warn!("Run cancelled before batch {}", batch.index);
                return Err(PipelineError::Cancelled);
            }
            tasks.spawn(self.worker.clone().process(batch));
        }

        while let Some(joined) = tasks.join_next().await {
            collect(joined?, tracker, &mut outputs, total)?;
        }
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        tracker.summary.batches.sort_by_key(|b| b.index);
        Ok(outputs)
    }
}

/// Record a finished batch; a fatal batch error ends the run.
///
/// Returning early drops the `JoinSet`, which aborts the remaining tasks.
fn collect(
    report: BatchReport,
    tracker: &mut RunTracker,
    outputs: &mut Vec<Vec<OutputRecord>>,
    total: usize,
) -> Result<(), PipelineError> {
    tracker.summary.batches.push(report.outcome);
    let rows = report.rows?;
    outputs.push(rows);
    tracker.advance(RunState::Processing {
        completed: outputs.len(),
        total,
    });
    Ok(())
}

/// Schema-check and parse on the blocking pool; hands the raw files back for backup.
async fn parse_inputs(files: Vec<RawFile>) -> Result<(Vec<RawFile>, RecordSet), PipelineError> {
    let parsed = tokio::task::spawn_blocking(move || {
        for file in &files {
            check_input_schema(&file.name, &file.bytes)?;
        }
        let records = RecordSet::from_files(
            files
                .iter()
                .map(|file| (file.name.as_str(), file.bytes.as_slice())),
        )?;
        Ok::<_, DataLoadError>((files, records))
    })
    .await??;
    Ok(parsed)
}
