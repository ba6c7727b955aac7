//! Run configuration.
//!
//! One [`PipelineConfig`] is built at startup from built-in defaults, a TOML
//! file and `RECS_BATCH__SECTION__KEY` environment overrides (in that order
//! of precedence), validated once, and passed to the orchestrator.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use ml_client::check_role_account;
use serde::Deserialize;
use thiserror::Error;

use crate::retry::RetryPolicy;

const ENV_PREFIX: &str = "RECS_BATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub inference: InferenceConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub input_bucket: String,
    pub input_prefix: String,
    pub output_bucket: String,
    /// May contain `{date}`, filled in with the run date
    pub output_key: String,
    pub backup_bucket: String,
    pub backup_prefix: String,
    /// Limit on each list, get and put
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub region: String,
    pub role_arn: String,
    pub target_account_id: String,
    pub session_name: String,
    pub embedding_endpoint: String,
    pub neighbor_endpoint: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// Routing table keyed by the marketplace id found in the input
    #[serde(default)]
    pub marketplaces: BTreeMap<String, MarketplaceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    /// Code the neighbor endpoint expects, e.g. `US`
    pub code: String,
    #[serde(default)]
    pub embedding_endpoint: Option<String>,
    #[serde(default)]
    pub neighbor_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
}

/// What happens to the run when a batch's inference fails for good
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Mark the batch's rows as failed and keep going
    #[default]
    MarkAndContinue,
    /// Fail the whole run
    Abort,
}

/// Endpoints and marketplace code resolved for one marketplace id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceRoute {
    pub code: String,
    pub embedding_endpoint: String,
    pub neighbor_endpoint: String,
}

impl PipelineConfig {
    /// Load from `path` with environment overrides applied on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = defaults()?
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Self::from_config(config)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config = defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, ConfigError> {
        let parsed: PipelineConfig = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check cross-field constraints the types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("storage.input_bucket", &self.storage.input_bucket),
            ("storage.output_bucket", &self.storage.output_bucket),
            ("storage.output_key", &self.storage.output_key),
            ("storage.backup_bucket", &self.storage.backup_bucket),
            ("inference.region", &self.inference.region),
            ("inference.embedding_endpoint", &self.inference.embedding_endpoint),
            ("inference.neighbor_endpoint", &self.inference.neighbor_endpoint),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(invalid(format!("{} must not be empty", name)));
            }
        }

        if self.run.batch_size == 0 {
            return Err(invalid("run.batch_size must be at least 1"));
        }
        if self.run.concurrency == 0 {
            return Err(invalid("run.concurrency must be at least 1"));
        }
        if self.storage.timeout_secs == 0 {
            return Err(invalid("storage.timeout_secs must be at least 1"));
        }
        if self.inference.timeout_secs == 0 {
            return Err(invalid("inference.timeout_secs must be at least 1"));
        }
        if self.inference.marketplaces.is_empty() {
            return Err(invalid("inference.marketplaces must map at least one marketplace"));
        }
        if let Some((id, _)) = self
            .inference
            .marketplaces
            .iter()
            .find(|(_, m)| m.code.trim().is_empty())
        {
            return Err(invalid(format!("marketplace {} has an empty code", id)));
        }

        check_role_account(&self.inference.role_arn, &self.inference.target_account_id)
            .map_err(|e| invalid(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.inference.timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.inference.max_retries,
            Duration::from_millis(self.inference.initial_backoff_ms),
        )
    }

    /// Endpoints and code for `marketplace_id`, or `None` if it is not routed.
    pub fn route(&self, marketplace_id: &str) -> Option<MarketplaceRoute> {
        let marketplace = self.inference.marketplaces.get(marketplace_id)?;
        Some(MarketplaceRoute {
            code: marketplace.code.clone(),
            embedding_endpoint: marketplace
                .embedding_endpoint
                .clone()
                .unwrap_or_else(|| self.inference.embedding_endpoint.clone()),
            neighbor_endpoint: marketplace
                .neighbor_endpoint
                .clone()
                .unwrap_or_else(|| self.inference.neighbor_endpoint.clone()),
        })
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(Config::builder()
        .set_default("storage.input_prefix", "")?
        .set_default("storage.backup_prefix", "backup_input/")?
        .set_default("storage.timeout_secs", 60)?
        .set_default("inference.session_name", "recs-batch")?
        .set_default("inference.timeout_secs", 60)?
        .set_default("inference.max_retries", 3)?
        .set_default("inference.initial_backoff_ms", 500)?
        .set_default("run.batch_size", 32)?
        .set_default("run.concurrency", 1)?
        .set_default("run.failure_policy", "mark_and_continue")?)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
