//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::asset::Scope;
use crate::error::{MigrateError, Result};
use crate::transfer::RetryPolicy;
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Fail unless every credential variable the stores need is set.
    pub fn check_environment(&self) -> Result<()> {
        let missing = validation::missing_env_vars(self, |name| std::env::var(name).ok());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::Config(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )))
        }
    }

    /// Build the immutable per-run configuration.
    ///
    /// `collection` is the CLI scope argument; when absent the configured
    /// `migration.collection` applies.
    pub fn run_config(&self, collection: Option<&str>) -> Result<RunConfig> {
        let m = &self.migration;
        let scope = Scope::parse(collection.or(m.collection.as_deref()))?;

        Ok(RunConfig {
            workers: m.get_workers(),
            soft_budget: Duration::from_secs(m.get_time_budget_secs()),
            grace_period: Duration::from_secs(m.get_grace_period_secs()),
            checkpoint_interval: m.get_checkpoint_interval(),
            base_prefix: m.base_prefix.clone(),
            scope,
            retry: RetryPolicy {
                max_attempts: m.get_max_attempts(),
                base_delay: Duration::from_millis(m.get_retry_base_delay_ms()),
                max_delay: Duration::from_millis(m.get_retry_max_delay_ms()),
            },
        })
    }
}

impl S3StoreConfig {
    /// Read this store's credentials from the environment.
    pub fn credentials(&self, side: StoreSide) -> Result<S3Credentials> {
        let [key_var, secret_var] = self.credential_vars(side);
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| MigrateError::Config(format!("missing environment variable: {}", name)))
        };
        Ok(S3Credentials {
            access_key_id: read(&key_var)?,
            secret_access_key: read(&secret_var)?,
        })
    }
}

/// Immutable configuration for one run, passed explicitly to the
/// orchestrator and worker pool.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Number of concurrent execution units.
    pub workers: usize,

    /// No new asset is dispatched once this much time has elapsed.
    pub soft_budget: Duration,

    /// How long in-flight transfers may drain after the budget expires.
    pub grace_period: Duration,

    /// Checkpoint every N completed assets.
    pub checkpoint_interval: usize,

    /// Prefix all collections live under.
    pub base_prefix: String,

    /// Collection scope.
    pub scope: Scope,

    /// In-attempt retry policy for transient errors.
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        let migration = MigrationConfig::default();
        Self {
            workers: migration.get_workers(),
            soft_budget: Duration::from_secs(migration.get_time_budget_secs()),
            grace_period: Duration::from_secs(migration.get_grace_period_secs()),
            checkpoint_interval: migration.get_checkpoint_interval(),
            base_prefix: migration.base_prefix,
            scope: Scope::All,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunConfig {
    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the soft time budget.
    pub fn with_soft_budget(mut self, budget: Duration) -> Self {
        self.soft_budget = budget;
        self
    }

    /// Set the drain grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the checkpoint interval.
    pub fn with_checkpoint_interval(mut self, every: usize) -> Self {
        self.checkpoint_interval = every.max(1);
        self
    }

    /// Set the collection scope.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Listing prefix for this run.
    pub fn prefix(&self) -> String {
        self.scope.prefix(&self.base_prefix)
    }
}
