//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys
//! use a double underscore, e.g. `RUNNER__DEFAULT_STEP_TIMEOUT_MS=5000`.

use autoflow_workflow::service::DEFAULT_MAX_RETAINED_RUNS;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Integration catalog to load. The bundled catalog is used when unset.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Run execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Per-attempt timeout for nodes whose policy does not set one.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Finished runs kept in memory before the oldest are dropped.
    #[serde(default = "default_max_retained_runs")]
    pub max_retained_runs: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_max_retained_runs() -> usize {
    DEFAULT_MAX_RETAINED_RUNS
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            max_retained_runs: default_max_retained_runs(),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but cannot be parsed.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(
        source: impl config::Source + Send + Sync + 'static,
    ) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}
