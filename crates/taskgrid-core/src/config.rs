//! Process-wide configuration (spec §6 "Configuration recognized by the core").

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TaskGridError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub general: GeneralConfig,
    pub retry_policy: RetryPolicyConfig,
    pub concurrency: ConcurrencyConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            retry_policy: RetryPolicyConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load config from a specific `taskgrid.toml` file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TaskGridError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| TaskGridError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `./taskgrid.toml` if it exists, otherwise return defaults.
    pub fn load_or_default() -> Self {
        let path = PathBuf::from("taskgrid.toml");
        if path.exists() {
            match Self::load(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(%e, "failed to load taskgrid.toml, falling back to defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.max_concurrent_executions == 0 {
            return Err(TaskGridError::Config(
                "general.max_concurrent_executions must be > 0".into(),
            ));
        }
        if self.general.log_cache_lines_per_eid == 0 {
            return Err(TaskGridError::Config(
                "general.log_cache_lines_per_eid must be > 0".into(),
            ));
        }
        if self.general.default_node_timeout_minutes == 0 {
            return Err(TaskGridError::Config(
                "general.default_node_timeout_minutes must be > 0".into(),
            ));
        }
        if self.general.default_workflow_timeout_minutes == 0 {
            return Err(TaskGridError::Config(
                "general.default_workflow_timeout_minutes must be > 0".into(),
            ));
        }
        if self.general.supported_languages.is_empty() {
            return Err(TaskGridError::Config(
                "general.supported_languages must list at least one language".into(),
            ));
        }

        if self.retry_policy.max_retries > 20 {
            return Err(TaskGridError::Config(
                "retry_policy.max_retries looks unreasonably high (> 20)".into(),
            ));
        }
        if self.retry_policy.delay_seconds == 0 {
            return Err(TaskGridError::Config(
                "retry_policy.delay_seconds must be > 0".into(),
            ));
        }

        if self.concurrency.max_concurrent_nodes == 0 {
            return Err(TaskGridError::Config(
                "concurrency.max_concurrent_nodes must be > 0".into(),
            ));
        }
        if self.concurrency.queue_depth == 0 {
            return Err(TaskGridError::Config(
                "concurrency.queue_depth must be > 0".into(),
            ));
        }

        Ok(())
    }
}

/// General orchestrator-wide knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Upper bound on concurrently running program/workflow executions.
    pub max_concurrent_executions: usize,
    /// Ring-buffer size for the streaming hub's per-execution log cache.
    pub log_cache_lines_per_eid: usize,
    /// How long a completed execution's stream topic survives for late joiners.
    pub streaming_grace_seconds: u64,
    /// Default per-node timeout when a node doesn't declare its own.
    pub default_node_timeout_minutes: u64,
    /// Default per-workflow timeout when settings don't declare one.
    pub default_workflow_timeout_minutes: u64,
    /// Root directory under which per-execution sandboxes are created.
    pub sandbox_root: PathBuf,
    /// Languages the language-runner registry is expected to resolve.
    pub supported_languages: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            log_cache_lines_per_eid: 1_000,
            streaming_grace_seconds: 300,
            default_node_timeout_minutes: 15,
            default_workflow_timeout_minutes: 120,
            sandbox_root: PathBuf::from(".taskgrid/sandboxes"),
            supported_languages: vec![
                "python".into(),
                "csharp".into(),
                "java".into(),
                "nodejs".into(),
            ],
        }
    }
}

/// Workflow-level retry defaults. A node's own `executionSettings` retry
/// fields take precedence over these when present (Open Question resolved
/// in DESIGN.md: node-level wins over workflow-level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub delay_seconds: u64,
    pub exponential_backoff: bool,
    pub retry_on_error_types: Vec<String>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay_seconds: 1,
            exponential_backoff: true,
            retry_on_error_types: vec!["NonZeroExit".into(), "Timeout".into()],
        }
    }
}

/// Scheduler/streaming-hub concurrency caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_nodes: usize,
    pub max_subscribers_per_execution: usize,
    pub queue_depth: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 5,
            max_subscribers_per_execution: 64,
            queue_depth: 256,
        }
    }
}
