use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use super::roster::AgentSpec;
use crate::error::{ArenaError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub agents: Vec<AgentSpec>,
    pub execution: ExecutionConfig,
    pub voting: VotingConfig,
    pub risk: RiskConfig,
    pub storage: StorageConfig,
}

impl ArenaConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| ArenaError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency.
    /// Collects every problem instead of stopping at the first.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.agents.is_empty() {
            errors.push("at least one agent must be configured".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &self.agents {
            if spec.model.is_empty() {
                errors.push(format!("agent {} has an empty model name", spec.backend));
            }
            if !seen.insert(spec.identity()) {
                errors.push(format!("duplicate agent in roster: {}", spec.identity()));
            }
        }

        if self.execution.call_timeout_secs == 0 {
            errors.push("execution.call_timeout_secs must be greater than 0".to_string());
        }
        if self.voting.min_voters < 2 {
            errors.push("voting.min_voters must be at least 2".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ArenaError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per-call deadline for every outbound backend call (both phases).
    pub call_timeout_secs: u64,
    /// Whether Phase 1 attempts the multi-step reasoning pipeline before
    /// falling back to a single direct call.
    pub reasoning_pipeline: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 180,
            reasoning_pipeline: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Minimum successful Phase 1 results required to hold a vote.
    pub min_voters: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self { min_voters: 2 }
    }
}

/// What to do when the risk checker returns `Blocked` for the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedPolicy {
    /// Log the block and adopt anyway (legacy behavior).
    #[default]
    Warn,
    /// Refuse adoption and surface `ArenaError::RiskBlocked`.
    Enforce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub blocked_policy: BlockedPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("arena.db"),
        }
    }
}
