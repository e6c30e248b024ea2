//! Typed agent roster.
//!
//! The roster is resolved and validated once per run; backend credentials
//! are referenced by environment variable name, never stored inline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Known backend families. `Custom` covers anything resolved by a
/// user-supplied `ClientFactory`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Gemini,
    DeepSeek,
    Custom(String),
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Gemini => write!(f, "gemini"),
            Self::DeepSeek => write!(f, "deepseek"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// One entry in the agent roster: a backend identity plus model name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub backend: BackendKind,
    pub model: String,
    /// Environment variable holding the credential for this backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Optional base URL override for self-hosted backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl AgentSpec {
    pub fn new(backend: BackendKind, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            api_key_env: None,
            base_url: None,
        }
    }

    pub fn with_api_key_env(mut self, env: impl Into<String>) -> Self {
        self.api_key_env = Some(env.into());
        self
    }

    /// Stable identity used to key agent results and historical scores.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.backend, self.model)
    }
}
