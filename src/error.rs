use std::time::Duration;
use thiserror::Error;

/// Classification of a single backend call failure.
///
/// Only unambiguous, structured patterns are matched (HTTP codes, explicit
/// keywords); everything else is `Other` and left for the caller to record
/// verbatim.
#[derive(Debug, Clone)]
pub enum ExecutionError {
    Timeout { operation: String, duration: Duration },
    RateLimited { retry_after_secs: Option<u64> },
    Network(String),
    Parse(String),
    Other(String),
}

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Network(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Parse an error message into a structured ExecutionError.
    pub fn from_message(msg: &str) -> Self {
        if msg.contains("429") || msg.contains("Too Many Requests") {
            return Self::RateLimited {
                retry_after_secs: Self::extract_retry_after(msg),
            };
        }
        if msg.contains("502") || msg.contains("503") || msg.contains("504") {
            return Self::Network(msg.to_string());
        }
        if msg.contains("timed out after") || msg.contains("timeout after") {
            return Self::Timeout {
                operation: "backend call".to_string(),
                duration: Duration::from_secs(0),
            };
        }
        Self::Other(msg.to_string())
    }

    fn extract_retry_after(msg: &str) -> Option<u64> {
        let msg_lower = msg.to_lowercase();
        for pattern in ["retry after ", "retry-after: ", "retry_after="] {
            if let Some(idx) = msg_lower.find(pattern) {
                let after = &msg_lower[idx + pattern.len()..];
                let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
                if let Ok(secs) = digits.parse() {
                    return Some(secs);
                }
            }
        }
        None
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout {
                operation,
                duration,
            } => write!(f, "Timeout after {}s: {}", duration.as_secs(), operation),
            Self::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "Rate limited, retry after {}s", secs),
                None => write!(f, "Rate limited"),
            },
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Parse(msg) => write!(f, "Parse error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ExecutionError {}

#[derive(Error, Debug)]
pub enum ArenaError {
    #[error("Decision context not found: {0}")]
    ContextNotFound(String),

    #[error("No model available: all {attempted} agents failed for context {context_id}")]
    NoModelAvailable {
        context_id: String,
        attempted: usize,
    },

    #[error("Adoption blocked by risk check: {reasons}")]
    RiskBlocked { reasons: String },

    #[error("Backend call failed: {0}")]
    BackendCall(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ArenaError>;

impl From<ExecutionError> for ArenaError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Timeout {
                operation,
                duration,
            } => ArenaError::Timeout(format!("{} (after {}s)", operation, duration.as_secs())),
            other => ArenaError::BackendCall(other.to_string()),
        }
    }
}

pub(crate) fn store_err(msg: impl Into<String>) -> ArenaError {
    ArenaError::Store(msg.into())
}

pub(crate) fn store_err_with(msg: &str, e: impl std::fmt::Display) -> ArenaError {
    ArenaError::Store(format!("{}: {}", msg, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        let err = ExecutionError::from_message("HTTP 429 Too Many Requests, retry after 30");
        assert!(err.is_transient());
        match err {
            ExecutionError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, Some(30));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_network_classification() {
        assert!(ExecutionError::from_message("upstream returned 503").is_transient());
    }

    #[test]
    fn test_ambiguous_message_is_other() {
        let err = ExecutionError::from_message("model refused the request");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_conversion() {
        let err = ExecutionError::Timeout {
            operation: "vote".to_string(),
            duration: Duration::from_secs(60),
        };
        let arena: ArenaError = err.into();
        assert!(matches!(arena, ArenaError::Timeout(_)));
    }
}
