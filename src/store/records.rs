//! Persisted arena records.
//!
//! Everything except `PipelineState` and `HistoricalScore` is append-only:
//! rows are written once and never updated. Corrections to an adoption log
//! happen by writing a new log row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::recovery::{Allocation, ParseQuality, TradeDecision};

/// Lifecycle status of one agent's Phase 1 attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Timeout,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "timeout" => Some(Self::Timeout),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One record per (context, agent) pair, written exactly once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub id: String,
    pub context_id: String,
    pub backend: String,
    pub model: String,
    pub status: AgentStatus,
    pub parse_quality: ParseQuality,
    pub input_text: String,
    pub output_text: String,
    pub decision: Option<TradeDecision>,
    pub latency_ms: u64,
    pub cost_estimate: f64,
    pub created_at: DateTime<Utc>,
}

impl AgentResult {
    pub fn new(context_id: impl Into<String>, backend: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            backend: backend.into(),
            model: model.into(),
            status: AgentStatus::Error,
            parse_quality: ParseQuality::RawOnly,
            input_text: String::new(),
            output_text: String::new(),
            decision: None,
            latency_ms: 0,
            cost_estimate: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Identity used for historical scoring: backend/model.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.backend, self.model)
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }

    /// Self-reported confidence, 0.0 when absent.
    pub fn confidence(&self) -> f64 {
        self.decision
            .as_ref()
            .and_then(|d| d.confidence)
            .unwrap_or(0.0)
    }
}

/// Direction of one peer-review vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    Approve,
    Reject,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// One vote cast by a voting agent against another agent's proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteEdge {
    pub id: String,
    pub context_id: String,
    pub voter_result_id: String,
    pub target_result_id: String,
    pub vote_type: VoteType,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl VoteEdge {
    pub fn new(
        context_id: impl Into<String>,
        voter_result_id: impl Into<String>,
        target_result_id: impl Into<String>,
        vote_type: VoteType,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            voter_result_id: voter_result_id.into(),
            target_result_id: target_result_id.into(),
            vote_type,
            reasoning: reasoning.into(),
            created_at: Utc::now(),
        }
    }
}

/// Equal-weight benchmark allocation recorded alongside each adoption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub allocations: Vec<Allocation>,
}

impl BenchmarkRecord {
    /// Equal weight across all eligible symbols.
    pub fn equal_weight(symbols: &[String]) -> Self {
        if symbols.is_empty() {
            return Self::default();
        }
        let weight = 1.0 / symbols.len() as f64;
        Self {
            allocations: symbols
                .iter()
                .map(|s| Allocation {
                    symbol: s.clone(),
                    weight,
                })
                .collect(),
        }
    }
}

/// Immutable record of which proposal won and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptionLog {
    pub id: String,
    pub context_id: String,
    pub winner_result_id: String,
    pub net_score: i64,
    pub approve_count: i64,
    pub reject_count: i64,
    /// Net score per agent result id at adoption time.
    pub score_map: BTreeMap<String, i64>,
    pub risk_status: String,
    pub benchmark: BenchmarkRecord,
    pub created_at: DateTime<Utc>,
}

/// Lifetime aggregate per (backend, model), used only as a tie-break input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalScore {
    pub backend: String,
    pub model: String,
    pub approvals: i64,
    pub rejections: i64,
    pub adoptions: i64,
    pub updated_at: DateTime<Utc>,
}

impl HistoricalScore {
    pub fn net(&self) -> i64 {
        self.approvals - self.rejections
    }
}

/// The only record updated in place: phase completion flags per context.
///
/// A flag is set only after the phase's outputs are durably written, but the
/// flag write is a separate command from the output writes, so a crash in
/// between re-runs that phase (at-least-once, not exactly-once).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    pub context_id: String,
    pub phase1_done: bool,
    pub phase2_done: bool,
    pub phase3_done: bool,
}

/// Phase identifier for flag updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FanOut,
    Voting,
    Tally,
}

impl Phase {
    pub fn flag_column(&self) -> &'static str {
        match self {
            Self::FanOut => "phase1_done",
            Self::Voting => "phase2_done",
            Self::Tally => "phase3_done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_result_identity() {
        let result = AgentResult::new("ctx", "openai", "gpt-4o");
        assert_eq!(result.identity(), "openai/gpt-4o");
        assert!(!result.is_success());
    }

    #[test]
    fn test_equal_weight_benchmark() {
        let bench = BenchmarkRecord::equal_weight(&[
            "AAPL".to_string(),
            "MSFT".to_string(),
            "NVDA".to_string(),
            "TSLA".to_string(),
        ]);
        assert_eq!(bench.allocations.len(), 4);
        for alloc in &bench.allocations {
            assert!((alloc.weight - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_equal_weight_empty() {
        assert!(BenchmarkRecord::equal_weight(&[]).allocations.is_empty());
    }

    #[test]
    fn test_historical_net() {
        let score = HistoricalScore {
            backend: "openai".into(),
            model: "gpt-4o".into(),
            approvals: 7,
            rejections: 3,
            adoptions: 2,
            updated_at: Utc::now(),
        };
        assert_eq!(score.net(), 4);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [AgentStatus::Success, AgentStatus::Timeout, AgentStatus::Error] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("bogus"), None);
    }
}
