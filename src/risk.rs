//! Pluggable risk-check contract applied to the winning proposal.

use serde::{Deserialize, Serialize};

use crate::harness::AccountState;
use crate::recovery::{Allocation, TradeDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Approved,
    Modified,
    Blocked,
}

impl RiskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Modified => "modified",
            Self::Blocked => "blocked",
        }
    }
}

/// Outcome of one risk evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub status: RiskStatus,
    pub reasons: Vec<String>,
    /// When present, replaces the winner's allocation list before logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_allocations: Option<Vec<Allocation>>,
}

impl RiskVerdict {
    pub fn approved() -> Self {
        Self {
            status: RiskStatus::Approved,
            reasons: Vec::new(),
            modified_allocations: None,
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            status: RiskStatus::Blocked,
            reasons: vec![reason.into()],
            modified_allocations: None,
        }
    }

    pub fn modified(reason: impl Into<String>, allocations: Vec<Allocation>) -> Self {
        Self {
            status: RiskStatus::Modified,
            reasons: vec![reason.into()],
            modified_allocations: Some(allocations),
        }
    }
}

/// Synchronous risk evaluation over the proposed decision and the current
/// portfolio state. Injected into the arena; never looked up from ambient
/// state.
pub trait RiskChecker: Send + Sync {
    fn evaluate(&self, decision: &TradeDecision, account: &AccountState) -> RiskVerdict;
}

/// Approves everything. Default for tests and dry runs.
#[derive(Debug, Default)]
pub struct NoopRiskChecker;

impl RiskChecker for NoopRiskChecker {
    fn evaluate(&self, _decision: &TradeDecision, _account: &AccountState) -> RiskVerdict {
        RiskVerdict::approved()
    }
}

/// Caps the total proposed allocation weight; scales positions down
/// proportionally instead of blocking when the cap is exceeded.
#[derive(Debug)]
pub struct BudgetRiskChecker {
    pub max_total_weight: f64,
}

impl Default for BudgetRiskChecker {
    fn default() -> Self {
        Self {
            max_total_weight: 1.0,
        }
    }
}

impl RiskChecker for BudgetRiskChecker {
    fn evaluate(&self, decision: &TradeDecision, _account: &AccountState) -> RiskVerdict {
        let total: f64 = decision.allocations.iter().map(|a| a.weight).sum();
        if total <= self.max_total_weight || decision.allocations.is_empty() {
            return RiskVerdict::approved();
        }
        let scale = self.max_total_weight / total;
        let scaled = decision
            .allocations
            .iter()
            .map(|a| Allocation {
                symbol: a.symbol.clone(),
                weight: a.weight * scale,
            })
            .collect();
        RiskVerdict::modified(
            format!(
                "total allocation {:.2} exceeds cap {:.2}, scaled down",
                total, self.max_total_weight
            ),
            scaled,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::TradeAction;

    fn decision_with(weights: &[(&str, f64)]) -> TradeDecision {
        TradeDecision {
            action: Some(TradeAction::Buy),
            allocations: weights
                .iter()
                .map(|(s, w)| Allocation {
                    symbol: s.to_string(),
                    weight: *w,
                })
                .collect(),
            confidence: Some(0.8),
            reasoning: None,
        }
    }

    #[test]
    fn test_noop_approves() {
        let verdict = NoopRiskChecker.evaluate(&decision_with(&[]), &AccountState::default());
        assert_eq!(verdict.status, RiskStatus::Approved);
    }

    #[test]
    fn test_budget_checker_within_cap() {
        let checker = BudgetRiskChecker::default();
        let verdict = checker.evaluate(
            &decision_with(&[("AAPL", 0.4), ("MSFT", 0.3)]),
            &AccountState::default(),
        );
        assert_eq!(verdict.status, RiskStatus::Approved);
        assert!(verdict.modified_allocations.is_none());
    }

    #[test]
    fn test_budget_checker_scales_down() {
        let checker = BudgetRiskChecker::default();
        let verdict = checker.evaluate(
            &decision_with(&[("AAPL", 0.8), ("MSFT", 0.8)]),
            &AccountState::default(),
        );
        assert_eq!(verdict.status, RiskStatus::Modified);
        let scaled = verdict.modified_allocations.unwrap();
        let total: f64 = scaled.iter().map(|a| a.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
