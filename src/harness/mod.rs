//! Immutable decision context ("harness") shared by every agent in one run.
//!
//! The context is assembled and persisted by an external collaborator; the
//! arena receives a context id, loads the snapshot, and never mutates it.
//! Identical id means identical bytes on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Task definition for one arena run: what the agents are deciding about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Budget available for new allocations, in account currency.
    pub budget: f64,
    /// Free-form constraints passed through to the agents.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Symbols agents are allowed to allocate to.
    #[serde(default)]
    pub eligible_symbols: Vec<String>,
}

/// Current account state, also fed to the risk checker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub cash: f64,
    pub total_value: f64,
    /// Current holdings: symbol -> weight of total value.
    #[serde(default)]
    pub positions: BTreeMap<String, f64>,
}

/// Snapshot of one quoted instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change_pct: f64,
}

/// The immutable input snapshot for one arena run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub quotes: Vec<Quote>,
    /// Valuation commentary (P/E bands, fair-value estimates).
    #[serde(default)]
    pub valuation: String,
    /// Macro backdrop summary.
    #[serde(default)]
    pub macro_view: String,
    /// Sentiment readout (news tone, positioning).
    #[serde(default)]
    pub sentiment: String,
    pub account: AccountState,
    /// What the shared memory says about previous runs.
    #[serde(default)]
    pub memory_summary: String,
    pub task: TaskSpec,
}

impl DecisionContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            quotes: Vec::new(),
            valuation: String::new(),
            macro_view: String::new(),
            sentiment: String::new(),
            account: AccountState::default(),
            memory_summary: String::new(),
            task: TaskSpec::default(),
        }
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.task = task;
        self
    }

    pub fn with_account(mut self, account: AccountState) -> Self {
        self.account = account;
        self
    }

    pub fn with_quotes(mut self, quotes: Vec<Quote>) -> Self {
        self.quotes = quotes;
        self
    }

    /// Render the snapshot as the prompt section shared by all agents.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();

        if !self.quotes.is_empty() {
            let rows: Vec<String> = self
                .quotes
                .iter()
                .map(|q| format!("{}: {:.2} ({:+.2}%)", q.symbol, q.price, q.change_pct))
                .collect();
            parts.push(format!("## Quotes\n{}", rows.join("\n")));
        }
        if !self.valuation.is_empty() {
            parts.push(format!("## Valuation\n{}", self.valuation));
        }
        if !self.macro_view.is_empty() {
            parts.push(format!("## Macro\n{}", self.macro_view));
        }
        if !self.sentiment.is_empty() {
            parts.push(format!("## Sentiment\n{}", self.sentiment));
        }
        parts.push(format!(
            "## Account\nCash: {:.2}\nTotal value: {:.2}",
            self.account.cash, self.account.total_value
        ));
        if !self.account.positions.is_empty() {
            let rows: Vec<String> = self
                .account
                .positions
                .iter()
                .map(|(sym, w)| format!("{}: {:.1}%", sym, w * 100.0))
                .collect();
            parts.push(format!("## Positions\n{}", rows.join("\n")));
        }
        if !self.memory_summary.is_empty() {
            parts.push(format!("## Memory\n{}", self.memory_summary));
        }
        parts.push(format!(
            "## Task\nBudget: {:.2}\nEligible symbols: {}\nConstraints: {}",
            self.task.budget,
            self.task.eligible_symbols.join(", "),
            if self.task.constraints.is_empty() {
                "(none)".to_string()
            } else {
                self.task.constraints.join("; ")
            }
        ));

        parts.join("\n\n")
    }
}
