pub mod arena;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod harness;
pub mod memory;
pub mod recovery;
pub mod risk;
pub mod store;

pub use arena::{Arena, ArenaEvent, RunOutcome};
pub use client::{AgentClient, ClientFactory};
pub use config::{AgentSpec, ArenaConfig, BackendKind, BlockedPolicy};
pub use error::{ArenaError, ExecutionError, Result};
pub use harness::{AccountState, DecisionContext, Quote, TaskSpec};
pub use memory::{MemoryWriter, NoopMemoryWriter};
pub use recovery::{recover, ParseQuality, RecoveredDecision, TradeAction, TradeDecision};
pub use risk::{BudgetRiskChecker, NoopRiskChecker, RiskChecker, RiskStatus, RiskVerdict};
pub use store::{AdoptionLog, AgentResult, AgentStatus, ArenaStore, HistoricalScore, PipelineState};
