//! Configuration types and loading.
//!
//! Provides all configuration structures for the arena:
//! - `ArenaConfig`: Top-level configuration with validation
//! - `AgentSpec`: one typed roster entry (backend + model + credentials)
//! - Section configs: execution, voting, risk, storage

mod roster;
mod settings;

pub use roster::{AgentSpec, BackendKind};
pub use settings::{
    ArenaConfig, BlockedPolicy, ExecutionConfig, RiskConfig, StorageConfig, VotingConfig,
};
