//! Fire-and-forget memory-write contract.
//!
//! After adoption the arena appends (a) a shared "what won and why" summary
//! visible to all agents in future runs and (b) a per-agent private log of
//! that agent's voting rationale. Failures are logged and never propagated
//! into the pipeline result.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait MemoryWriter: Send + Sync {
    /// Append to the shared cross-agent memory for this context.
    async fn append_shared(&self, context_id: &str, summary: &str) -> Result<()>;

    /// Append to one agent's private memory.
    async fn append_agent(&self, context_id: &str, agent_identity: &str, note: &str) -> Result<()>;
}

/// Discards everything. Default when no memory collaborator is wired in.
#[derive(Debug, Default)]
pub struct NoopMemoryWriter;

#[async_trait]
impl MemoryWriter for NoopMemoryWriter {
    async fn append_shared(&self, _context_id: &str, _summary: &str) -> Result<()> {
        Ok(())
    }

    async fn append_agent(
        &self,
        _context_id: &str,
        _agent_identity: &str,
        _note: &str,
    ) -> Result<()> {
        Ok(())
    }
}
