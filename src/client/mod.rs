//! Backend call contract.
//!
//! The arena never talks to a model wire protocol directly; every backend is
//! reached through [`AgentClient`], and backends are resolved from roster
//! entries by an injected [`ClientFactory`]. No ambient singletons.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AgentSpec;
use crate::error::Result;

/// Uniform request interface to one model backend.
///
/// Implementations should propagate the deadline to the transport layer so
/// an expired call stops consuming backend quota; the arena additionally
/// enforces the deadline locally with `tokio::time::timeout` and abandons
/// the future on expiry.
pub trait AgentClient: Send + Sync {
    /// Send one prompt pair and return the full response text.
    fn call<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

impl<C: AgentClient> AgentClient for Arc<C> {
    fn call<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        (**self).call(system_prompt, user_prompt, timeout)
    }
}

/// Resolves a roster entry to a live client.
///
/// Resolution happens once per run, before Phase 1; a factory error for any
/// roster entry is a configuration failure and aborts the run.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, spec: &AgentSpec) -> Result<Arc<dyn AgentClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&AgentSpec) -> Result<Arc<dyn AgentClient>> + Send + Sync,
{
    fn client_for(&self, spec: &AgentSpec) -> Result<Arc<dyn AgentClient>> {
        self(spec)
    }
}
