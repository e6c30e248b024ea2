//! Phase 1: concurrent decision fan-out with per-agent fallback.
//!
//! Every roster agent receives the same rendered context. Each agent first
//! runs the two-step reasoning pipeline (analysis, then decision); any
//! non-timeout failure falls back to one direct single-shot call. Exactly
//! one result is produced per agent whatever happens, and a timed-out call
//! is never retried within the run, so per-agent wall time stays bounded by
//! the call deadline.

use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::events::{ArenaEvent, EventSink};
use super::prompts::{
    build_analysis_prompt, build_decision_prompt, ANALYSIS_SYSTEM_PROMPT, DECISION_SYSTEM_PROMPT,
};
use super::ResolvedAgent;
use crate::error::ExecutionError;
use crate::harness::DecisionContext;
use crate::recovery::{recover, ParseQuality};
use crate::store::{AgentResult, AgentStatus};

/// Rough cost proxy: characters over a typical token width.
fn estimate_cost(input: &str, output: &str) -> f64 {
    (input.len() + output.len()) as f64 / 4.0
}

async fn timed_call(
    agent: &ResolvedAgent,
    system_prompt: &str,
    user_prompt: &str,
    deadline: Duration,
) -> std::result::Result<String, ExecutionError> {
    match tokio::time::timeout(deadline, agent.client.call(system_prompt, user_prompt, deadline))
        .await
    {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            let classified = ExecutionError::from_message(&e.to_string());
            Err(classified)
        }
        Err(_) => Err(ExecutionError::Timeout {
            operation: format!("call to {}", agent.spec.identity()),
            duration: deadline,
        }),
    }
}

/// Two-step reasoning pipeline: analysis feeding a decision call.
async fn reasoning_pipeline(
    agent: &ResolvedAgent,
    context: &DecisionContext,
    deadline: Duration,
) -> std::result::Result<String, ExecutionError> {
    let analysis = timed_call(
        agent,
        ANALYSIS_SYSTEM_PROMPT,
        &build_analysis_prompt(context),
        deadline,
    )
    .await?;

    timed_call(
        agent,
        DECISION_SYSTEM_PROMPT,
        &build_decision_prompt(context, Some(&analysis)),
        deadline,
    )
    .await
}

/// Execute one agent end to end, always producing a terminal result.
async fn run_agent(
    agent: &ResolvedAgent,
    context: &DecisionContext,
    deadline: Duration,
    reasoning_enabled: bool,
    sink: &EventSink,
) -> AgentResult {
    let identity = agent.spec.identity();
    sink.emit(ArenaEvent::AgentStarted {
        context_id: context.id.clone(),
        agent: identity.clone(),
    });

    let started = Instant::now();
    let input_text = build_decision_prompt(context, None);

    let outcome = if reasoning_enabled {
        match reasoning_pipeline(agent, context, deadline).await {
            Ok(text) => Ok(text),
            // A timeout already consumed the per-agent budget; do not retry.
            Err(e) if e.is_timeout() => Err(e),
            Err(e) => {
                debug!(
                    agent = %identity,
                    error = %e,
                    "Reasoning pipeline failed, falling back to direct call"
                );
                timed_call(agent, DECISION_SYSTEM_PROMPT, &input_text, deadline).await
            }
        }
    } else {
        timed_call(agent, DECISION_SYSTEM_PROMPT, &input_text, deadline).await
    };

    let mut result = AgentResult::new(&context.id, agent.spec.backend.to_string(), &agent.spec.model);
    result.input_text = input_text;
    result.latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(text) => {
            let recovered = recover(&text);
            result.status = AgentStatus::Success;
            result.parse_quality = recovered.quality;
            result.decision = recovered.decision;
            result.cost_estimate = estimate_cost(&result.input_text, &text);
            result.output_text = text;
            info!(
                agent = %identity,
                quality = result.parse_quality.as_str(),
                latency_ms = result.latency_ms,
                "Agent proposal collected"
            );
        }
        Err(e) if e.is_timeout() => {
            result.status = AgentStatus::Timeout;
            result.parse_quality = ParseQuality::RawOnly;
            result.output_text = e.to_string();
            warn!(agent = %identity, deadline_secs = deadline.as_secs(), "Agent timed out");
        }
        Err(e) => {
            result.status = AgentStatus::Error;
            result.parse_quality = ParseQuality::RawOnly;
            result.output_text = e.to_string();
            warn!(agent = %identity, error = %e, "Agent call failed");
        }
    }

    sink.emit(ArenaEvent::AgentCompleted {
        context_id: context.id.clone(),
        agent: identity,
        status: result.status,
    });
    result
}

/// Run every agent concurrently; wall time tracks the slowest agent, not
/// the sum. Results come back keyed by agent identity, not arrival order.
pub(super) async fn run_fanout(
    context: &DecisionContext,
    agents: &[ResolvedAgent],
    deadline: Duration,
    reasoning_enabled: bool,
    sink: &EventSink,
) -> Vec<AgentResult> {
    let futures = agents
        .iter()
        .map(|agent| run_agent(agent, context, deadline, reasoning_enabled, sink));
    join_all(futures).await
}
