//! Three-phase decision pipeline: fan-out, peer vote, tally.
//!
//! The arena owns no business state of its own. Every phase writes its
//! outputs to the store before its completion flag, and `run` re-reads
//! phase outputs from the store rather than trusting in-memory values, so
//! a crashed run can be resumed by calling `run` again with the same
//! context id.

mod ballot;
mod events;
mod fanout;
mod prompts;
mod tally;

pub use events::ArenaEvent;
pub use tally::{count_votes, select_winner, VoteCount};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::client::{AgentClient, ClientFactory};
use crate::config::{AgentSpec, ArenaConfig, BlockedPolicy};
use crate::error::{ArenaError, Result};
use crate::harness::TaskSpec;
use crate::memory::{MemoryWriter, NoopMemoryWriter};
use crate::risk::{NoopRiskChecker, RiskChecker, RiskStatus, RiskVerdict};
use crate::store::{
    AdoptionLog, AgentResult, ArenaStore, BenchmarkRecord, HistoricalScore, Phase, VoteEdge,
};

use events::EventSink;

/// A roster entry bound to a live client.
pub(crate) struct ResolvedAgent {
    pub spec: AgentSpec,
    pub client: Arc<dyn AgentClient>,
}

/// Final outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub winner: AgentResult,
    /// The winner's decision after any risk modification.
    pub decision: crate::recovery::TradeDecision,
    pub adoption: AdoptionLog,
}

/// The decision arena. Collaborators are injected at construction; the
/// arena never reaches for ambient state.
pub struct Arena {
    store: ArenaStore,
    config: ArenaConfig,
    agents: Vec<ResolvedAgent>,
    risk: Arc<dyn RiskChecker>,
    memory: Arc<dyn MemoryWriter>,
    sink: EventSink,
}

impl Arena {
    /// Resolve every roster agent through the factory up front, so a
    /// misconfigured backend fails at construction rather than mid-run.
    pub fn new(
        store: ArenaStore,
        config: ArenaConfig,
        factory: &dyn ClientFactory,
    ) -> Result<Self> {
        config.validate()?;
        let agents = config
            .agents
            .iter()
            .map(|spec| {
                Ok(ResolvedAgent {
                    spec: spec.clone(),
                    client: factory.client_for(spec)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            store,
            config,
            agents,
            risk: Arc::new(NoopRiskChecker),
            memory: Arc::new(NoopMemoryWriter),
            sink: EventSink::new(256),
        })
    }

    pub fn with_risk_checker(mut self, risk: Arc<dyn RiskChecker>) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_memory_writer(mut self, memory: Arc<dyn MemoryWriter>) -> Self {
        self.memory = memory;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArenaEvent> {
        self.sink.subscribe()
    }

    fn call_deadline(&self) -> Duration {
        Duration::from_secs(self.config.execution.call_timeout_secs)
    }

    /// Run (or resume) the full pipeline for a stored context.
    pub async fn run(&self, context_id: &str) -> Result<RunOutcome> {
        let context = self.store.load_context(context_id).await?;
        let state = self.store.pipeline_state(context_id).await?;

        // A finished run is replayed from the adoption log, not re-decided.
        if state.phase3_done {
            if let Some(outcome) = self.replay_outcome(context_id).await? {
                info!(context_id, "Pipeline already complete, returning recorded outcome");
                return Ok(outcome);
            }
            warn!(context_id, "Tally flag set but no adoption log found, re-running tally");
        }

        // Phase 1: fan-out.
        if state.phase1_done {
            info!(context_id, "Fan-out already complete, skipping");
        } else {
            self.sink.emit(ArenaEvent::PhaseStarted {
                context_id: context_id.to_string(),
                phase: 1,
            });
            let results = fanout::run_fanout(
                &context,
                &self.agents,
                self.call_deadline(),
                self.config.execution.reasoning_pipeline,
                &self.sink,
            )
            .await;
            for result in results {
                self.store.insert_agent_result(result).await?;
            }
            self.store.set_phase_done(context_id, Phase::FanOut).await?;
            self.sink.emit(ArenaEvent::PhaseCompleted {
                context_id: context_id.to_string(),
                phase: 1,
            });
        }

        // The snapshot every later phase works from.
        let results = self.store.agent_results(context_id).await?;
        let eligible: Vec<AgentResult> = results
            .iter()
            .filter(|r| r.is_success() && r.decision.is_some())
            .cloned()
            .collect();

        if eligible.is_empty() {
            return Err(ArenaError::NoModelAvailable {
                context_id: context_id.to_string(),
                attempted: results.len(),
            });
        }

        // Phase 2: peer vote, skipped below quorum.
        if state.phase2_done {
            info!(context_id, "Voting already complete, skipping");
        } else if eligible.len() < self.config.voting.min_voters {
            info!(
                context_id,
                eligible = eligible.len(),
                min_voters = self.config.voting.min_voters,
                "Below voting quorum, adopting without a vote"
            );
            self.store.set_phase_done(context_id, Phase::Voting).await?;
        } else {
            self.sink.emit(ArenaEvent::PhaseStarted {
                context_id: context_id.to_string(),
                phase: 2,
            });
            let clients: HashMap<String, ResolvedAgent> = self
                .agents
                .iter()
                .map(|a| {
                    (
                        a.spec.identity(),
                        ResolvedAgent {
                            spec: a.spec.clone(),
                            client: Arc::clone(&a.client),
                        },
                    )
                })
                .collect();
            let edges = ballot::run_voting(
                context_id,
                &eligible,
                &clients,
                self.call_deadline(),
                &self.sink,
            )
            .await;
            self.store.insert_vote_edges(edges).await?;
            self.store.set_phase_done(context_id, Phase::Voting).await?;
            self.sink.emit(ArenaEvent::PhaseCompleted {
                context_id: context_id.to_string(),
                phase: 2,
            });
        }

        // Phase 3: tally and adoption.
        self.sink.emit(ArenaEvent::PhaseStarted {
            context_id: context_id.to_string(),
            phase: 3,
        });
        let edges = self.store.vote_edges(context_id).await?;
        let counts = count_votes(&eligible, &edges);
        let history = self.history_for(&eligible).await?;

        let winner = select_winner(&eligible, &counts, &history)
            .cloned()
            .ok_or_else(|| ArenaError::NoModelAvailable {
                context_id: context_id.to_string(),
                attempted: results.len(),
            })?;
        let winner_count = counts.get(&winner.id).copied().unwrap_or_default();

        // Risk check on the winning decision only.
        let decision = winner
            .decision
            .clone()
            .unwrap_or_default();
        let verdict = self.risk.evaluate(&decision, &context.account);
        let adopted_decision = self.apply_verdict(context_id, decision, &verdict)?;

        let adoption = AdoptionLog {
            id: uuid::Uuid::new_v4().to_string(),
            context_id: context_id.to_string(),
            winner_result_id: winner.id.clone(),
            net_score: winner_count.net(),
            approve_count: winner_count.approvals,
            reject_count: winner_count.rejections,
            score_map: counts
                .iter()
                .map(|(id, c)| (id.clone(), c.net()))
                .collect(),
            risk_status: verdict.status.as_str().to_string(),
            benchmark: BenchmarkRecord::equal_weight(&benchmark_symbols(&context.task, &eligible)),
            created_at: chrono::Utc::now(),
        };
        self.store.insert_adoption_log(adoption.clone()).await?;

        // Lifetime aggregates: vote tallies for everyone, adoption for the
        // winner. Written after the log so a crash here at worst loses
        // score deltas, never the adoption itself.
        for candidate in &eligible {
            let count = counts.get(&candidate.id).copied().unwrap_or_default();
            let adoptions = i64::from(candidate.id == winner.id);
            if count.approvals != 0 || count.rejections != 0 || adoptions != 0 {
                self.store
                    .apply_score_delta(
                        &candidate.backend,
                        &candidate.model,
                        count.approvals,
                        count.rejections,
                        adoptions,
                    )
                    .await?;
            }
        }

        self.store.set_phase_done(context_id, Phase::Tally).await?;
        self.sink.emit(ArenaEvent::DecisionAdopted {
            context_id: context_id.to_string(),
            winner_result_id: winner.id.clone(),
            net_score: adoption.net_score,
        });
        self.sink.emit(ArenaEvent::PhaseCompleted {
            context_id: context_id.to_string(),
            phase: 3,
        });

        self.write_memories(context_id, &winner, &adopted_decision, &edges, &eligible);

        info!(
            context_id,
            winner = %winner.identity(),
            net_score = adoption.net_score,
            risk = %adoption.risk_status,
            "Decision adopted"
        );

        Ok(RunOutcome {
            winner,
            decision: adopted_decision,
            adoption,
        })
    }

    /// Apply the risk verdict to the winning decision per policy.
    fn apply_verdict(
        &self,
        context_id: &str,
        mut decision: crate::recovery::TradeDecision,
        verdict: &RiskVerdict,
    ) -> Result<crate::recovery::TradeDecision> {
        match verdict.status {
            RiskStatus::Approved => {}
            RiskStatus::Modified => {
                if let Some(allocations) = &verdict.modified_allocations {
                    info!(
                        context_id,
                        reasons = verdict.reasons.join("; "),
                        "Risk check modified the winning allocations"
                    );
                    decision.allocations = allocations.clone();
                }
            }
            RiskStatus::Blocked => match self.config.risk.blocked_policy {
                BlockedPolicy::Warn => {
                    warn!(
                        context_id,
                        reasons = verdict.reasons.join("; "),
                        "Risk check blocked the winner; adopting anyway per policy"
                    );
                }
                BlockedPolicy::Enforce => {
                    return Err(ArenaError::RiskBlocked {
                        reasons: verdict.reasons.join("; "),
                    });
                }
            },
        }
        Ok(decision)
    }

    /// Pre-run lifetime scores for every eligible identity.
    async fn history_for(
        &self,
        eligible: &[AgentResult],
    ) -> Result<BTreeMap<String, HistoricalScore>> {
        let mut history = BTreeMap::new();
        for candidate in eligible {
            let identity = candidate.identity();
            if history.contains_key(&identity) {
                continue;
            }
            if let Some(score) = self
                .store
                .historical_score(&candidate.backend, &candidate.model)
                .await?
            {
                history.insert(identity, score);
            }
        }
        Ok(history)
    }

    /// Reconstruct a `RunOutcome` from the recorded adoption.
    async fn replay_outcome(&self, context_id: &str) -> Result<Option<RunOutcome>> {
        let Some(adoption) = self.store.latest_adoption(context_id).await? else {
            return Ok(None);
        };
        let results = self.store.agent_results(context_id).await?;
        let Some(winner) = results
            .into_iter()
            .find(|r| r.id == adoption.winner_result_id)
        else {
            return Ok(None);
        };
        let decision = winner.decision.clone().unwrap_or_default();
        Ok(Some(RunOutcome {
            winner,
            decision,
            adoption,
        }))
    }

    /// Fire-and-forget memory writes; failures are logged, never surfaced.
    ///
    /// Voter result ids are per-run; agent memory is keyed by the stable
    /// backend/model identity so notes accumulate across runs.
    fn write_memories(
        &self,
        context_id: &str,
        winner: &AgentResult,
        decision: &crate::recovery::TradeDecision,
        edges: &[VoteEdge],
        eligible: &[AgentResult],
    ) {
        let memory = Arc::clone(&self.memory);
        let context_id = context_id.to_string();
        let summary = format!(
            "Adopted {} proposal: action={}, confidence={:.2}",
            winner.identity(),
            decision
                .action
                .map(|a| a.as_str().to_string())
                .unwrap_or_else(|| "unspecified".to_string()),
            winner.confidence(),
        );

        let identities: HashMap<&str, String> = eligible
            .iter()
            .map(|r| (r.id.as_str(), r.identity()))
            .collect();

        let mut notes: Vec<(String, String)> = Vec::new();
        for edge in edges {
            if edge.reasoning.is_empty() {
                continue;
            }
            let Some(voter_identity) = identities.get(edge.voter_result_id.as_str()) else {
                continue;
            };
            let target = if edge.target_result_id == winner.id {
                "winning"
            } else {
                "peer"
            };
            notes.push((
                voter_identity.clone(),
                format!(
                    "{} vote on {} plan: {}",
                    edge.vote_type.as_str(),
                    target,
                    edge.reasoning
                ),
            ));
        }

        tokio::spawn(async move {
            if let Err(e) = memory.append_shared(&context_id, &summary).await {
                warn!(context_id = %context_id, error = %e, "Shared memory write failed");
            }
            for (agent, note) in notes {
                if let Err(e) = memory.append_agent(&context_id, &agent, &note).await {
                    warn!(context_id = %context_id, agent = %agent, error = %e, "Agent memory write failed");
                }
            }
        });
    }
}

/// Benchmark universe: the task's eligible symbols. Falls back to the
/// proposal union only when the task names none, so the benchmark stays a
/// yardstick over the whole universe rather than echoing whatever the
/// agents happened to pick.
fn benchmark_symbols(task: &TaskSpec, eligible: &[AgentResult]) -> Vec<String> {
    if !task.eligible_symbols.is_empty() {
        return task.eligible_symbols.clone();
    }
    proposed_symbols(eligible)
}

/// Sorted, deduplicated symbol union across all eligible proposals.
fn proposed_symbols(eligible: &[AgentResult]) -> Vec<String> {
    let set: BTreeSet<String> = eligible
        .iter()
        .filter_map(|r| r.decision.as_ref())
        .flat_map(|d| d.allocations.iter().map(|a| a.symbol.clone()))
        .collect();
    set.into_iter().collect()
}
