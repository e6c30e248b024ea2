//! End-to-end pipeline tests with scripted backends.
//!
//! Every test drives the real three-phase pipeline against a temp-file
//! SQLite store; only the model backends are scripted.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use decision_arena::config::{AgentSpec, ArenaConfig, BackendKind, BlockedPolicy};
use decision_arena::error::ArenaError;
use decision_arena::harness::{AccountState, DecisionContext, Quote, TaskSpec};
use decision_arena::risk::{RiskChecker, RiskVerdict};
use decision_arena::store::{AgentStatus, ArenaStore};
use decision_arena::{AgentClient, Arena, Result, TradeDecision};

/// Scripted backend: dispatches on the system prompt to return an analysis,
/// a decision, or a ballot, and counts every call it receives.
struct ScriptedClient {
    decision_response: String,
    vote_response: String,
    calls: Arc<AtomicUsize>,
    behavior: Behavior,
}

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Normal,
    /// Sleeps past any deadline on every call.
    Hang,
    /// Errors on every call.
    Fail,
}

impl ScriptedClient {
    fn new(decision_response: impl Into<String>, vote_response: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            decision_response: decision_response.into(),
            vote_response: vote_response.into(),
            calls: Arc::new(AtomicUsize::new(0)),
            behavior: Behavior::Normal,
        })
    }

    fn with_behavior(mut self: Arc<Self>, behavior: Behavior) -> Arc<Self> {
        Arc::get_mut(&mut self).unwrap().behavior = behavior;
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AgentClient for ScriptedClient {
    fn call<'a>(
        &'a self,
        system_prompt: &'a str,
        _user_prompt: &'a str,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match self.behavior {
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("deadline should fire first")
                }
                Behavior::Fail => Err(ArenaError::BackendCall("connection reset".into())),
                Behavior::Normal => {
                    if system_prompt.contains("anonymized") {
                        Ok(self.vote_response.clone())
                    } else if system_prompt.contains("Do not make a final decision") {
                        Ok("Momentum looks constructive; valuations are stretched.".to_string())
                    } else {
                        Ok(self.decision_response.clone())
                    }
                }
            }
        })
    }
}

fn decision_json(symbol: &str, confidence: f64) -> String {
    format!(
        "```json\n{{\"action\": \"buy\", \"allocations\": [{{\"symbol\": \"{symbol}\", \"weight\": 0.5}}], \"confidence\": {confidence}, \"reasoning\": \"undervalued\"}}\n```"
    )
}

fn vote_json(approve_1: &str, approve_2: &str) -> String {
    format!(
        "```json\n{{\"approve_1\": \"{approve_1}\", \"approve_2\": \"{approve_2}\", \"reject\": null, \"reasoning\": \"sound plans\"}}\n```"
    )
}

fn roster(n: usize) -> Vec<AgentSpec> {
    (0..n)
        .map(|i| AgentSpec::new(BackendKind::OpenAi, format!("model-{i}")))
        .collect()
}

fn test_config(agents: Vec<AgentSpec>) -> ArenaConfig {
    let mut config = ArenaConfig::default();
    config.agents = agents;
    config.execution.call_timeout_secs = 2;
    config
}

fn test_context(id: &str) -> DecisionContext {
    DecisionContext::new(id)
        .with_task(TaskSpec {
            budget: 10_000.0,
            constraints: vec!["no leverage".into()],
            eligible_symbols: vec!["AAPL".into(), "MSFT".into(), "NVDA".into()],
        })
        .with_account(AccountState {
            cash: 10_000.0,
            total_value: 25_000.0,
            positions: [("AAPL".to_string(), 0.3)].into_iter().collect(),
        })
        .with_quotes(vec![Quote {
            symbol: "AAPL".into(),
            price: 231.5,
            change_pct: -1.2,
        }])
}

fn factory_for(
    clients: Vec<Arc<ScriptedClient>>,
) -> impl Fn(&AgentSpec) -> Result<Arc<dyn AgentClient>> {
    move |spec: &AgentSpec| {
        let index: usize = spec
            .model
            .strip_prefix("model-")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(Arc::clone(&clients[index]) as Arc<dyn AgentClient>)
    }
}

async fn open_store(dir: &TempDir) -> ArenaStore {
    ArenaStore::open(dir.path().join("arena.db")).unwrap()
}

#[tokio::test]
async fn full_run_adopts_most_approved_plan() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let clients = vec![
        ScriptedClient::new(decision_json("AAPL", 0.6), vote_json("Plan_A", "Plan_B")),
        ScriptedClient::new(decision_json("MSFT", 0.7), vote_json("Plan_A", "Plan_B")),
        ScriptedClient::new(decision_json("NVDA", 0.8), vote_json("Plan_A", "Plan_B")),
    ];

    let arena = Arena::new(
        store.clone(),
        test_config(roster(3)),
        &factory_for(clients),
    )
    .unwrap();

    store.insert_context(test_context("ctx-1")).await.unwrap();
    let outcome = arena.run("ctx-1").await.unwrap();

    // With three agents each ballot holds exactly the two others, so
    // approving Plan_A and Plan_B means approving everyone: a three-way
    // tie at net 2 that the confidence tie-break resolves.
    assert_eq!(outcome.adoption.net_score, 2);
    assert_eq!(outcome.adoption.score_map.len(), 3);
    assert_eq!(outcome.winner.model, "model-2");

    // Benchmark covers the task's eligible symbols at equal weight.
    let bench = &outcome.adoption.benchmark;
    assert_eq!(bench.allocations.len(), 3);
    for alloc in &bench.allocations {
        assert!((alloc.weight - 1.0 / 3.0).abs() < 1e-9);
    }

    // Winner's backend gains an adoption in the lifetime scores.
    let score = store
        .historical_score(&outcome.winner.backend, &outcome.winner.model)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(score.adoptions, 1);
}

#[tokio::test]
async fn timeout_is_recorded_and_excluded_from_voting() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let hanging = ScriptedClient::new("", "").with_behavior(Behavior::Hang);
    let clients = vec![
        ScriptedClient::new(decision_json("AAPL", 0.6), vote_json("Plan_A", "Plan_B")),
        Arc::clone(&hanging),
        ScriptedClient::new(decision_json("NVDA", 0.8), vote_json("Plan_A", "Plan_B")),
    ];

    let mut config = test_config(roster(3));
    config.execution.call_timeout_secs = 1;
    let arena = Arena::new(store.clone(), config, &factory_for(clients)).unwrap();

    store.insert_context(test_context("ctx-t")).await.unwrap();
    let outcome = arena.run("ctx-t").await.unwrap();

    let results = store.agent_results("ctx-t").await.unwrap();
    assert_eq!(results.len(), 3);
    let timed_out = results
        .iter()
        .find(|r| r.model == "model-1")
        .expect("timed-out agent still gets a result row");
    assert_eq!(timed_out.status, AgentStatus::Timeout);

    // A timed-out reasoning call is not retried with a direct call.
    assert_eq!(hanging.call_count(), 1);

    // The timed-out agent is neither a candidate nor a voter.
    assert!(!outcome.adoption.score_map.contains_key(&timed_out.id));
    let edges = store.vote_edges("ctx-t").await.unwrap();
    assert!(edges.iter().all(|e| e.voter_result_id != timed_out.id));
    assert!(edges.iter().all(|e| e.target_result_id != timed_out.id));
}

#[tokio::test]
async fn failed_call_falls_back_then_errors() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let failing = ScriptedClient::new("", "").with_behavior(Behavior::Fail);
    let clients = vec![
        ScriptedClient::new(decision_json("AAPL", 0.6), vote_json("Plan_A", "Plan_B")),
        Arc::clone(&failing),
        ScriptedClient::new(decision_json("NVDA", 0.8), vote_json("Plan_A", "Plan_B")),
    ];

    let arena = Arena::new(store.clone(), test_config(roster(3)), &factory_for(clients)).unwrap();
    store.insert_context(test_context("ctx-f")).await.unwrap();
    arena.run("ctx-f").await.unwrap();

    let results = store.agent_results("ctx-f").await.unwrap();
    let failed = results.iter().find(|r| r.model == "model-1").unwrap();
    assert_eq!(failed.status, AgentStatus::Error);

    // One pipeline attempt plus one direct fallback.
    assert_eq!(failing.call_count(), 2);
}

#[tokio::test]
async fn all_agents_failing_reports_no_model_available() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let clients = vec![
        ScriptedClient::new("", "").with_behavior(Behavior::Fail),
        ScriptedClient::new("", "").with_behavior(Behavior::Fail),
    ];

    let arena = Arena::new(store.clone(), test_config(roster(2)), &factory_for(clients)).unwrap();
    store.insert_context(test_context("ctx-x")).await.unwrap();

    let err = arena.run("ctx-x").await.unwrap_err();
    assert!(matches!(
        err,
        ArenaError::NoModelAvailable { attempted: 2, .. }
    ));
}

#[tokio::test]
async fn single_survivor_is_adopted_without_voting() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let survivor = ScriptedClient::new(decision_json("AAPL", 0.9), vote_json("Plan_A", "Plan_B"));
    let clients = vec![
        Arc::clone(&survivor),
        ScriptedClient::new("", "").with_behavior(Behavior::Fail),
    ];

    let arena = Arena::new(store.clone(), test_config(roster(2)), &factory_for(clients)).unwrap();
    store.insert_context(test_context("ctx-s")).await.unwrap();
    let outcome = arena.run("ctx-s").await.unwrap();

    assert_eq!(outcome.winner.model, "model-0");
    assert_eq!(outcome.adoption.net_score, 0);
    assert!(store.vote_edges("ctx-s").await.unwrap().is_empty());

    // The survivor was never asked to vote: two pipeline calls only.
    assert_eq!(survivor.call_count(), 2);
}

#[tokio::test]
async fn abstaining_voter_still_counts_peer_approvals() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    // Agent 2 abstains (no approve_1 in its ballot response).
    let clients = vec![
        ScriptedClient::new(decision_json("AAPL", 0.6), vote_json("Plan_A", "Plan_B")),
        ScriptedClient::new(decision_json("MSFT", 0.7), vote_json("Plan_A", "Plan_B")),
        ScriptedClient::new(
            decision_json("NVDA", 0.8),
            "```json\n{\"reasoning\": \"cannot evaluate\"}\n```",
        ),
    ];

    let arena = Arena::new(store.clone(), test_config(roster(3)), &factory_for(clients)).unwrap();
    store.insert_context(test_context("ctx-a")).await.unwrap();
    let outcome = arena.run("ctx-a").await.unwrap();

    // Two voters cast two approvals each; the abstainer casts none.
    let edges = store.vote_edges("ctx-a").await.unwrap();
    assert_eq!(edges.len(), 4);
    assert!(outcome.adoption.net_score >= 1);
}

#[tokio::test]
async fn benchmark_spans_task_universe_not_proposals() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    // Both agents pile into the same single symbol.
    let clients = vec![
        ScriptedClient::new(decision_json("AAPL", 0.6), vote_json("Plan_A", "Plan_B")),
        ScriptedClient::new(decision_json("AAPL", 0.7), vote_json("Plan_A", "Plan_B")),
    ];

    let arena = Arena::new(store.clone(), test_config(roster(2)), &factory_for(clients)).unwrap();
    store.insert_context(test_context("ctx-b")).await.unwrap();
    let outcome = arena.run("ctx-b").await.unwrap();

    // The benchmark still spans all three eligible symbols from the task,
    // not the degenerate one-symbol proposal union.
    let symbols: Vec<&str> = outcome
        .adoption
        .benchmark
        .allocations
        .iter()
        .map(|a| a.symbol.as_str())
        .collect();
    assert_eq!(symbols, vec!["AAPL", "MSFT", "NVDA"]);
    for alloc in &outcome.adoption.benchmark.allocations {
        assert!((alloc.weight - 1.0 / 3.0).abs() < 1e-9);
    }
}

/// Captures per-agent memory writes for assertion.
struct RecordingMemory {
    agent_tx: tokio::sync::mpsc::UnboundedSender<(String, String)>,
}

#[async_trait::async_trait]
impl decision_arena::MemoryWriter for RecordingMemory {
    async fn append_shared(&self, _context_id: &str, _summary: &str) -> Result<()> {
        Ok(())
    }

    async fn append_agent(&self, _context_id: &str, agent_identity: &str, note: &str) -> Result<()> {
        let _ = self
            .agent_tx
            .send((agent_identity.to_string(), note.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn agent_memory_is_keyed_by_stable_identity() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let clients = vec![
        ScriptedClient::new(decision_json("AAPL", 0.6), vote_json("Plan_A", "Plan_B")),
        ScriptedClient::new(decision_json("MSFT", 0.7), vote_json("Plan_A", "Plan_B")),
    ];

    let (agent_tx, mut agent_rx) = tokio::sync::mpsc::unbounded_channel();
    let arena = Arena::new(store.clone(), test_config(roster(2)), &factory_for(clients))
        .unwrap()
        .with_memory_writer(Arc::new(RecordingMemory { agent_tx }));

    store.insert_context(test_context("ctx-m")).await.unwrap();
    arena.run("ctx-m").await.unwrap();

    // Two voters, one reasoned vote each. Notes arrive keyed by
    // backend/model, never by the per-run result id.
    let mut identities = Vec::new();
    for _ in 0..2 {
        let (identity, note) = tokio::time::timeout(Duration::from_secs(2), agent_rx.recv())
            .await
            .expect("memory write should arrive")
            .expect("channel open");
        assert!(note.contains("sound plans"));
        identities.push(identity);
    }
    identities.sort();
    assert_eq!(identities, vec!["openai/model-0", "openai/model-1"]);
}

struct BlockEverything;

impl RiskChecker for BlockEverything {
    fn evaluate(&self, _decision: &TradeDecision, _account: &AccountState) -> RiskVerdict {
        RiskVerdict::blocked("budget frozen")
    }
}

#[tokio::test]
async fn blocked_verdict_is_logged_under_warn_policy() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let clients = vec![
        ScriptedClient::new(decision_json("AAPL", 0.6), vote_json("Plan_A", "Plan_B")),
        ScriptedClient::new(decision_json("MSFT", 0.7), vote_json("Plan_A", "Plan_B")),
    ];

    let arena = Arena::new(store.clone(), test_config(roster(2)), &factory_for(clients))
        .unwrap()
        .with_risk_checker(Arc::new(BlockEverything));

    store.insert_context(test_context("ctx-w")).await.unwrap();
    let outcome = arena.run("ctx-w").await.unwrap();
    assert_eq!(outcome.adoption.risk_status, "blocked");
}

#[tokio::test]
async fn blocked_verdict_fails_run_under_enforce_policy() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let clients = vec![
        ScriptedClient::new(decision_json("AAPL", 0.6), vote_json("Plan_A", "Plan_B")),
        ScriptedClient::new(decision_json("MSFT", 0.7), vote_json("Plan_A", "Plan_B")),
    ];

    let mut config = test_config(roster(2));
    config.risk.blocked_policy = BlockedPolicy::Enforce;

    let arena = Arena::new(store.clone(), config, &factory_for(clients))
        .unwrap()
        .with_risk_checker(Arc::new(BlockEverything));

    store.insert_context(test_context("ctx-e")).await.unwrap();
    let err = arena.run("ctx-e").await.unwrap_err();
    assert!(matches!(err, ArenaError::RiskBlocked { .. }));

    // Nothing adopted, no score deltas.
    assert!(store.latest_adoption("ctx-e").await.unwrap().is_none());
    assert!(store.all_historical_scores().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_context_is_an_error() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let clients = vec![ScriptedClient::new(decision_json("AAPL", 0.6), "")];
    let arena = Arena::new(store, test_config(roster(1)), &factory_for(clients)).unwrap();

    let err = arena.run("nope").await.unwrap_err();
    assert!(matches!(err, ArenaError::ContextNotFound(_)));
}

#[tokio::test]
async fn raw_responses_produce_partial_or_raw_results() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    // Plain prose without JSON: success at RawOnly quality, no decision,
    // so it cannot enter the vote.
    let clients = vec![
        ScriptedClient::new("I would buy something, probably.", ""),
        ScriptedClient::new(decision_json("MSFT", 0.7), vote_json("Plan_A", "Plan_B")),
    ];

    let arena = Arena::new(store.clone(), test_config(roster(2)), &factory_for(clients)).unwrap();
    store.insert_context(test_context("ctx-r")).await.unwrap();
    let outcome = arena.run("ctx-r").await.unwrap();

    assert_eq!(outcome.winner.model, "model-1");
    let results = store.agent_results("ctx-r").await.unwrap();
    let raw = results.iter().find(|r| r.model == "model-0").unwrap();
    assert_eq!(raw.status, AgentStatus::Success);
    assert!(raw.decision.is_none());
}
