//! Phase 2: anonymized peer-review voting.
//!
//! For each successful voter, every *other* successful proposal is shown
//! under an opaque `Plan_X` label. Labels are assigned in snapshot order
//! with the voter excluded, so the rendered ballot and the label map are
//! always built from the same iteration and never mention the voter's own
//! proposal.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use super::events::{ArenaEvent, EventSink};
use super::prompts::VOTE_SYSTEM_PROMPT;
use super::ResolvedAgent;
use crate::store::{AgentResult, VoteEdge, VoteType};

/// Maximum approvals one voter may cast per run.
const MAX_APPROVALS: usize = 2;

/// An anonymized ballot for one voter.
#[derive(Debug, Clone)]
pub(super) struct Ballot {
    pub voter_result_id: String,
    /// Opaque label -> target agent result id, in label order.
    pub plan_map: Vec<(String, String)>,
    pub text: String,
}

impl Ballot {
    pub fn label_map(&self) -> HashMap<&str, &str> {
        self.plan_map
            .iter()
            .map(|(label, id)| (label.as_str(), id.as_str()))
            .collect()
    }
}

/// `Plan_A`, `Plan_B`, ... `Plan_Z`, `Plan_AA`, ...
fn plan_label(index: usize) -> String {
    let mut n = index;
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.reverse();
    format!("Plan_{}", String::from_utf8(letters).expect("ascii label"))
}

/// Build the ballot for one voter from the Phase 1 snapshot.
///
/// The snapshot must already be in stable order; the same order produces
/// the same labels for every voter modulo the voter's own exclusion.
pub(super) fn build_ballot(voter: &AgentResult, snapshot: &[AgentResult]) -> Ballot {
    let mut plan_map = Vec::new();
    let mut sections = Vec::new();

    for candidate in snapshot.iter().filter(|r| r.id != voter.id) {
        let label = plan_label(plan_map.len());
        let decision = candidate.decision.as_ref();

        let action = decision
            .and_then(|d| d.action)
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| "unspecified".to_string());
        let confidence = decision
            .and_then(|d| d.confidence)
            .map(|c| format!("{:.2}", c))
            .unwrap_or_else(|| "n/a".to_string());
        let allocations = decision
            .map(|d| {
                d.allocations
                    .iter()
                    .map(|a| format!("{} {:.0}%", a.symbol, a.weight * 100.0))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "(none)".to_string());
        let reasoning = decision
            .and_then(|d| d.reasoning.clone())
            .unwrap_or_else(|| "(no reasoning given)".to_string());

        sections.push(format!(
            "### {label}\nAction: {action}\nConfidence: {confidence}\nAllocations: {allocations}\nReasoning: {reasoning}"
        ));
        plan_map.push((label, candidate.id.clone()));
    }

    Ballot {
        voter_result_id: voter.id.clone(),
        plan_map,
        text: format!(
            "Competing plans for review:\n\n{}\n\nApprove exactly two plans; reject at most one.",
            sections.join("\n\n")
        ),
    }
}

/// A parsed ballot response before label translation.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct BallotResponse {
    pub approvals: Vec<String>,
    pub rejection: Option<String>,
    pub reasoning: String,
}

impl BallotResponse {
    pub fn is_abstention(&self) -> bool {
        self.approvals.is_empty()
    }
}

/// Parse a voter's raw response: fenced JSON, then direct JSON, then regex.
///
/// A response without a first approval is a total abstention, not an error.
pub(super) fn parse_ballot_response(text: &str) -> BallotResponse {
    if let Some(parsed) = parse_ballot_json(text) {
        return parsed;
    }
    parse_ballot_regex(text)
}

fn parse_ballot_json(text: &str) -> Option<BallotResponse> {
    let trimmed = text.trim();
    let candidates = [fenced_json(trimmed), Some(trimmed.to_string())];

    for candidate in candidates.into_iter().flatten() {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };

        // No approve_1 field at all: explicit abstention.
        let first = map.get("approve_1").and_then(Value::as_str);
        let Some(first) = first else {
            return Some(BallotResponse::default());
        };

        let mut approvals = vec![first.trim().to_string()];
        if let Some(second) = map.get("approve_2").and_then(Value::as_str) {
            if !second.trim().is_empty() {
                approvals.push(second.trim().to_string());
            }
        }
        let rejection = map
            .get("reject")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s != "null");
        let reasoning = map
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        return Some(BallotResponse {
            approvals,
            rejection,
            reasoning,
        });
    }
    None
}

fn fenced_json(text: &str) -> Option<String> {
    let start = text.find("```json")?;
    let body_start = start + "```json".len();
    let end = text[body_start..].find("```")?;
    Some(text[body_start..body_start + end].trim().to_string())
}

fn parse_ballot_regex(text: &str) -> BallotResponse {
    use regex::Regex;

    let field = |name: &str| -> Option<String> {
        let re = Regex::new(&format!(r#"(?i){}["'\s:：]*["']?(Plan_[A-Z]+)"#, name))
            .expect("ballot field regex");
        re.captures(text).map(|c| c[1].to_string())
    };

    let Some(first) = field("approve_1") else {
        return BallotResponse::default();
    };

    let mut approvals = vec![first];
    if let Some(second) = field("approve_2") {
        approvals.push(second);
    }

    BallotResponse {
        approvals,
        rejection: field("reject"),
        reasoning: String::new(),
    }
}

/// Translate parsed labels into vote edges against real result ids.
///
/// Unknown labels and self-references are dropped; approvals are capped at
/// two and rejections at one.
pub(super) fn edges_from_response(
    context_id: &str,
    ballot: &Ballot,
    response: &BallotResponse,
) -> Vec<VoteEdge> {
    let map = ballot.label_map();
    let mut edges = Vec::new();

    for label in response.approvals.iter().take(MAX_APPROVALS) {
        let Some(&target) = map.get(label.as_str()) else {
            debug!(label = %label, "Approval names unknown plan label, dropping");
            continue;
        };
        if target == ballot.voter_result_id {
            continue;
        }
        edges.push(VoteEdge::new(
            context_id,
            &ballot.voter_result_id,
            target,
            VoteType::Approve,
            &response.reasoning,
        ));
    }

    if let Some(label) = &response.rejection {
        if let Some(&target) = map.get(label.as_str()) {
            if target != ballot.voter_result_id {
                edges.push(VoteEdge::new(
                    context_id,
                    &ballot.voter_result_id,
                    target,
                    VoteType::Reject,
                    &response.reasoning,
                ));
            }
        } else {
            debug!(label = %label, "Rejection names unknown plan label, dropping");
        }
    }

    edges
}

/// Collect one voter's edges; any failure is an abstention, never a
/// pipeline error.
async fn collect_votes_from(
    context_id: &str,
    voter: &AgentResult,
    agent: &ResolvedAgent,
    snapshot: &[AgentResult],
    deadline: Duration,
    sink: &EventSink,
) -> Vec<VoteEdge> {
    let ballot = build_ballot(voter, snapshot);

    let response = match tokio::time::timeout(
        deadline,
        agent.client.call(VOTE_SYSTEM_PROMPT, &ballot.text, deadline),
    )
    .await
    {
        Ok(Ok(text)) => parse_ballot_response(&text),
        Ok(Err(e)) => {
            warn!(voter = %voter.identity(), error = %e, "Voter call failed, counting as abstention");
            BallotResponse::default()
        }
        Err(_) => {
            warn!(voter = %voter.identity(), "Voter timed out, counting as abstention");
            BallotResponse::default()
        }
    };

    let edges = edges_from_response(context_id, &ballot, &response);
    sink.emit(ArenaEvent::VoteRecorded {
        context_id: context_id.to_string(),
        voter: voter.identity(),
        approvals: edges
            .iter()
            .filter(|e| e.vote_type == VoteType::Approve)
            .count(),
        rejections: edges
            .iter()
            .filter(|e| e.vote_type == VoteType::Reject)
            .count(),
    });
    edges
}

/// Run the vote concurrently across all voters against one fixed snapshot.
pub(super) async fn run_voting(
    context_id: &str,
    snapshot: &[AgentResult],
    agents: &HashMap<String, ResolvedAgent>,
    deadline: Duration,
    sink: &EventSink,
) -> Vec<VoteEdge> {
    let futures = snapshot.iter().filter_map(|voter| {
        let Some(agent) = agents.get(&voter.identity()) else {
            warn!(voter = %voter.identity(), "No client for voter, skipping its ballot");
            return None;
        };
        Some(collect_votes_from(
            context_id, voter, agent, snapshot, deadline, sink,
        ))
    });

    join_all(futures).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{Allocation, TradeAction, TradeDecision};
    use crate::store::AgentStatus;

    fn success_result(id: &str, model: &str, action: TradeAction) -> AgentResult {
        let mut result = AgentResult::new("ctx", "openai", model);
        result.id = id.to_string();
        result.status = AgentStatus::Success;
        result.decision = Some(TradeDecision {
            action: Some(action),
            allocations: vec![Allocation {
                symbol: "AAPL".into(),
                weight: 0.5,
            }],
            confidence: Some(0.8),
            reasoning: Some("looks cheap".into()),
        });
        result
    }

    fn snapshot() -> Vec<AgentResult> {
        vec![
            success_result("r1", "m1", TradeAction::Buy),
            success_result("r2", "m2", TradeAction::Sell),
            success_result("r3", "m3", TradeAction::Hold),
        ]
    }

    #[test]
    fn test_plan_label_sequence() {
        assert_eq!(plan_label(0), "Plan_A");
        assert_eq!(plan_label(25), "Plan_Z");
        assert_eq!(plan_label(26), "Plan_AA");
        assert_eq!(plan_label(27), "Plan_AB");
    }

    #[test]
    fn test_ballot_excludes_voter() {
        let snap = snapshot();
        for voter in &snap {
            let ballot = build_ballot(voter, &snap);
            assert_eq!(ballot.plan_map.len(), snap.len() - 1);
            assert!(ballot.plan_map.iter().all(|(_, id)| id != &voter.id));
            assert!(!ballot.text.contains(&voter.id));
        }
    }

    #[test]
    fn test_ballot_label_map_round_trip() {
        let snap = snapshot();
        let ballot = build_ballot(&snap[1], &snap);
        // Labels enumerate the others in snapshot order.
        assert_eq!(ballot.plan_map[0], ("Plan_A".to_string(), "r1".to_string()));
        assert_eq!(ballot.plan_map[1], ("Plan_B".to_string(), "r3".to_string()));
        // Every label in the rendered ballot resolves to a real other id.
        for (label, id) in &ballot.plan_map {
            assert!(ballot.text.contains(label));
            assert!(snap.iter().any(|r| &r.id == id && r.id != snap[1].id));
        }
    }

    #[test]
    fn test_ballot_never_leaks_identity() {
        let snap = snapshot();
        let ballot = build_ballot(&snap[0], &snap);
        assert!(!ballot.text.contains("openai"));
        assert!(!ballot.text.contains("m2"));
    }

    #[test]
    fn test_parse_fenced_ballot() {
        let text = "Considering the plans.\n```json\n{\"approve_1\": \"Plan_A\", \"approve_2\": \"Plan_B\", \"reject\": null, \"reasoning\": \"solid\"}\n```";
        let parsed = parse_ballot_response(text);
        assert_eq!(parsed.approvals, vec!["Plan_A", "Plan_B"]);
        assert!(parsed.rejection.is_none());
        assert_eq!(parsed.reasoning, "solid");
    }

    #[test]
    fn test_parse_direct_json_with_reject() {
        let parsed = parse_ballot_response(
            r#"{"approve_1": "Plan_B", "approve_2": "Plan_A", "reject": "Plan_C", "reasoning": "c is reckless"}"#,
        );
        assert_eq!(parsed.approvals.len(), 2);
        assert_eq!(parsed.rejection.as_deref(), Some("Plan_C"));
    }

    #[test]
    fn test_missing_first_approval_is_abstention() {
        let parsed = parse_ballot_response(r#"{"reject": "Plan_A", "reasoning": "cannot judge"}"#);
        assert!(parsed.is_abstention());

        let parsed = parse_ballot_response("I refuse to vote on these plans.");
        assert!(parsed.is_abstention());
    }

    #[test]
    fn test_regex_fallback() {
        let parsed =
            parse_ballot_response("approve_1: Plan_B, approve_2: Plan_A and reject: Plan_C");
        assert_eq!(parsed.approvals, vec!["Plan_B", "Plan_A"]);
        assert_eq!(parsed.rejection.as_deref(), Some("Plan_C"));
    }

    #[test]
    fn test_abstention_yields_no_edges() {
        let snap = snapshot();
        let ballot = build_ballot(&snap[0], &snap);
        let edges = edges_from_response("ctx", &ballot, &BallotResponse::default());
        assert!(edges.is_empty());
    }

    #[test]
    fn test_edges_translate_labels() {
        let snap = snapshot();
        let ballot = build_ballot(&snap[0], &snap);
        let response = BallotResponse {
            approvals: vec!["Plan_A".into(), "Plan_B".into()],
            rejection: None,
            reasoning: "both fine".into(),
        };
        let edges = edges_from_response("ctx", &ballot, &response);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].voter_result_id, "r1");
        assert_eq!(edges[0].target_result_id, "r2");
        assert_eq!(edges[1].target_result_id, "r3");
    }

    #[test]
    fn test_unknown_label_dropped_and_approvals_capped() {
        let snap = snapshot();
        let ballot = build_ballot(&snap[0], &snap);
        let response = BallotResponse {
            approvals: vec!["Plan_A".into(), "Plan_Q".into(), "Plan_B".into()],
            rejection: Some("Plan_Z".into()),
            reasoning: String::new(),
        };
        let edges = edges_from_response("ctx", &ballot, &response);
        // Plan_Q unknown, Plan_B beyond the cap of two, Plan_Z unknown.
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_result_id, "r2");
    }
}
