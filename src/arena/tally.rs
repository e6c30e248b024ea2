//! Phase 3: deterministic tally and winner selection.

use std::collections::BTreeMap;

use crate::store::{AgentResult, HistoricalScore, VoteEdge, VoteType};

/// Per-candidate vote counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteCount {
    pub approvals: i64,
    pub rejections: i64,
}

impl VoteCount {
    pub fn net(&self) -> i64 {
        self.approvals - self.rejections
    }
}

/// Count approvals and rejections per target from the edge list.
///
/// Every eligible candidate gets an entry even with zero edges, so a
/// fully-abstained round still tallies everyone at net zero.
pub fn count_votes(candidates: &[AgentResult], edges: &[VoteEdge]) -> BTreeMap<String, VoteCount> {
    let mut counts: BTreeMap<String, VoteCount> = candidates
        .iter()
        .map(|r| (r.id.clone(), VoteCount::default()))
        .collect();

    for edge in edges {
        let Some(count) = counts.get_mut(&edge.target_result_id) else {
            continue;
        };
        match edge.vote_type {
            VoteType::Approve => count.approvals += 1,
            VoteType::Reject => count.rejections += 1,
        }
    }
    counts
}

/// Pick the winner by net score, breaking ties on historical net score,
/// then stated confidence, then earliest submission, then result id.
///
/// The full chain is a total order over distinct results, so the winner
/// is deterministic for any input.
pub fn select_winner<'a>(
    candidates: &'a [AgentResult],
    counts: &BTreeMap<String, VoteCount>,
    history: &BTreeMap<String, HistoricalScore>,
) -> Option<&'a AgentResult> {
    candidates.iter().max_by(|a, b| {
        let net_a = counts.get(&a.id).map(VoteCount::net).unwrap_or(0);
        let net_b = counts.get(&b.id).map(VoteCount::net).unwrap_or(0);
        let hist_a = history.get(&a.identity()).map(HistoricalScore::net).unwrap_or(0);
        let hist_b = history.get(&b.identity()).map(HistoricalScore::net).unwrap_or(0);

        net_a
            .cmp(&net_b)
            .then(hist_a.cmp(&hist_b))
            .then(a.confidence().total_cmp(&b.confidence()))
            // Later keys prefer the smaller value, so compare reversed.
            .then(b.created_at.cmp(&a.created_at))
            .then(b.id.cmp(&a.id))
    })
}
