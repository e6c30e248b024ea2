use console::{style, Style};

use crate::store::{AdoptionLog, AgentResult, AgentStatus, HistoricalScore, VoteEdge};

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
        println!();
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("error:").bold().red(), message);
    }

    pub fn print_leaderboard(&self, scores: &[HistoricalScore]) {
        self.print_header("Leaderboard");
        if scores.is_empty() {
            println!("No scored agents yet.");
            return;
        }
        println!(
            "{:<32} {:>8} {:>8} {:>8} {:>10}",
            style("Agent").bold(),
            style("Net").bold(),
            style("Approve").bold(),
            style("Reject").bold(),
            style("Adopted").bold()
        );
        for score in scores {
            println!(
                "{:<32} {:>8} {:>8} {:>8} {:>10}",
                format!("{}/{}", score.backend, score.model),
                score.net(),
                score.approvals,
                score.rejections,
                score.adoptions
            );
        }
        println!();
    }

    pub fn print_result_summary(&self, result: &AgentResult) {
        let status_style = self.status_style(result.status);
        println!(
            "{}  {}",
            style(result.identity()).bold(),
            status_style.apply_to(result.status.as_str())
        );
        println!(
            "    Quality: {}  Latency: {}ms  Confidence: {:.2}",
            result.parse_quality.as_str(),
            result.latency_ms,
            result.confidence()
        );
        if let Some(decision) = &result.decision {
            if let Some(action) = decision.action {
                println!("    Action: {}", style(action.as_str()).white());
            }
            for alloc in &decision.allocations {
                println!("    {} {:.0}%", alloc.symbol, alloc.weight * 100.0);
            }
        }
        println!();
    }

    pub fn print_vote(&self, edge: &VoteEdge) {
        let vote_style = match edge.vote_type {
            crate::store::VoteType::Approve => Style::new().green(),
            crate::store::VoteType::Reject => Style::new().red(),
        };
        println!(
            "{}  {} -> {}",
            vote_style.apply_to(edge.vote_type.as_str()),
            &edge.voter_result_id[..8.min(edge.voter_result_id.len())],
            &edge.target_result_id[..8.min(edge.target_result_id.len())]
        );
        if !edge.reasoning.is_empty() {
            println!("    {}", style(&edge.reasoning).dim());
        }
    }

    pub fn print_adoption(&self, log: &AdoptionLog) {
        self.print_header(&format!("Adoption: {}", log.context_id));
        println!("Winner:     {}", style(&log.winner_result_id).bold());
        println!(
            "Net score:  {} ({} approve / {} reject)",
            log.net_score, log.approve_count, log.reject_count
        );
        println!("Risk:       {}", log.risk_status);
        println!("Recorded:   {}", log.created_at.to_rfc3339());

        if !log.score_map.is_empty() {
            println!();
            println!("{}", style("Scores:").bold());
            for (result_id, net) in &log.score_map {
                let marker = if result_id == &log.winner_result_id {
                    style("*").green().to_string()
                } else {
                    " ".to_string()
                };
                println!("  {marker} {:<38} {net:>4}", result_id);
            }
        }

        if !log.benchmark.allocations.is_empty() {
            println!();
            println!("{}", style("Equal-weight benchmark:").bold());
            for alloc in &log.benchmark.allocations {
                println!("  {} {:.1}%", alloc.symbol, alloc.weight * 100.0);
            }
        }
        println!();
    }

    fn status_style(&self, status: AgentStatus) -> Style {
        match status {
            AgentStatus::Success => Style::new().green(),
            AgentStatus::Timeout => Style::new().yellow(),
            AgentStatus::Error => Style::new().red(),
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}
