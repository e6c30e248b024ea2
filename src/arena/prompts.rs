//! Prompt construction for the fan-out and voting phases.
//!
//! Every agent in one run sees the same rendered context; only the ballot
//! differs per voter (it excludes the voter's own proposal).

use crate::harness::DecisionContext;

pub(super) const DECISION_SYSTEM_PROMPT: &str = r#"You are an investment analyst deciding how to deploy a fixed budget.

Respond with a single JSON object inside a ```json fence:
{
  "action": "buy" | "sell" | "hold",
  "allocations": [{"symbol": "...", "weight": 0.0-1.0}],
  "confidence": 0.0-1.0,
  "reasoning": "one short paragraph"
}

Only allocate to eligible symbols. Weights are fractions of the budget."#;

pub(super) const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an investment analyst. Study the snapshot and write a concise
assessment of valuation, momentum and risk for the eligible symbols.
Do not make a final decision yet."#;

pub(super) const VOTE_SYSTEM_PROMPT: &str = r#"You are reviewing anonymized investment plans from other analysts.
You must approve exactly two plans and may reject at most one.

Respond with a single JSON object inside a ```json fence:
{
  "approve_1": "Plan_X",
  "approve_2": "Plan_Y",
  "reject": "Plan_Z" | null,
  "reasoning": "one short paragraph"
}

If you cannot evaluate the plans, omit approve_1 to abstain."#;

/// Step 1 of the reasoning pipeline: free-form analysis.
pub(super) fn build_analysis_prompt(context: &DecisionContext) -> String {
    format!(
        "{}\n\nWhat is your assessment of the current situation?",
        context.render()
    )
}

/// Step 2 of the reasoning pipeline: decision informed by the analysis.
pub(super) fn build_decision_prompt(context: &DecisionContext, analysis: Option<&str>) -> String {
    match analysis {
        Some(analysis) => format!(
            "{}\n\n## Your prior analysis\n{}\n\nNow produce your final decision.",
            context.render(),
            analysis
        ),
        None => format!("{}\n\nProduce your decision.", context.render()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_prompt_embeds_analysis() {
        let ctx = DecisionContext::new("ctx");
        let prompt = build_decision_prompt(&ctx, Some("rates are falling"));
        assert!(prompt.contains("rates are falling"));
        assert!(prompt.contains("final decision"));
    }

    #[test]
    fn test_direct_prompt_has_no_analysis_section() {
        let ctx = DecisionContext::new("ctx");
        let prompt = build_decision_prompt(&ctx, None);
        assert!(!prompt.contains("prior analysis"));
    }
}
