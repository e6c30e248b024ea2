//! Structured-output recovery.
//!
//! Turns free-form agent text into a typed [`TradeDecision`] through an
//! ordered fallback chain, cheapest assumption first:
//!
//! 1. fenced `json` code block
//! 2. largest balanced-brace object in the full text
//! 3. direct parse of the trimmed text
//! 4. boilerplate-prefix strip, then direct parse
//! 5. independent regex extraction of single fields
//!
//! The first tier that yields any object short-circuits the rest. A
//! localization pass canonicalizes alternate-language keys and action values
//! before validation. Everything here is pure and synchronous.

mod localize;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use localize::{localize_value, normalize_action};

/// Canonical decision action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }
}

/// One proposed position: symbol plus target weight of the budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub symbol: String,
    pub weight: f64,
}

/// The typed decision object recovered from agent output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeDecision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<TradeAction>,
    #[serde(default)]
    pub allocations: Vec<Allocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl TradeDecision {
    pub fn is_empty(&self) -> bool {
        self.action.is_none()
            && self.allocations.is_empty()
            && self.confidence.is_none()
            && self.reasoning.is_none()
    }
}

/// How much structure was recoverable from the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseQuality {
    /// A whole object parsed (tiers 1-4).
    Structured,
    /// Individual fields regex-assembled (tier 5).
    Partial,
    /// Nothing recoverable.
    RawOnly,
}

impl ParseQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Partial => "partial",
            Self::RawOnly => "raw_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "structured" => Some(Self::Structured),
            "partial" => Some(Self::Partial),
            "raw_only" => Some(Self::RawOnly),
            _ => None,
        }
    }
}

/// Recovery outcome: the decision (if any) plus how it was obtained.
#[derive(Debug, Clone)]
pub struct RecoveredDecision {
    pub decision: Option<TradeDecision>,
    pub quality: ParseQuality,
}

/// Recover a typed decision from free-form agent text.
pub fn recover(text: &str) -> RecoveredDecision {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return RecoveredDecision {
            decision: None,
            quality: ParseQuality::RawOnly,
        };
    }

    // Tiers 1-4: the first tier yielding any JSON object ends the chain,
    // even when the object carries no recognized fields. The regex tier is
    // for unstructured text only; running it over a valid object's string
    // values would invent fields the agent never set.
    for candidate in [
        extract_fenced_block(trimmed),
        extract_balanced_object(trimmed),
        Some(trimmed.to_string()),
        Some(strip_boilerplate(trimmed).to_string()),
    ]
    .into_iter()
    .flatten()
    {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate) {
            let decision = decision_from_value(Value::Object(map));
            let decision = (!decision.is_empty()).then_some(decision);
            return RecoveredDecision {
                decision,
                quality: ParseQuality::Structured,
            };
        }
    }

    // Tier 5: per-field regex extraction.
    let decision = extract_fields(trimmed);
    if decision.is_empty() {
        RecoveredDecision {
            decision: None,
            quality: ParseQuality::RawOnly,
        }
    } else {
        RecoveredDecision {
            decision: Some(decision),
            quality: ParseQuality::Partial,
        }
    }
}

/// Tier 1: content of the first fenced block labeled as structured data.
fn extract_fenced_block(text: &str) -> Option<String> {
    for label in ["```json", "```JSON"] {
        if let Some(start) = text.find(label) {
            let body_start = start + label.len();
            if let Some(end) = text[body_start..].find("```") {
                return Some(text[body_start..body_start + end].trim().to_string());
            }
        }
    }
    None
}

/// Tier 2: the largest balanced-brace object anywhere in the text.
///
/// Tracks string and escape state so braces inside quoted values do not
/// break the balancing.
fn extract_balanced_object(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => stack.push(i),
            b'}' if !in_string => {
                if let Some(start) = stack.pop() {
                    let len = i + 1 - start;
                    if best.map_or(true, |(_, best_len)| len > best_len) {
                        best = Some((start, len));
                    }
                }
            }
            _ => {}
        }
    }

    best.map(|(start, len)| text[start..start + len].to_string())
}

/// Tier 4: drop leading boilerplate a model tends to prepend.
fn strip_boilerplate(text: &str) -> &str {
    const PREFIXES: &[&str] = &[
        "Here is my decision:",
        "Here's my decision:",
        "My decision:",
        "Final decision:",
        "Output:",
        "json",
        "JSON:",
    ];
    let mut out = text.trim();
    let mut changed = true;
    while changed {
        changed = false;
        for prefix in PREFIXES {
            if let Some(rest) = out.strip_prefix(prefix) {
                out = rest.trim_start();
                changed = true;
            }
        }
    }
    out
}

/// Turn a parsed JSON object into a decision, localizing keys and values.
fn decision_from_value(value: Value) -> TradeDecision {
    let value = localize_value(value);
    let mut decision = TradeDecision::default();
    let Value::Object(map) = value else {
        return decision;
    };

    if let Some(action) = map.get("action").and_then(Value::as_str) {
        decision.action = normalize_action(action);
    }
    if let Some(confidence) = map.get("confidence") {
        decision.confidence = confidence_from_value(confidence);
    }
    if let Some(reasoning) = map.get("reasoning").and_then(Value::as_str) {
        if !reasoning.trim().is_empty() {
            decision.reasoning = Some(reasoning.trim().to_string());
        }
    }
    if let Some(Value::Array(items)) = map.get("allocations") {
        for item in items {
            if let Some(alloc) = allocation_from_value(item) {
                decision.allocations.push(alloc);
            }
        }
    }

    decision
}

fn allocation_from_value(value: &Value) -> Option<Allocation> {
    let obj = value.as_object()?;
    let symbol = obj.get("symbol")?.as_str()?.trim().to_string();
    if symbol.is_empty() {
        return None;
    }
    let weight = match obj.get("weight")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_weight(s)?,
        _ => return None,
    };
    Some(Allocation {
        symbol,
        weight: normalize_weight(weight),
    })
}

fn confidence_from_value(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_weight(s.trim())?,
        _ => return None,
    };
    Some(normalize_weight(raw))
}

/// Accept "0.8", "80%", "80".
fn parse_weight(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix('%') {
        return stripped.trim().parse::<f64>().ok().map(|v| v / 100.0);
    }
    s.parse::<f64>().ok()
}

/// Map percent-style values into the 0..=1 range.
fn normalize_weight(v: f64) -> f64 {
    let v = if v > 1.0 { v / 100.0 } else { v };
    v.clamp(0.0, 1.0)
}

/// Tier 5: independent regex extraction, accepting a partial object.
fn extract_fields(text: &str) -> TradeDecision {
    use regex::Regex;

    let mut decision = TradeDecision::default();

    // Action keyword, english or localized.
    let action_re =
        Regex::new(r#"(?i)(?:action|操作|动作)["'\s:：]*["']?(买入|卖出|持有|观望|[a-zA-Z]+)"#)
            .expect("action regex");
    if let Some(caps) = action_re.captures(text) {
        decision.action = normalize_action(&caps[1]);
    }

    let confidence_re =
        Regex::new(r#"(?i)(?:confidence|置信度|信心)["'\s:：]*([0-9]*\.?[0-9]+)\s*(%?)"#)
            .expect("confidence regex");
    if let Some(caps) = confidence_re.captures(text) {
        if let Ok(mut v) = caps[1].parse::<f64>() {
            if &caps[2] == "%" {
                v /= 100.0;
            }
            decision.confidence = Some(normalize_weight(v));
        }
    }

    // Allocation pairs like "AAPL: 40%" on allocation-ish lines only.
    let alloc_re = Regex::new(r"([A-Z][A-Z0-9.]{0,9})\s*[:：]\s*([0-9]*\.?[0-9]+)\s*(%?)")
        .expect("allocation regex");
    for line in text.lines() {
        let lower = line.to_lowercase();
        if !(lower.contains("alloc") || lower.contains("仓位") || lower.contains("配置")) {
            continue;
        }
        for caps in alloc_re.captures_iter(line) {
            if let Ok(mut weight) = caps[2].parse::<f64>() {
                if &caps[3] == "%" {
                    weight /= 100.0;
                }
                decision.allocations.push(Allocation {
                    symbol: caps[1].to_string(),
                    weight: normalize_weight(weight),
                });
            }
        }
    }

    let reasoning_re =
        Regex::new(r#"(?i)(?:reasoning|reason|理由|原因)["'\s:：]*(.+)"#).expect("reasoning regex");
    if let Some(caps) = reasoning_re.captures(text) {
        let reason = caps[1].trim().trim_matches(['"', ',']).trim();
        if !reason.is_empty() {
            decision.reasoning = Some(reason.to_string());
        }
    }

    decision
}
