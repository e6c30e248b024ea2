//! Key and value localization for recovered decision objects.
//!
//! Agents answering in another language produce the same object shape with
//! translated field names and enumerated values; this pass rewrites them to
//! the canonical english set before validation.

use serde_json::{Map, Value};

use super::TradeAction;

/// Canonical key for a possibly-localized field name.
fn canonical_key(key: &str) -> &str {
    match key.trim() {
        "操作" | "动作" | "决策" | "Action" | "ACTION" => "action",
        "置信度" | "信心" | "信心度" | "Confidence" => "confidence",
        "理由" | "原因" | "分析" | "Reasoning" | "reason" | "Reason" => "reasoning",
        "仓位" | "配置" | "分配" | "持仓" | "Allocations" | "allocation" => "allocations",
        "代码" | "股票代码" | "标的" | "Symbol" => "symbol",
        "权重" | "比例" | "占比" | "Weight" => "weight",
        other => other,
    }
}

/// Rewrite localized keys to canonical ones, recursing into allocations.
pub(super) fn localize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, val) in map {
                let canonical = canonical_key(&key).to_string();
                // Only the allocations list carries nested objects we care about.
                let val = match val {
                    Value::Array(items) => {
                        Value::Array(items.into_iter().map(localize_value).collect())
                    }
                    other => other,
                };
                // First occurrence wins when localization collapses two keys.
                out.entry(canonical).or_insert(val);
            }
            Value::Object(out)
        }
        other => other,
    }
}

/// Normalize an action value, localized or english, to the canonical enum.
pub(super) fn normalize_action(raw: &str) -> Option<TradeAction> {
    match raw.trim().to_lowercase().as_str() {
        "buy" | "long" | "买入" | "买" | "加仓" | "做多" => Some(TradeAction::Buy),
        "sell" | "short" | "卖出" | "卖" | "减仓" | "做空" => Some(TradeAction::Sell),
        "hold" | "wait" | "持有" | "观望" | "不动" => Some(TradeAction::Hold),
        _ => None,
    }
}
