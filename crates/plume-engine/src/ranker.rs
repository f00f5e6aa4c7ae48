use plume_contracts::results::RankingResult;
use plume_contracts::variants::Variant;
use serde_json::{Map, Value};

use crate::extract::{coerce_text, extract_json_object_from_text};

const MAX_REASON_CHARS: usize = 280;

/// What the ranking call decided, after repair.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingVerdict {
    pub winner_index: usize,
    pub scores: Vec<f64>,
    pub reason: String,
    pub defaulted: bool,
}

impl RankingVerdict {
    pub fn into_result(self, variants: &[Variant]) -> Option<RankingResult> {
        let final_variant = variants.get(self.winner_index)?.clone();
        Some(RankingResult {
            winner_index: self.winner_index,
            scores: self.scores,
            reason: self.reason,
            final_variant,
            defaulted: self.defaulted,
        })
    }

    fn fallback(count: usize, reason: impl Into<String>) -> Self {
        Self {
            winner_index: 0,
            scores: vec![0.0; count],
            reason: reason.into(),
            defaulted: true,
        }
    }
}

/// Reads the ranking answer for `count` variants. Never fails: unusable
/// answers select index 0 with neutral scores.
pub fn parse_ranking(text: &str, count: usize) -> RankingVerdict {
    let Some(object) = extract_json_object_from_text(text) else {
        return RankingVerdict::fallback(count, "ranking answer was not a JSON object");
    };
    let reason = coerce_text(object.get("reason"), MAX_REASON_CHARS).unwrap_or_default();

    let Some(scores) = valid_scores(&object, count) else {
        return RankingVerdict::fallback(count, "ranking scores were missing or malformed");
    };

    match object.get("winner_index") {
        None | Some(Value::Null) => RankingVerdict {
            winner_index: argmax(&scores),
            scores,
            reason,
            defaulted: false,
        },
        Some(value) => match index_value(value) {
            Some(idx) if idx < count => RankingVerdict {
                winner_index: idx,
                scores,
                reason,
                defaulted: false,
            },
            _ => RankingVerdict {
                winner_index: 0,
                scores,
                reason: format!("winner_index {value} was out of range"),
                defaulted: true,
            },
        },
    }
}

/// A non-negative integer, also when written as an integral float (`2.0`).
fn index_value(value: &Value) -> Option<usize> {
    if let Some(idx) = value.as_u64() {
        return usize::try_from(idx).ok();
    }
    let idx = value.as_f64()?;
    (idx >= 0.0 && idx.fract() == 0.0 && idx <= usize::MAX as f64).then_some(idx as usize)
}

fn valid_scores(object: &Map<String, Value>, count: usize) -> Option<Vec<f64>> {
    let rows = object.get("scores")?.as_array()?;
    if rows.len() != count {
        return None;
    }
    rows.iter()
        .map(|row| row.as_f64().filter(|score| score.is_finite()))
        .collect()
}

/// Index of the highest score; the first one wins ties.
fn argmax(scores: &[f64]) -> usize {
    let mut best = 0;
    for (idx, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = idx;
        }
    }
    best
}
