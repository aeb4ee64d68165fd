//! Core data types for evaluation runs and their history.
//!
//! These types mirror the JSON shapes produced by the retrieval service's
//! eval API ([`EvalRun`], [`QuestionResult`]) plus the locally-owned
//! summary record kept by the history store ([`HistoryEntry`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EvalError, Result};

/// Parameters for launching a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    /// Use the multi-query retrieval pipeline instead of single-query.
    pub use_multi: bool,
    /// Number of results retrieved per question; must be > 0.
    pub final_k: i64,
}

impl RunParams {
    /// Validate the parameters before any network call is made.
    pub fn validate(&self) -> Result<()> {
        if self.final_k <= 0 {
            return Err(EvalError::Validation(format!(
                "final_k must be > 0, got {}",
                self.final_k
            )));
        }
        Ok(())
    }
}

/// Full record of one benchmark execution, fetched from the service.
/// Immutable once fetched; the client only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRun {
    pub run_id: String,
    /// Number of questions evaluated; equals `results.len()`.
    pub total: i64,
    /// Questions whose expected path was ranked first.
    pub top1_hits: i64,
    /// Questions whose expected path appeared anywhere in the top k.
    pub topk_hits: i64,
    /// `top1_hits / total`, `0.0` when `total` is zero.
    #[serde(default)]
    pub top1_accuracy: f64,
    /// `topk_hits / total`, `0.0` when `total` is zero.
    #[serde(default)]
    pub topk_accuracy: f64,
    #[serde(default)]
    pub duration_secs: f64,
    /// Configuration the service ran with: parameter name → scalar value,
    /// arbitrary keys, insertion order preserved.
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub results: Vec<QuestionResult>,
}

impl EvalRun {
    /// Top-k accuracy as a percentage in `[0, 100]`.
    pub fn topk_pct(&self) -> f64 {
        accuracy(self.topk_hits, self.total) * 100.0
    }

    /// Top-1 accuracy as a percentage in `[0, 100]`.
    pub fn top1_pct(&self) -> f64 {
        accuracy(self.top1_hits, self.total) * 100.0
    }

    /// Check the record's internal invariants:
    /// `0 ≤ top1_hits ≤ topk_hits ≤ total` and `results.len() == total`.
    ///
    /// Fetched records that fail this check are rejected as a contract
    /// violation rather than silently committed to history.
    pub fn validate(&self) -> Result<()> {
        if self.top1_hits < 0 || self.top1_hits > self.topk_hits || self.topk_hits > self.total {
            return Err(EvalError::Job(format!(
                "run {} has inconsistent counters: top1={} topk={} total={}",
                self.run_id, self.top1_hits, self.topk_hits, self.total
            )));
        }
        if self.results.len() as i64 != self.total {
            return Err(EvalError::Job(format!(
                "run {} reports total={} but carries {} results",
                self.run_id,
                self.total,
                self.results.len()
            )));
        }
        Ok(())
    }

    /// Short label describing the run's configuration, used to group
    /// history entries for trend and delta analysis.
    pub fn config_label(&self) -> String {
        config_label(&self.config)
    }
}

/// Per-question outcome within an [`EvalRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question: String,
    #[serde(default)]
    pub repo: String,
    /// Expected file paths; order-irrelevant.
    #[serde(default)]
    pub expect_paths: Vec<String>,
    /// Returned file paths in rank order.
    #[serde(default)]
    pub top_paths: Vec<String>,
    pub top1_hit: bool,
    pub topk_hit: bool,
    #[serde(default)]
    pub duration_secs: f64,
    /// Scored documents for drill-down inspection, when the service
    /// includes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<Vec<ScoredDoc>>,
}

/// A retrieved document with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub file_path: String,
    pub score: f64,
}

/// Durable summary of a completed run, owned by the history store.
/// Created at run completion, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Locally generated UUID. Selection tracks this id, never an index.
    pub id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub config_label: String,
    pub total: i64,
    pub top1_hits: i64,
    pub topk_hits: i64,
    pub duration_secs: f64,
}

impl HistoryEntry {
    /// Build a summary from a completed run, stamped with the current time.
    pub fn from_run(run: &EvalRun) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run.run_id.clone(),
            timestamp: Utc::now(),
            config_label: run.config_label(),
            total: run.total,
            top1_hits: run.top1_hits,
            topk_hits: run.topk_hits,
            duration_secs: run.duration_secs,
        }
    }

    /// Top-1 accuracy as a percentage in `[0, 100]`.
    pub fn top1_pct(&self) -> f64 {
        accuracy(self.top1_hits, self.total) * 100.0
    }

    /// Top-k accuracy as a percentage in `[0, 100]`.
    pub fn topk_pct(&self) -> f64 {
        accuracy(self.topk_hits, self.total) * 100.0
    }
}

/// `hits / total` as a fraction, `0.0` when `total` is zero.
pub fn accuracy(hits: i64, total: i64) -> f64 {
    if total > 0 {
        hits as f64 / total as f64
    } else {
        0.0
    }
}

/// Derive a short config label from a run's parameter map.
///
/// Recognizes the pipeline-shape keys (`use_multi`, `final_k`, upper- or
/// lower-case) and yields labels like `"multi-k10"`. Unrecognized maps fall
/// back to a `key=value` join of the first few parameters so distinct
/// configurations still group separately.
pub fn config_label(config: &Map<String, Value>) -> String {
    let use_multi = lookup(config, "use_multi").and_then(Value::as_bool);
    let final_k = lookup(config, "final_k").and_then(Value::as_i64);

    match (use_multi, final_k) {
        (Some(multi), Some(k)) => {
            format!("{}-k{}", if multi { "multi" } else { "single" }, k)
        }
        _ if config.is_empty() => "default".to_string(),
        _ => config
            .iter()
            .take(3)
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    }
}

/// Case-insensitive key lookup in a config map.
fn lookup<'a>(config: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    config
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(total: i64, top1: i64, topk: i64) -> EvalRun {
        EvalRun {
            run_id: "r1".to_string(),
            total,
            top1_hits: top1,
            topk_hits: topk,
            top1_accuracy: accuracy(top1, total),
            topk_accuracy: accuracy(topk, total),
            duration_secs: 1.0,
            config: Map::new(),
            results: (0..total)
                .map(|i| QuestionResult {
                    question: format!("q{}", i),
                    repo: String::new(),
                    expect_paths: vec![],
                    top_paths: vec![],
                    top1_hit: i < top1,
                    topk_hit: i < topk,
                    duration_secs: 0.1,
                    docs: None,
                })
                .collect(),
        }
    }

    #[test]
    fn accuracy_derivation() {
        assert_eq!(accuracy(5, 10), 0.5);
        assert_eq!(accuracy(0, 0), 0.0);
        let r = run(10, 5, 7);
        assert!((r.top1_accuracy - 0.5).abs() < 1e-9);
        assert!((r.topk_pct() - 70.0).abs() < 1e-9);
    }

    #[test]
    fn invariants_hold_for_valid_run() {
        assert!(run(10, 5, 7).validate().is_ok());
        assert!(run(0, 0, 0).validate().is_ok());
    }

    #[test]
    fn invariants_reject_inconsistent_counters() {
        let mut r = run(10, 5, 7);
        r.top1_hits = 9;
        assert!(matches!(r.validate(), Err(EvalError::Job(_))));

        let mut r = run(10, 5, 7);
        r.topk_hits = 11;
        assert!(matches!(r.validate(), Err(EvalError::Job(_))));
    }

    #[test]
    fn invariants_reject_length_mismatch() {
        let mut r = run(10, 5, 7);
        r.results.pop();
        assert!(matches!(r.validate(), Err(EvalError::Job(_))));
    }

    #[test]
    fn config_label_recognizes_pipeline_keys() {
        let mut map = Map::new();
        map.insert("use_multi".to_string(), json!(true));
        map.insert("final_k".to_string(), json!(10));
        assert_eq!(config_label(&map), "multi-k10");

        let mut map = Map::new();
        map.insert("USE_MULTI".to_string(), json!(false));
        map.insert("FINAL_K".to_string(), json!(5));
        assert_eq!(config_label(&map), "single-k5");
    }

    #[test]
    fn config_label_falls_back_to_pairs() {
        let mut map = Map::new();
        map.insert("BM25_WEIGHT".to_string(), json!(0.4));
        assert_eq!(config_label(&map), "BM25_WEIGHT=0.4");
        assert_eq!(config_label(&Map::new()), "default");
    }

    #[test]
    fn run_params_validation() {
        assert!(RunParams {
            use_multi: false,
            final_k: 10
        }
        .validate()
        .is_ok());
        assert!(RunParams {
            use_multi: true,
            final_k: 0
        }
        .validate()
        .is_err());
    }
}
