//! Pure comparison between two evaluation runs.
//!
//! Stateless functions over two full [`EvalRun`] records: configuration
//! diffing and per-question regression classification. No I/O, no shared
//! state; safe to call from any number of tasks.
//!
//! Two alignment strategies are provided:
//! - [`aggregate`] pairs results positionally (index `i` vs index `i`) and
//!   counts over the overlapping prefix. This is the historical behavior;
//!   it misclassifies reordered question sets and is kept as a documented
//!   limitation.
//! - [`aggregate_by_question`] pairs by question text, so reordering or
//!   adding/removing questions between runs cannot manufacture phantom
//!   regressions. Drill-down reports use this one.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::models::{EvalRun, QuestionResult};

/// One changed configuration parameter. Derived, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigDiffEntry {
    pub key: String,
    /// Value in the first ("current") run; `null` when the key is absent.
    pub current: Value,
    /// Value in the second ("previous"/baseline) run; `null` when absent.
    pub previous: Value,
    pub changed: bool,
}

/// Per-question outcome relative to a comparison run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Previously a top-k hit, now a miss.
    Regression,
    /// Previously a miss, now a top-k hit.
    Improvement,
    /// Same top-k outcome in both runs.
    Unchanged,
}

/// Counts of classified questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub regressions: usize,
    pub improvements: usize,
    pub unchanged: usize,
}

impl DiffCounts {
    pub fn sum(&self) -> usize {
        self.regressions + self.improvements + self.unchanged
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Regression => self.regressions += 1,
            Outcome::Improvement => self.improvements += 1,
            Outcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// One classified question in a drill-down report.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionDiff {
    pub question: String,
    pub repo: String,
    pub outcome: Outcome,
    pub current_topk_hit: bool,
    pub previous_topk_hit: bool,
}

/// Full drill-down comparison of two runs.
#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    pub current_run_id: String,
    pub previous_run_id: String,
    pub config_changes: Vec<ConfigDiffEntry>,
    /// Top-k accuracy delta in percentage points (current − previous).
    pub topk_delta_pct: f64,
    pub counts: DiffCounts,
    /// Classified questions, current-run order, unchanged ones included.
    pub questions: Vec<QuestionDiff>,
    /// Questions in the current run with no counterpart in the previous.
    pub unmatched_current: usize,
    /// Questions in the previous run with no counterpart in the current.
    pub unmatched_previous: usize,
}

/// Diff two configuration maps.
///
/// Walks the union of keys (current's insertion order first, then keys only
/// present in previous) and returns the keys whose values differ under JSON
/// structural equality, each tagged with both values. A key absent on one
/// side compares against `null`.
///
/// Detection is commutative — swapping the arguments yields the same
/// changed-key set — while the `current`/`previous` labeling follows the
/// argument order.
pub fn diff_configs(current: &Map<String, Value>, previous: &Map<String, Value>) -> Vec<ConfigDiffEntry> {
    let mut entries = Vec::new();

    for (key, cur_value) in current {
        let prev_value = previous.get(key).cloned().unwrap_or(Value::Null);
        if *cur_value != prev_value {
            entries.push(ConfigDiffEntry {
                key: key.clone(),
                current: cur_value.clone(),
                previous: prev_value,
                changed: true,
            });
        }
    }

    for (key, prev_value) in previous {
        if current.contains_key(key) {
            continue;
        }
        entries.push(ConfigDiffEntry {
            key: key.clone(),
            current: Value::Null,
            previous: prev_value.clone(),
            changed: true,
        });
    }

    entries
}

/// Classify one question against its counterpart in a previous run.
///
/// Uses `topk_hit` only (not `top1_hit`). Returns `None` when the previous
/// run has no counterpart — the pair is "not comparable", never an error.
pub fn classify_question(
    current: &QuestionResult,
    previous: Option<&QuestionResult>,
) -> Option<Outcome> {
    let previous = previous?;
    Some(match (current.topk_hit, previous.topk_hit) {
        (false, true) => Outcome::Regression,
        (true, false) => Outcome::Improvement,
        _ => Outcome::Unchanged,
    })
}

/// Positional aggregation: classify index `i` of `current` against index
/// `i` of `previous`. The counts sum to the overlapping prefix length,
/// `min(current.results.len(), previous.results.len())`.
pub fn aggregate(current: &EvalRun, previous: &EvalRun) -> DiffCounts {
    let mut counts = DiffCounts::default();
    for (i, result) in current.results.iter().enumerate() {
        if let Some(outcome) = classify_question(result, previous.results.get(i)) {
            counts.record(outcome);
        }
    }
    counts
}

/// Keyed aggregation: pair results by question text instead of position.
///
/// Questions appearing in only one run are skipped and reported in the
/// unmatched counts. When a question text occurs more than once in the
/// previous run, the first occurrence wins.
pub fn aggregate_by_question(
    current: &EvalRun,
    previous: &EvalRun,
) -> (DiffCounts, Vec<QuestionDiff>, usize, usize) {
    let mut by_question: HashMap<&str, &QuestionResult> = HashMap::new();
    for result in &previous.results {
        by_question.entry(result.question.as_str()).or_insert(result);
    }

    let mut counts = DiffCounts::default();
    let mut questions = Vec::new();
    let mut unmatched_current = 0usize;
    let mut matched = 0usize;

    for result in &current.results {
        let prev = by_question.get(result.question.as_str()).copied();
        match classify_question(result, prev) {
            Some(outcome) => {
                matched += 1;
                counts.record(outcome);
                questions.push(QuestionDiff {
                    question: result.question.clone(),
                    repo: result.repo.clone(),
                    outcome,
                    current_topk_hit: result.topk_hit,
                    previous_topk_hit: prev.map(|p| p.topk_hit).unwrap_or(false),
                });
            }
            None => unmatched_current += 1,
        }
    }

    let unmatched_previous = previous.results.len().saturating_sub(matched);
    (counts, questions, unmatched_current, unmatched_previous)
}

/// Build the full drill-down report for two runs, using keyed alignment.
pub fn diff_runs(current: &EvalRun, previous: &EvalRun) -> DiffReport {
    let (counts, questions, unmatched_current, unmatched_previous) =
        aggregate_by_question(current, previous);

    DiffReport {
        current_run_id: current.run_id.clone(),
        previous_run_id: previous.run_id.clone(),
        config_changes: diff_configs(&current.config, &previous.config),
        topk_delta_pct: current.topk_pct() - previous.topk_pct(),
        counts,
        questions,
        unmatched_current,
        unmatched_previous,
    }
}
