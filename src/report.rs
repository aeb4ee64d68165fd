//! Human-readable rendering for CLI output.
//!
//! Plain stdout tables and summaries for run results, history, per-config
//! statistics, trends, and drill-down diff reports. Kept separate from the
//! engine modules so library consumers never pull in terminal formatting.

use crate::diff::{DiffReport, Outcome};
use crate::history::{ConfigStats, DeltaVsPrevious, TrendPoint};
use crate::models::{EvalRun, HistoryEntry};

/// Print the summary block for a completed run.
pub fn print_run_summary(run: &EvalRun) {
    println!("Eval Run — {}", run.run_id);
    println!("==========={}", "=".repeat(run.run_id.len()));
    println!();
    println!("  Questions:   {}", run.total);
    println!(
        "  Top-1:       {} / {} ({:.1}%)",
        run.top1_hits,
        run.total,
        run.top1_pct()
    );
    println!(
        "  Top-k:       {} / {} ({:.1}%)",
        run.topk_hits,
        run.total,
        run.topk_pct()
    );
    println!("  Duration:    {:.1}s", run.duration_secs);
    println!("  Config:      {}", run.config_label());
    println!();
}

/// Print the history table, most-recent-first, marking the selection.
pub fn print_history(entries: &[HistoryEntry], selected: Option<usize>) {
    if entries.is_empty() {
        println!("No runs recorded yet.");
        return;
    }

    println!(
        "  {:<3} {:<14} {:>7} {:>7} {:>8}   {:<14} {}",
        "#", "CONFIG", "TOP-1", "TOP-K", "SECS", "RUN", "WHEN"
    );
    println!("  {}", "-".repeat(72));

    for (i, entry) in entries.iter().enumerate() {
        let marker = if selected == Some(i) { "*" } else { " " };
        println!(
            "{} {:<3} {:<14} {:>6.1}% {:>6.1}% {:>8.1}   {:<14} {}",
            marker,
            i,
            entry.config_label,
            entry.top1_pct(),
            entry.topk_pct(),
            entry.duration_secs,
            short_id(&entry.run_id),
            format_ts_relative(entry.timestamp.timestamp())
        );
    }
}

/// Print aggregate statistics for one config label.
pub fn print_config_stats(label: &str, stats: &ConfigStats) {
    println!("Config {} — {} run(s)", label, stats.count);
    println!();
    println!("  Mean top-1:    {:.1}%", stats.mean_top1_pct);
    println!("  Mean top-k:    {:.1}%", stats.mean_topk_pct);
    println!("  Mean duration: {:.1}s", stats.mean_duration_secs);
    println!(
        "  Latest:        run {} ({})",
        short_id(&stats.latest.run_id),
        format_ts_relative(stats.latest.timestamp.timestamp())
    );
}

/// Print the delta of one entry against the previous run of its config.
pub fn print_delta(entry: &HistoryEntry, delta: &DeltaVsPrevious) {
    let sign = if delta.delta >= 0.0 { "+" } else { "" };
    println!(
        "Run {} vs previous {} ({}): top-k {}{:.1} pts — {}",
        short_id(&entry.run_id),
        short_id(&delta.previous.run_id),
        entry.config_label,
        sign,
        delta.delta,
        if delta.improved { "improved" } else { "not improved" }
    );
}

/// Print the trend series as a table, oldest-first.
pub fn print_trend(points: &[TrendPoint]) {
    if points.is_empty() {
        println!("No matching runs.");
        return;
    }

    println!(
        "  {:<18} {:>7} {:>7} {:>8}   {}",
        "WHEN", "TOP-1", "TOP-K", "SECS", "CONFIG"
    );
    println!("  {}", "-".repeat(58));
    for p in points {
        println!(
            "  {:<18} {:>6.1}% {:>6.1}% {:>8.1}   {}",
            p.timestamp.format("%Y-%m-%d %H:%M"),
            p.top1_pct,
            p.topk_pct,
            p.duration_secs,
            p.config_label
        );
    }
}

/// Print the drill-down comparison of two runs.
pub fn print_diff_report(report: &DiffReport) {
    println!(
        "Comparing {} (current) vs {} (previous)",
        short_id(&report.current_run_id),
        short_id(&report.previous_run_id)
    );
    println!();

    if report.config_changes.is_empty() {
        println!("  Config: unchanged");
    } else {
        println!("  Config changes:");
        for change in &report.config_changes {
            println!(
                "    {:<20} {} → {}",
                change.key, change.previous, change.current
            );
        }
    }

    let sign = if report.topk_delta_pct >= 0.0 { "+" } else { "" };
    println!();
    println!(
        "  Top-k delta: {}{:.1} pts   regressions: {}  improvements: {}  unchanged: {}",
        sign,
        report.topk_delta_pct,
        report.counts.regressions,
        report.counts.improvements,
        report.counts.unchanged
    );
    if report.unmatched_current > 0 || report.unmatched_previous > 0 {
        println!(
            "  Not comparable: {} question(s) only in current, {} only in previous",
            report.unmatched_current, report.unmatched_previous
        );
    }

    let changed: Vec<_> = report
        .questions
        .iter()
        .filter(|q| q.outcome != Outcome::Unchanged)
        .collect();
    if !changed.is_empty() {
        println!();
        for q in changed {
            let tag = match q.outcome {
                Outcome::Regression => "REGRESSED",
                Outcome::Improvement => "IMPROVED ",
                Outcome::Unchanged => unreachable!(),
            };
            println!("  {}  [{}] {}", tag, q.repo, q.question);
        }
    }
    println!();
}

/// First 12 characters of a run id, enough to disambiguate in a table.
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_long_ids() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("run-7"), "run-7");
    }

    #[test]
    fn relative_time_buckets() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}
