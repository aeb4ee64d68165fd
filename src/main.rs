//! # Eval Harness CLI (`evalh`)
//!
//! The `evalh` binary drives retrieval-quality benchmark runs against a
//! remote service and analyzes the results: launch-and-watch, rolling run
//! history, per-config statistics and trends, baseline management, and
//! per-question regression reports between any two runs.
//!
//! ## Usage
//!
//! ```bash
//! evalh --config ./config/evalh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `evalh run` | Launch an eval run and poll it to completion |
//! | `evalh history list` | Show the rolling history of past runs |
//! | `evalh history delete <index>` | Remove one history entry |
//! | `evalh history clear` | Empty the history |
//! | `evalh history export` | Dump the history as JSON |
//! | `evalh history import <path>` | Replace the history from a JSON export |
//! | `evalh stats <label>` | Mean accuracy/duration for one config label |
//! | `evalh trend` | Accuracy-over-time table |
//! | `evalh delta <index>` | Top-k delta vs the previous run of that config |
//! | `evalh compare <a> <b>` | Per-question regression report for two runs |
//! | `evalh baseline save` | Pin the latest finished run as the baseline |
//! | `evalh baseline compare` | Server-side comparison against the baseline |
//! | `evalh export` | Write the latest full result to a JSON artifact |
//! | `evalh cancel` | Ask the service to cancel the running job |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use eval_harness::api::{EvalApi, HttpEvalApi};
use eval_harness::config::{self, Config};
use eval_harness::diff;
use eval_harness::error::EvalError;
use eval_harness::events::ProgressMode;
use eval_harness::history::RunHistoryStore;
use eval_harness::models::RunParams;
use eval_harness::report;
use eval_harness::runner::{EvalRunner, RunOutcome};

/// Eval Harness CLI — evaluation run orchestration and regression diffing
/// for retrieval services.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/evalh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "evalh",
    about = "Eval Harness — evaluation run orchestration and regression diffing for retrieval services",
    version,
    long_about = "Eval Harness launches retrieval-quality benchmark jobs on a remote service, \
    polls them to completion with progress reporting, keeps a bounded durable history of past \
    runs, and computes configuration and per-question regression diffs between runs."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/evalh.toml`. Service endpoint, eval defaults,
    /// and history settings are read from this file. Commands that only
    /// touch local history fall back to built-in defaults when the file
    /// is absent.
    #[arg(long, global = true, default_value = "./config/evalh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Launch an eval run and poll it to completion.
    ///
    /// Starts the benchmark on the service, reports progress while it
    /// runs, and on completion prints the summary and appends it to the
    /// local history. Ctrl-C detaches from the run without stopping the
    /// remote job.
    Run {
        /// Use the multi-query retrieval pipeline (overrides config).
        #[arg(long, conflicts_with = "single")]
        multi: bool,

        /// Use the single-query pipeline (overrides config).
        #[arg(long)]
        single: bool,

        /// Results retrieved per question (overrides config).
        #[arg(long)]
        final_k: Option<i64>,

        /// Save the completed run as the server-side baseline.
        #[arg(long)]
        save_baseline: bool,

        /// Progress reporting: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a TTY, `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Inspect and manage the rolling run history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Mean accuracy and duration for runs matching a config label.
    Stats {
        /// Config label as shown in `history list` (e.g. `multi-k10`).
        label: String,
    },

    /// Accuracy-over-time table, oldest first.
    Trend {
        /// Only include runs with this config label.
        #[arg(long)]
        label: Option<String>,
    },

    /// Top-k delta of one history entry vs the previous run of its config.
    Delta {
        /// History index as shown in `history list`.
        index: usize,
    },

    /// Per-question regression report between two runs.
    ///
    /// Fetches both full records from the service and pairs results by
    /// question text, so reordered question sets are compared correctly.
    Compare {
        /// Run id of the current (newer) run.
        current: String,

        /// Run id of the previous (baseline) run.
        previous: String,

        /// Align results by position instead of question text.
        #[arg(long)]
        positional: bool,
    },

    /// Manage the server-side comparison baseline.
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },

    /// Write the latest full result to a JSON artifact.
    Export {
        /// Output path; prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Ask the service to cancel the currently running job. Best-effort.
    Cancel,
}

/// History management subcommands.
#[derive(Subcommand)]
enum HistoryAction {
    /// Show all recorded runs, most recent first.
    List,

    /// Remove the entry at the given index.
    Delete {
        /// History index as shown in `history list`.
        index: usize,
    },

    /// Remove all recorded runs.
    Clear,

    /// Dump the history as JSON.
    Export {
        /// Output path; prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Replace the history from a JSON export.
    Import {
        /// Path to a file produced by `history export`.
        path: PathBuf,
    },
}

/// Baseline subcommands.
#[derive(Subcommand)]
enum BaselineAction {
    /// Pin the latest finished run as the comparison baseline.
    Save,

    /// Fetch the server-computed comparison against the baseline.
    Compare,
}

fn parse_progress(arg: Option<&str>) -> anyhow::Result<ProgressMode> {
    match arg {
        None => Ok(ProgressMode::default_for_tty()),
        Some("off") => Ok(ProgressMode::Off),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some(other) => anyhow::bail!("Unknown progress mode: {}. Use off, human, or json.", other),
    }
}

fn open_history(cfg: &Config) -> RunHistoryStore {
    RunHistoryStore::open_file(&cfg.history.path, cfg.history.capacity)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Local-only commands work without a config file.
    let cfg = match &cli.command {
        Commands::History { .. }
        | Commands::Stats { .. }
        | Commands::Trend { .. }
        | Commands::Delta { .. } => {
            config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal())
        }
        _ => config::load_config(&cli.config)?,
    };

    match cli.command {
        Commands::Run {
            multi,
            single,
            final_k,
            save_baseline,
            progress,
        } => {
            let mode = parse_progress(progress.as_deref())?;
            let params = RunParams {
                use_multi: if multi {
                    true
                } else if single {
                    false
                } else {
                    cfg.eval.use_multi
                },
                final_k: final_k.unwrap_or(cfg.eval.final_k),
            };

            let runner = Arc::new(EvalRunner::from_config(&cfg)?);
            runner.subscribe(mode.reporter());

            tokio::select! {
                res = runner.run_eval(params) => match res? {
                    RunOutcome::Completed(run) => {
                        report::print_run_summary(&run);
                        if save_baseline {
                            runner.save_baseline().await?;
                            println!("Saved as baseline.");
                        }
                    }
                    RunOutcome::Detached => {
                        println!("Detached from run.");
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    runner.stop_eval();
                    println!();
                    println!(
                        "Detached. The remote job may still be running; use `evalh cancel` to stop it."
                    );
                }
            }
        }

        Commands::History { action } => {
            let mut store = open_history(&cfg);
            match action {
                HistoryAction::List => {
                    let selected = store.selected().map(|(i, _)| i);
                    report::print_history(store.entries(), selected);
                }
                HistoryAction::Delete { index } => {
                    let removed = store.delete(index)?;
                    println!("Deleted run {} (index {}).", removed.run_id, index);
                }
                HistoryAction::Clear => {
                    store.clear()?;
                    println!("History cleared.");
                }
                HistoryAction::Export { output } => match output {
                    Some(path) => {
                        store.export(&path)?;
                        eprintln!("Exported {} entries to {}", store.len(), path.display());
                    }
                    None => {
                        println!("{}", serde_json::to_string_pretty(store.entries())?);
                    }
                },
                HistoryAction::Import { path } => {
                    let n = store.import(&path)?;
                    println!("Imported {} entries from {}", n, path.display());
                }
            }
        }

        Commands::Stats { label } => {
            let store = open_history(&cfg);
            match store.config_stats(&label) {
                Some(stats) => report::print_config_stats(&label, &stats),
                None => {
                    return Err(EvalError::NotFound(format!(
                        "no history entries with config label '{}'",
                        label
                    ))
                    .into())
                }
            }
        }

        Commands::Trend { label } => {
            let store = open_history(&cfg);
            report::print_trend(&store.trend_data(label.as_deref()));
        }

        Commands::Delta { index } => {
            let store = open_history(&cfg);
            let entry = store.entries().get(index).cloned().ok_or_else(|| {
                EvalError::NotFound(format!(
                    "no history entry at index {} ({} entries)",
                    index,
                    store.len()
                ))
            })?;
            match store.delta_vs_previous(index) {
                Some(delta) => report::print_delta(&entry, &delta),
                None => println!(
                    "No earlier run with config {} to compare against.",
                    entry.config_label
                ),
            }
        }

        Commands::Compare {
            current,
            previous,
            positional,
        } => {
            let api = HttpEvalApi::new(&cfg.service)?;
            let current_run = api.results_by_id(&current).await?;
            let previous_run = api.results_by_id(&previous).await?;

            if positional {
                let counts = diff::aggregate(&current_run, &previous_run);
                println!(
                    "Positional alignment over {} question(s): regressions: {}  improvements: {}  unchanged: {}",
                    counts.sum(),
                    counts.regressions,
                    counts.improvements,
                    counts.unchanged
                );
            } else {
                report::print_diff_report(&diff::diff_runs(&current_run, &previous_run));
            }
        }

        Commands::Baseline { action } => {
            let runner = EvalRunner::from_config(&cfg)?;
            match action {
                BaselineAction::Save => {
                    let run = runner.attach_latest().await?;
                    runner.save_baseline().await?;
                    println!("Saved run {} as baseline.", run.run_id);
                }
                BaselineAction::Compare => {
                    runner.attach_latest().await?;
                    let payload = runner.compare_with_baseline().await?;
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                }
            }
        }

        Commands::Export { output } => {
            let runner = EvalRunner::from_config(&cfg)?;
            let run = runner.attach_latest().await?;
            match output {
                Some(path) => {
                    runner.export_results(&path)?;
                    eprintln!("Exported run {} to {}", run.run_id, path.display());
                }
                None => {
                    println!("{}", serde_json::to_string_pretty(&run)?);
                }
            }
        }

        Commands::Cancel => {
            let api = HttpEvalApi::new(&cfg.service)?;
            api.cancel().await.context("cancel eval run")?;
            println!("Cancellation requested.");
        }
    }

    Ok(())
}
