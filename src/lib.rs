//! # Eval Harness
//!
//! Evaluation run orchestration and regression diffing for retrieval
//! services.
//!
//! Eval Harness drives long-running retrieval-quality benchmark jobs on a
//! remote service — start, poll to completion with progress events, fetch
//! the full result — keeps a bounded durable history of past runs, and
//! computes structured diffs (configuration and per-question outcomes)
//! between any two runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌──────────────┐
//! │ EvalRunner │──▶│  EvalApi    │──▶│ retrieval    │
//! │ lifecycle  │   │ (HTTP/json) │   │ service      │
//! └─────┬─────┘   └─────────────┘   └──────────────┘
//!       │ completed runs
//!       ▼
//! ┌──────────────┐      ┌──────────────────┐
//! │ RunHistory   │      │ RegressionDiff   │
//! │ Store (JSON) │      │ (pure functions) │
//! └──────────────┘      └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! evalh run --final-k 10          # launch an eval, watch progress
//! evalh history list              # rolling history of past runs
//! evalh stats multi-k10           # mean accuracy for one config
//! evalh compare <id-a> <id-b>     # per-question regression report
//! evalh baseline save             # pin the latest run as the baseline
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`api`] | Remote eval job API client |
//! | [`runner`] | Run lifecycle state machine |
//! | [`events`] | Typed lifecycle events and reporters |
//! | [`history`] | Bounded durable run history |
//! | [`diff`] | Pure config and result diffing |
//! | [`report`] | Human-readable CLI rendering |

pub mod api;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod history;
pub mod models;
pub mod report;
pub mod runner;
