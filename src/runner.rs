//! Evaluation run lifecycle orchestration.
//!
//! [`EvalRunner`] owns the full lifecycle of one benchmark execution
//! against the remote service:
//!
//! ```text
//! Idle ──run_eval──▶ Starting ──accepted──▶ Running ──not-running──▶ Complete
//!                        │                     │  ▲                      │
//!                        │                     ╰──╯ poll, then sleep     ├─▶ history append
//!                        ▼                                               ╰─▶ Completed event
//!                 Errored / Cancelled
//! ```
//!
//! Polling is poll-then-schedule-next: a tick is only issued after the
//! previous request has settled, so overlapping in-flight polls cannot
//! occur regardless of request latency. Cancellation bumps a generation
//! counter before `stop_eval` returns; every commit point re-checks the
//! generation and discards stale results instead of applying them.
//!
//! Failures never commit partial results: any request error during
//! `Starting` or `Running` stops the loop, transitions to `Errored`, and
//! publishes a failure event. The runner is immediately re-runnable.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{EvalApi, HttpEvalApi, StartRequest};
use crate::config::Config;
use crate::error::{EvalError, Result};
use crate::events::{EvalEvent, EventBus, EventSink};
use crate::history::RunHistoryStore;
use crate::models::{EvalRun, HistoryEntry, RunParams};

/// Lifecycle state of the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Start request issued, not yet acknowledged.
    Starting,
    /// Remote job acknowledged; polling in progress.
    Running,
    /// Job finished and the full result was fetched and committed.
    Complete,
    /// A request failed; nothing was committed.
    Errored,
    /// Local observation was detached by `stop_eval`.
    Cancelled,
}

/// How a `run_eval` future ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The job finished; the result was committed to history.
    Completed(Box<EvalRun>),
    /// `stop_eval` detached this run; any in-flight result was discarded
    /// and nothing was committed. The remote job may still be running.
    Detached,
}

/// Derive a display percentage from a status tick.
///
/// `progress/total*100` clamped to `[0, 100]`; a fixed 10% when the total
/// is not yet known, so progress bars have something to show.
pub fn progress_pct(progress: i64, total: i64) -> f64 {
    if total <= 0 {
        return 10.0;
    }
    ((progress as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

/// Orchestrates benchmark runs: start, poll to completion, fetch, commit.
///
/// One runner drives at most one run at a time; starting a second run
/// while one is active is rejected, never queued.
pub struct EvalRunner {
    api: Arc<dyn EvalApi>,
    events: EventBus,
    history: Mutex<RunHistoryStore>,
    poll_interval: Duration,
    state: Mutex<RunState>,
    /// Bumped on every admission and every cancellation. Commit points
    /// compare against the generation they were started under and discard
    /// stale work.
    generation: AtomicU64,
    last_result: Mutex<Option<EvalRun>>,
}

impl EvalRunner {
    pub fn new(api: Arc<dyn EvalApi>, history: RunHistoryStore, poll_interval: Duration) -> Self {
        Self {
            api,
            events: EventBus::new(),
            history: Mutex::new(history),
            poll_interval,
            state: Mutex::new(RunState::Idle),
            generation: AtomicU64::new(0),
            last_result: Mutex::new(None),
        }
    }

    /// Build a runner from config: HTTP API client plus file-backed history.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api = HttpEvalApi::new(&config.service)?;
        let history = RunHistoryStore::open_file(&config.history.path, config.history.capacity);
        Ok(Self::new(
            Arc::new(api),
            history,
            Duration::from_millis(config.eval.poll_interval_ms),
        ))
    }

    /// Register an observer for lifecycle events.
    pub fn subscribe(&self, sink: Box<dyn EventSink>) {
        self.events.subscribe(sink);
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap()
    }

    /// The last fetched full result, if any.
    pub fn last_result(&self) -> Option<EvalRun> {
        self.last_result.lock().unwrap().clone()
    }

    /// Run a closure against the history store.
    pub fn with_history<R>(&self, f: impl FnOnce(&mut RunHistoryStore) -> R) -> R {
        f(&mut self.history.lock().unwrap())
    }

    /// Launch a run and drive it to completion.
    ///
    /// Fails fast — before any network call — on invalid parameters or if
    /// a run is already active on this runner. On success the result is
    /// appended to history and a completion event is published.
    pub async fn run_eval(&self, params: RunParams) -> Result<RunOutcome> {
        params.validate()?;

        let gen = {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, RunState::Starting | RunState::Running) {
                return Err(EvalError::Validation(
                    "an eval run is already in progress; stop it before starting another"
                        .to_string(),
                ));
            }
            *state = RunState::Starting;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        match self.drive(params, gen).await {
            Ok(Some(run)) => Ok(RunOutcome::Completed(Box::new(run))),
            Ok(None) => Ok(RunOutcome::Detached),
            Err(err) => {
                if !self.advance(gen, RunState::Errored) {
                    // Cancelled while the failing request was in flight;
                    // the error is stale, discard it like any other result.
                    return Ok(RunOutcome::Detached);
                }
                self.events.publish(&EvalEvent::Failed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn drive(&self, params: RunParams, gen: u64) -> Result<Option<EvalRun>> {
        self.events.publish(&EvalEvent::Started {
            use_multi: params.use_multi,
            final_k: params.final_k,
        });

        let start = self.api.start_run(&StartRequest::from(params)).await?;
        if !start.accepted {
            return Err(EvalError::Job(
                "the service did not accept the run; is an eval already running remotely?"
                    .to_string(),
            ));
        }
        if !self.advance(gen, RunState::Running) {
            return Ok(None);
        }

        // Poll-then-schedule-next: the sleep only starts once the previous
        // status request has settled.
        loop {
            let status = self.api.status().await?;
            if !self.is_current(gen) {
                return Ok(None);
            }
            if !status.running {
                break;
            }
            self.events.publish(&EvalEvent::Progress {
                pct: progress_pct(status.progress, status.total),
                progress: status.progress,
                total: status.total,
            });

            tokio::time::sleep(self.poll_interval).await;
            if !self.is_current(gen) {
                return Ok(None);
            }
        }

        let run = self.api.results().await?;
        run.validate()?;

        // Commit point. After this the run is Complete; a cancellation
        // landing here raced completion and the result stands.
        if !self.advance(gen, RunState::Complete) {
            return Ok(None);
        }

        self.history
            .lock()
            .unwrap()
            .append(HistoryEntry::from_run(&run))
            .map_err(|e| {
                EvalError::Job(format!(
                    "run {} completed but the history write failed: {}",
                    run.run_id, e
                ))
            })?;
        *self.last_result.lock().unwrap() = Some(run.clone());

        self.events.publish(&EvalEvent::Completed {
            run_id: run.run_id.clone(),
            total: run.total,
            top1_hits: run.top1_hits,
            topk_hits: run.topk_hits,
            duration_secs: run.duration_secs,
        });

        Ok(Some(run))
    }

    /// Detach from the active run. Idempotent and safe from any state.
    ///
    /// Invalidates the active generation before returning, so no further
    /// poll ticks are applied and any in-flight request's result is
    /// discarded. Does not contact the service; the remote job keeps
    /// running (see [`cancel_remote`](Self::cancel_remote)).
    pub fn stop_eval(&self) {
        let was_active = {
            let mut state = self.state.lock().unwrap();
            let was_active = matches!(*state, RunState::Starting | RunState::Running);
            self.generation.fetch_add(1, Ordering::SeqCst);
            *state = RunState::Cancelled;
            was_active
        };
        if was_active {
            self.events.publish(&EvalEvent::Cancelled);
        }
    }

    /// Detach locally and additionally ask the service to cancel the job.
    /// The remote side of this is best-effort.
    pub async fn cancel_remote(&self) -> Result<()> {
        self.stop_eval();
        self.api.cancel().await
    }

    /// Persist the current run server-side as the comparison baseline.
    pub async fn save_baseline(&self) -> Result<()> {
        self.require_complete()?;
        self.api.save_baseline().await
    }

    /// Request the server-computed comparison against the stored baseline.
    /// The payload is opaque; rendering is the caller's concern.
    pub async fn compare_with_baseline(&self) -> Result<serde_json::Value> {
        self.require_complete()?;
        self.api.compare_baseline().await
    }

    /// Fetch the service's latest finished result and enter `Complete`, so
    /// baseline and export operations work without re-running the eval.
    /// Rejected while a run is active.
    pub async fn attach_latest(&self) -> Result<EvalRun> {
        if matches!(self.state(), RunState::Starting | RunState::Running) {
            return Err(EvalError::Validation(
                "an eval run is in progress; wait for it instead of attaching".to_string(),
            ));
        }
        let run = self.api.results().await?;
        run.validate()?;
        *self.last_result.lock().unwrap() = Some(run.clone());
        *self.state.lock().unwrap() = RunState::Complete;
        Ok(run)
    }

    /// Serialize the last full result to a JSON artifact at `path`.
    pub fn export_results(&self, path: &Path) -> anyhow::Result<()> {
        let guard = self.last_result.lock().unwrap();
        let run = guard.as_ref().ok_or_else(|| {
            EvalError::NotFound("no eval results loaded; nothing to export".to_string())
        })?;
        let json = serde_json::to_string_pretty(run)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    fn require_complete(&self) -> Result<()> {
        let complete = matches!(self.state(), RunState::Complete)
            && self.last_result.lock().unwrap().is_some();
        if !complete {
            return Err(EvalError::NotFound(
                "no completed run loaded; run an eval or attach the latest results first"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn is_current(&self, gen: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == gen
    }

    /// Transition to `next` only if `gen` is still the active generation.
    /// The check happens under the state lock so a concurrent `stop_eval`
    /// cannot be overwritten.
    fn advance(&self, gen: u64, next: RunState) -> bool {
        let mut state = self.state.lock().unwrap();
        if self.generation.load(Ordering::SeqCst) != gen {
            return false;
        }
        *state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{StartResponse, StatusResponse};
    use crate::history::MemoryBackend;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Notify;

    fn sample_run(run_id: &str) -> EvalRun {
        let results = (0..4)
            .map(|i| crate::models::QuestionResult {
                question: format!("q{}", i),
                repo: "repo".to_string(),
                expect_paths: vec![format!("src/q{}.rs", i)],
                top_paths: vec![],
                top1_hit: i < 2,
                topk_hit: i < 3,
                duration_secs: 0.2,
                docs: None,
            })
            .collect();
        EvalRun {
            run_id: run_id.to_string(),
            total: 4,
            top1_hits: 2,
            topk_hits: 3,
            top1_accuracy: 0.5,
            topk_accuracy: 0.75,
            duration_secs: 3.5,
            config: [
                ("use_multi".to_string(), json!(false)),
                ("final_k".to_string(), json!(10)),
            ]
            .into_iter()
            .collect(),
            results,
        }
    }

    /// Scripted fake of the remote API: pops status responses from a queue
    /// (defaulting to "running" when empty) and can block the first status
    /// call on a gate to make admission tests deterministic.
    struct ScriptedApi {
        statuses: Mutex<VecDeque<StatusResponse>>,
        result: EvalRun,
        gate: Option<Arc<Notify>>,
        gated: AtomicBool,
        fail_status: AtomicBool,
        start_calls: AtomicUsize,
        baseline_saves: AtomicUsize,
        cancel_calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(statuses: Vec<StatusResponse>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                result: sample_run("run-1"),
                gate: None,
                gated: AtomicBool::new(false),
                fail_status: AtomicBool::new(false),
                start_calls: AtomicUsize::new(0),
                baseline_saves: AtomicUsize::new(0),
                cancel_calls: AtomicUsize::new(0),
            }
        }

        fn running(progress: i64, total: i64) -> StatusResponse {
            StatusResponse {
                running: true,
                progress,
                total,
            }
        }

        fn finished() -> StatusResponse {
            StatusResponse {
                running: false,
                progress: 0,
                total: 0,
            }
        }
    }

    #[async_trait]
    impl EvalApi for ScriptedApi {
        async fn start_run(&self, _req: &StartRequest) -> crate::error::Result<StartResponse> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(StartResponse { accepted: true })
        }

        async fn status(&self) -> crate::error::Result<StatusResponse> {
            if let Some(gate) = &self.gate {
                if !self.gated.swap(true, Ordering::SeqCst) {
                    gate.notified().await;
                }
            }
            if self.fail_status.load(Ordering::SeqCst) {
                return Err(EvalError::Network("connection refused".to_string()));
            }
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Self::running(1, 10)))
        }

        async fn results(&self) -> crate::error::Result<EvalRun> {
            Ok(self.result.clone())
        }

        async fn results_by_id(&self, run_id: &str) -> crate::error::Result<EvalRun> {
            Err(EvalError::NotFound(format!("no run with id {}", run_id)))
        }

        async fn save_baseline(&self) -> crate::error::Result<()> {
            self.baseline_saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn compare_baseline(&self) -> crate::error::Result<serde_json::Value> {
            Ok(json!({ "delta": 0.0 }))
        }

        async fn cancel(&self) -> crate::error::Result<()> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Collecting(Arc<Mutex<Vec<EvalEvent>>>);

    impl EventSink for Collecting {
        fn publish(&self, event: &EvalEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn runner_with(api: Arc<ScriptedApi>) -> EvalRunner {
        let history = RunHistoryStore::open(Box::new(MemoryBackend::new()), 20);
        EvalRunner::new(api, history, Duration::from_millis(5))
    }

    fn params() -> RunParams {
        RunParams {
            use_multi: false,
            final_k: 10,
        }
    }

    #[tokio::test]
    async fn happy_path_completes_and_commits_history() {
        let api = Arc::new(ScriptedApi::new(vec![
            ScriptedApi::running(2, 4),
            ScriptedApi::running(3, 4),
            ScriptedApi::finished(),
        ]));
        let runner = runner_with(api.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        runner.subscribe(Box::new(Collecting(seen.clone())));

        let outcome = runner.run_eval(params()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(runner.state(), RunState::Complete);
        assert_eq!(runner.with_history(|h| h.len()), 1);
        assert_eq!(
            runner.with_history(|h| h.entries()[0].run_id.clone()),
            "run-1"
        );

        let events = seen.lock().unwrap();
        assert!(matches!(events.first(), Some(EvalEvent::Started { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, EvalEvent::Progress { .. })));
        assert!(matches!(events.last(), Some(EvalEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn rejects_second_run_while_one_is_active() {
        let gate = Arc::new(Notify::new());
        let mut api = ScriptedApi::new(vec![ScriptedApi::finished()]);
        api.gate = Some(gate.clone());
        let api = Arc::new(api);

        let runner = Arc::new(runner_with(api.clone()));

        let first = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_eval(params()).await })
        };
        // Let the first run reach its (gated) status poll.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runner.state(), RunState::Running);

        let second = runner.run_eval(params()).await;
        assert!(matches!(second, Err(EvalError::Validation(_))));

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));

        // Exactly one start request and one history entry.
        assert_eq!(api.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.with_history(|h| h.len()), 1);
    }

    #[tokio::test]
    async fn stop_eval_detaches_and_discards_in_flight_result() {
        // Empty script: the status queue defaults to running forever.
        let api = Arc::new(ScriptedApi::new(vec![]));
        let runner = Arc::new(runner_with(api.clone()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        runner.subscribe(Box::new(Collecting(seen.clone())));

        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_eval(params()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        runner.stop_eval();
        assert_eq!(runner.state(), RunState::Cancelled);

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, RunOutcome::Detached));
        assert_eq!(runner.with_history(|h| h.len()), 0);
        assert!(runner.last_result().is_none());
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, EvalEvent::Cancelled)));
    }

    #[tokio::test]
    async fn stop_eval_while_idle_is_a_no_op() {
        let api = Arc::new(ScriptedApi::new(vec![ScriptedApi::finished()]));
        let runner = runner_with(api);

        runner.stop_eval();
        runner.stop_eval();
        assert_eq!(runner.state(), RunState::Cancelled);

        // Still admissible afterwards.
        let outcome = runner.run_eval(params()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn status_failure_stops_polling_and_leaves_runner_reusable() {
        let api = Arc::new(ScriptedApi::new(vec![ScriptedApi::finished()]));
        api.fail_status.store(true, Ordering::SeqCst);
        let runner = runner_with(api.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        runner.subscribe(Box::new(Collecting(seen.clone())));

        let err = runner.run_eval(params()).await.unwrap_err();
        assert!(matches!(err, EvalError::Network(_)));
        assert_eq!(runner.state(), RunState::Errored);
        assert_eq!(runner.with_history(|h| h.len()), 0);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, EvalEvent::Failed { .. })));

        // No stuck Errored lock: the next run proceeds.
        api.fail_status.store(false, Ordering::SeqCst);
        let outcome = runner.run_eval(params()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(runner.with_history(|h| h.len()), 1);
    }

    #[tokio::test]
    async fn invalid_params_fail_before_any_network_call() {
        let api = Arc::new(ScriptedApi::new(vec![]));
        let runner = runner_with(api.clone());

        let err = runner
            .run_eval(RunParams {
                use_multi: false,
                final_k: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Validation(_)));
        assert_eq!(api.start_calls.load(Ordering::SeqCst), 0);
        assert_eq!(runner.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn baseline_requires_a_completed_run() {
        let api = Arc::new(ScriptedApi::new(vec![ScriptedApi::finished()]));
        let runner = runner_with(api.clone());

        let err = runner.save_baseline().await.unwrap_err();
        assert!(matches!(err, EvalError::NotFound(_)));
        assert_eq!(api.baseline_saves.load(Ordering::SeqCst), 0);

        runner.run_eval(params()).await.unwrap();
        runner.save_baseline().await.unwrap();
        assert_eq!(api.baseline_saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attach_latest_enables_baseline_and_export() {
        let api = Arc::new(ScriptedApi::new(vec![]));
        let runner = runner_with(api.clone());

        let run = runner.attach_latest().await.unwrap();
        assert_eq!(run.run_id, "run-1");
        assert_eq!(runner.state(), RunState::Complete);
        runner.save_baseline().await.unwrap();

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("results.json");
        runner.export_results(&path).unwrap();
        let exported: EvalRun =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(exported.run_id, "run-1");
    }

    #[tokio::test]
    async fn export_without_result_is_not_found() {
        let api = Arc::new(ScriptedApi::new(vec![]));
        let runner = runner_with(api);

        let tmp = tempfile::TempDir::new().unwrap();
        let err = runner.export_results(&tmp.path().join("out.json")).unwrap_err();
        let eval_err = err.downcast_ref::<EvalError>().unwrap();
        assert!(matches!(eval_err, EvalError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_remote_detaches_and_calls_the_service() {
        let api = Arc::new(ScriptedApi::new(vec![]));
        let runner = Arc::new(runner_with(api.clone()));

        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_eval(params()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        runner.cancel_remote().await.unwrap();
        assert_eq!(api.cancel_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state(), RunState::Cancelled);

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, RunOutcome::Detached));
    }

    #[test]
    fn progress_pct_derivation() {
        assert_eq!(progress_pct(0, 0), 10.0);
        assert_eq!(progress_pct(5, 0), 10.0);
        assert_eq!(progress_pct(5, 10), 50.0);
        assert_eq!(progress_pct(15, 10), 100.0);
        assert_eq!(progress_pct(-1, 10), 0.0);
    }
}
