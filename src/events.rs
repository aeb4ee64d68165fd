//! Typed run lifecycle events and reporters.
//!
//! The runner publishes [`EvalEvent`]s through an [`EventBus`] of injected
//! [`EventSink`]s, so observers (progress bars, scripts, tests) follow a run
//! without polling and without any global mutable state. Reporters write to
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::sync::RwLock;

/// A single lifecycle event published by the runner.
#[derive(Clone, Debug)]
pub enum EvalEvent {
    /// The run was accepted by the service and polling is about to begin.
    Started { use_multi: bool, final_k: i64 },
    /// One poll tick while the job is running. `pct` is derived and clamped
    /// to `[0, 100]`.
    Progress { pct: f64, progress: i64, total: i64 },
    /// The job finished and the full result was fetched and committed.
    Completed {
        run_id: String,
        total: i64,
        top1_hits: i64,
        topk_hits: i64,
        duration_secs: f64,
    },
    /// The run failed; no result was committed.
    Failed { message: String },
    /// Local observation was detached by `stop_eval`.
    Cancelled,
}

/// Receives run lifecycle events. Implementations must not block.
pub trait EventSink: Send + Sync {
    /// Handle one event. Called from the runner's poll loop.
    fn publish(&self, event: &EvalEvent);
}

/// Fan-out registry of event sinks, owned by the runner.
///
/// Subscription is explicit and injected; there is no ambient global
/// dispatch. Sinks are notified in subscription order.
pub struct EventBus {
    sinks: RwLock<Vec<Box<dyn EventSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Register a sink to receive all subsequent events.
    pub fn subscribe(&self, sink: Box<dyn EventSink>) {
        self.sinks.write().unwrap().push(sink);
    }

    /// Publish an event to every registered sink.
    pub fn publish(&self, event: &EvalEvent) {
        for sink in self.sinks.read().unwrap().iter() {
            sink.publish(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-friendly progress on stderr: "eval  running  42% (126 / 300)".
pub struct StderrReporter;

impl EventSink for StderrReporter {
    fn publish(&self, event: &EvalEvent) {
        let line = match event {
            EvalEvent::Started { use_multi, final_k } => format!(
                "eval  started  ({}, k={})\n",
                if *use_multi { "multi" } else { "single" },
                final_k
            ),
            EvalEvent::Progress {
                pct,
                progress,
                total,
            } => format!("eval  running  {:.0}% ({} / {})\n", pct, progress, total),
            EvalEvent::Completed {
                run_id,
                total,
                topk_hits,
                duration_secs,
                ..
            } => format!(
                "eval  complete  run {}  topk {} / {} in {:.1}s\n",
                run_id, topk_hits, total, duration_secs
            ),
            EvalEvent::Failed { message } => format!("eval  failed  {}\n", message),
            EvalEvent::Cancelled => "eval  cancelled\n".to_string(),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable events: one JSON object per line on stderr.
pub struct JsonReporter;

impl EventSink for JsonReporter {
    fn publish(&self, event: &EvalEvent) {
        let obj = match event {
            EvalEvent::Started { use_multi, final_k } => serde_json::json!({
                "event": "started",
                "use_multi": use_multi,
                "final_k": final_k
            }),
            EvalEvent::Progress {
                pct,
                progress,
                total,
            } => serde_json::json!({
                "event": "progress",
                "pct": pct,
                "progress": progress,
                "total": total
            }),
            EvalEvent::Completed {
                run_id,
                total,
                top1_hits,
                topk_hits,
                duration_secs,
            } => serde_json::json!({
                "event": "complete",
                "run_id": run_id,
                "total": total,
                "top1_hits": top1_hits,
                "topk_hits": topk_hits,
                "duration_secs": duration_secs
            }),
            EvalEvent::Failed { message } => serde_json::json!({
                "event": "failed",
                "message": message
            }),
            EvalEvent::Cancelled => serde_json::json!({ "event": "cancelled" }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op sink when progress reporting is disabled.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &EvalEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a sink for this mode. Caller subscribes it on the runner's bus.
    pub fn reporter(&self) -> Box<dyn EventSink> {
        match self {
            ProgressMode::Off => Box::new(NullSink),
            ProgressMode::Human => Box::new(StderrReporter),
            ProgressMode::Json => Box::new(JsonReporter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Collecting(Arc<Mutex<Vec<String>>>);

    impl EventSink for Collecting {
        fn publish(&self, event: &EvalEvent) {
            let tag = match event {
                EvalEvent::Started { .. } => "started",
                EvalEvent::Progress { .. } => "progress",
                EvalEvent::Completed { .. } => "complete",
                EvalEvent::Failed { .. } => "failed",
                EvalEvent::Cancelled => "cancelled",
            };
            self.0.lock().unwrap().push(tag.to_string());
        }
    }

    #[test]
    fn bus_fans_out_in_subscription_order() {
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let bus = EventBus::new();
        bus.subscribe(Box::new(Collecting(seen_a.clone())));
        bus.subscribe(Box::new(Collecting(seen_b.clone())));

        bus.publish(&EvalEvent::Started {
            use_multi: false,
            final_k: 10,
        });
        bus.publish(&EvalEvent::Cancelled);

        assert_eq!(*seen_a.lock().unwrap(), vec!["started", "cancelled"]);
        assert_eq!(*seen_b.lock().unwrap(), vec!["started", "cancelled"]);
    }

    #[test]
    fn bus_with_no_sinks_is_silent() {
        let bus = EventBus::new();
        bus.publish(&EvalEvent::Cancelled);
    }
}
