//! Remote eval job API client.
//!
//! Defines the [`EvalApi`] trait — the seam between the run lifecycle and
//! the retrieval service — and [`HttpEvalApi`], the reqwest implementation.
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `POST` | `/eval/run` | start a benchmark job |
//! | `GET`  | `/eval/status` | poll job progress |
//! | `GET`  | `/eval/results` | fetch the full record of the latest run |
//! | `GET`  | `/eval/results/{run_id}` | fetch a historical run for drill-down |
//! | `POST` | `/eval/baseline/save` | persist the latest run as the baseline |
//! | `GET`  | `/eval/baseline/compare` | server-computed comparison vs baseline |
//! | `POST` | `/eval/cancel` | best-effort remote cancellation |
//!
//! # Retry Strategy
//!
//! Idempotent GETs retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The start POST is never retried — a retry could double-start a job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::error::{EvalError, Result};
use crate::models::{EvalRun, RunParams};

/// Request body for `POST /eval/run`.
#[derive(Debug, Clone, Serialize)]
pub struct StartRequest {
    pub use_multi: bool,
    pub final_k: i64,
}

impl From<RunParams> for StartRequest {
    fn from(params: RunParams) -> Self {
        Self {
            use_multi: params.use_multi,
            final_k: params.final_k,
        }
    }
}

/// Response body for `POST /eval/run`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StartResponse {
    #[serde(default)]
    pub accepted: bool,
}

/// Response body for `GET /eval/status`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    #[serde(default)]
    pub progress: i64,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OkResponse {
    #[serde(default)]
    ok: bool,
}

/// Abstract view of the remote eval job API.
///
/// The runner only talks to this trait, so tests can drive the full
/// lifecycle against an in-memory fake with scripted status sequences.
#[async_trait]
pub trait EvalApi: Send + Sync {
    /// Start a benchmark job with the given parameters.
    async fn start_run(&self, req: &StartRequest) -> Result<StartResponse>;

    /// Poll the job's progress.
    async fn status(&self) -> Result<StatusResponse>;

    /// Fetch the full record of the most recently completed run.
    async fn results(&self) -> Result<EvalRun>;

    /// Fetch a historical run by id, for drill-down comparison.
    async fn results_by_id(&self, run_id: &str) -> Result<EvalRun>;

    /// Persist the latest run server-side as the comparison baseline.
    async fn save_baseline(&self) -> Result<()>;

    /// Request the server-computed comparison against the stored baseline.
    /// The payload is opaque to this client.
    async fn compare_baseline(&self) -> Result<serde_json::Value>;

    /// Ask the service to cancel the running job. Best-effort.
    async fn cancel(&self) -> Result<()>;
}

/// HTTP implementation of [`EvalApi`] over reqwest.
pub struct HttpEvalApi {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpEvalApi {
    /// Build a client from the `[service]` config section.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            max_retries: config.max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET with retry on transient failures. Terminal statuses are mapped
    /// by [`check_status`]; the last transient error surfaces if all
    /// retries are exhausted.
    async fn get_with_retry(&self, path: &str, what: &str) -> Result<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.client.get(self.url(path)).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        last_err = Some(EvalError::Job(format!(
                            "{}: service error {}: {}",
                            what, status, body
                        )));
                        continue;
                    }
                    return check_status(response, what).await;
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EvalError::Network(format!("{}: request failed after retries", what))))
    }

    async fn post(&self, path: &str, what: &str) -> Result<reqwest::Response> {
        let response = self.client.post(self.url(path)).send().await?;
        check_status(response, what).await
    }
}

/// Map a non-success status to the error taxonomy: 404 → [`EvalError::NotFound`],
/// anything else non-2xx → [`EvalError::Job`] with the body text attached.
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        Err(EvalError::NotFound(format!("{}: {}", what, body_or(&body, "no such resource"))))
    } else {
        Err(EvalError::Job(format!("{}: HTTP {}: {}", what, status, body)))
    }
}

fn body_or<'a>(body: &'a str, fallback: &'a str) -> &'a str {
    if body.trim().is_empty() {
        fallback
    } else {
        body
    }
}

#[async_trait]
impl EvalApi for HttpEvalApi {
    async fn start_run(&self, req: &StartRequest) -> Result<StartResponse> {
        // Deliberately unretried: a duplicate POST could double-start a job.
        let response = self
            .client
            .post(self.url("/eval/run"))
            .json(req)
            .send()
            .await?;
        let response = check_status(response, "start eval run").await?;
        let parsed: StartResponse = response
            .json()
            .await
            .map_err(|e| EvalError::Job(format!("start eval run: malformed response: {}", e)))?;
        Ok(parsed)
    }

    async fn status(&self) -> Result<StatusResponse> {
        let response = self.get_with_retry("/eval/status", "poll eval status").await?;
        response
            .json()
            .await
            .map_err(|e| EvalError::Job(format!("poll eval status: malformed response: {}", e)))
    }

    async fn results(&self) -> Result<EvalRun> {
        let response = self.get_with_retry("/eval/results", "fetch eval results").await?;
        response
            .json()
            .await
            .map_err(|e| EvalError::Job(format!("fetch eval results: malformed response: {}", e)))
    }

    async fn results_by_id(&self, run_id: &str) -> Result<EvalRun> {
        let path = format!("/eval/results/{}", run_id);
        let what = format!("fetch run {}", run_id);
        let response = self.get_with_retry(&path, &what).await?;
        response
            .json()
            .await
            .map_err(|e| EvalError::Job(format!("{}: malformed response: {}", what, e)))
    }

    async fn save_baseline(&self) -> Result<()> {
        let response = self.post("/eval/baseline/save", "save baseline").await?;
        let parsed: OkResponse = response
            .json()
            .await
            .map_err(|e| EvalError::Job(format!("save baseline: malformed response: {}", e)))?;
        if !parsed.ok {
            return Err(EvalError::Job(
                "save baseline: service did not acknowledge".to_string(),
            ));
        }
        Ok(())
    }

    async fn compare_baseline(&self) -> Result<serde_json::Value> {
        let response = self
            .get_with_retry("/eval/baseline/compare", "compare with baseline")
            .await?;
        response
            .json()
            .await
            .map_err(|e| EvalError::Job(format!("compare with baseline: malformed response: {}", e)))
    }

    async fn cancel(&self) -> Result<()> {
        self.post("/eval/cancel", "cancel eval run").await?;
        Ok(())
    }
}
