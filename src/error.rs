//! Error taxonomy for the evaluation client.
//!
//! Library modules return [`EvalError`] so callers can distinguish a
//! transport failure from a remote job failure, a rejected request, or a
//! missing resource. The CLI boundary wraps these in `anyhow` for display.
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | [`EvalError::Network`] | request failed to deliver or timed out |
//! | [`EvalError::Job`] | the remote job failed or answered with garbage |
//! | [`EvalError::Validation`] | malformed parameters or rejected admission |
//! | [`EvalError::NotFound`] | no baseline / no run at id / no entry at index |

use thiserror::Error;

/// Error type shared by the API client, runner, and history store.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The request could not be delivered or timed out. The message includes
    /// the likely causes so the CLI can surface them directly.
    #[error("network error: {0} (is the service up, and [service].base_url correct?)")]
    Network(String),

    /// The remote job reported failure, or a response violated the API
    /// contract (e.g. a start that was not accepted, inconsistent counters).
    #[error("eval job error: {0}")]
    Job(String),

    /// Malformed run parameters, or an operation rejected by the local
    /// state machine (e.g. starting a run while one is active).
    #[error("invalid request: {0}")]
    Validation(String),

    /// A referenced baseline, run, or history entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, EvalError>;

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EvalError::Network(format!("request timed out: {}", err))
        } else {
            EvalError::Network(err.to_string())
        }
    }
}
