//! Error taxonomy for the engine.
//!
//! Per-attempt failures inside the executor cascade and per-delta failures in
//! the discovery loop are absorbed where they occur; only whole-operation
//! failures reach the caller.

use crate::resolver::Suggestion;

/// Result type for testpilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can surface from the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The browser driver is gone. Fatal to the current instruction, not to
    /// the session — no fallback cascade is attempted.
    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    /// No element matched a selector. Retryable inside the executor cascade;
    /// surfaced only after cascade exhaustion.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// A remote AI call failed. Always recovered locally — callers fall back
    /// to heuristic behavior and this never fails an instruction on its own.
    #[error("remote analysis failed: {0}")]
    RemoteAnalysisFailed(String),

    /// A bounded wait elapsed without the awaited condition.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The resolver found nothing above the minimum confidence. Carries the
    /// best-effort suggestion list so the caller can prompt for clarification.
    #[error("instruction ambiguous: no suggestion above the confidence floor")]
    InstructionAmbiguous { suggestions: Vec<Suggestion> },

    /// An instruction arrived while another was executing.
    #[error("engine busy: an instruction is already in flight")]
    Busy,

    /// A browser action failed in a non-retryable way.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// Invalid engine configuration.
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Any other driver-level failure.
    #[error("driver error: {0}")]
    Driver(String),
}

impl Error {
    /// Whether this error must short-circuit the executor cascade.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DriverUnavailable(_))
    }
}
