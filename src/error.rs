//! Typed errors for the extraction engine.
//!
//! The public surface is a closed set: callers match on these variants to
//! decide between a 400-class response, an "already imported" message, and a
//! retryable failure. Internal strategy plumbing uses `anyhow` and is folded
//! into `StrategyExhausted` by the orchestrator.

use std::collections::BTreeSet;
use thiserror::Error;

/// Errors surfaced to the caller of [`crate::orchestrator::FormExtractor`].
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The input is not an absolute http(s) URL.
    #[error("invalid form URL: {url}")]
    InvalidSourceUrl { url: String },

    /// A prior import with the same source id already exists.
    #[error("form already imported: {source_id}")]
    AlreadyImported { source_id: String },

    /// Every strategy failed, or the last one itself threw.
    /// Carries the warnings accumulated across all attempts.
    #[error("all extraction strategies failed for {url}")]
    StrategyExhausted {
        url: String,
        warnings: BTreeSet<String>,
    },

    /// The duplicate-check collaborator failed. The check is mandatory
    /// whenever a source id was derived, so this cannot be swallowed.
    #[error("duplicate lookup failed: {0}")]
    Lookup(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The caller cancelled the extraction.
    #[error("extraction cancelled")]
    Cancelled,
}

/// How a single strategy came up short. Recoverable by design: the
/// orchestrator logs these and moves to the next strategy.
#[derive(Debug)]
pub(crate) enum StrategyFailure {
    /// The browser runtime could not be launched in this environment.
    /// Triggers a silent fallback to static fetch, never surfaced.
    AutomationUnavailable(anyhow::Error),

    /// The strategy ran and produced zero questions.
    Empty,

    /// The strategy threw.
    Failed(anyhow::Error),
}

impl StrategyFailure {
    /// One-line form recorded into `diagnostics.warnings`.
    pub(crate) fn warning(&self, strategy: &str) -> String {
        match self {
            StrategyFailure::AutomationUnavailable(e) => {
                format!("{strategy}: browser unavailable ({e})")
            }
            StrategyFailure::Empty => format!("{strategy}: no questions recovered"),
            StrategyFailure::Failed(e) => format!("{strategy}: {e}"),
        }
    }
}

/// Result alias for the public extraction API.
pub type Result<T> = std::result::Result<T, ExtractError>;
