//! Error types for the scroller.
//!
//! Settings never produce errors: malformed values fall back to defaults (see
//! [`crate::Settings::normalize`]). Only datasource contract violations are fatal, and only at
//! attach time.

/// Prefix carried by every [`DatasourceError`] message.
pub const INVALID_DATASOURCE_PREFIX: &str = "invalid datasource:";

/// A datasource violated its contract when it was attached to a workflow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatasourceError {
    /// The datasource has no `get` function.
    #[error("{prefix} `get` is not provided", prefix = INVALID_DATASOURCE_PREFIX)]
    MissingGet,

    /// `get` must accept at least `index` and `count`.
    #[error(
        "{prefix} `get` must accept at least 2 parameters (index, count), got {params}",
        prefix = INVALID_DATASOURCE_PREFIX
    )]
    GetArity { params: usize },

    /// The datasource factory failed to produce a datasource.
    #[error("{prefix} datasource is not constructible: {0}", prefix = INVALID_DATASOURCE_PREFIX)]
    NotConstructible(String),
}

/// A single fetch failed. The cycle that issued it is aborted; nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("datasource fetch failed: {0}")]
    Failed(String),

    /// The completion handle of a callback-style getter was dropped without being resolved.
    #[error("datasource dropped the completion handle without resolving it")]
    Abandoned,
}

impl FetchError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors surfaced by [`crate::Workflow`] to its host.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The host reported a different number of measurements than items it was asked to render.
    #[error("render report has {got} sizes, expected {expected}")]
    RenderMismatch { expected: usize, got: usize },

    #[error("workflow is not initialized")]
    NotInitialized,

    #[error("workflow is disposed")]
    Disposed,
}

pub type Result<T, E = WorkflowError> = core::result::Result<T, E>;
