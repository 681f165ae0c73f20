//! Errors the engine hands back to the orchestrator.
//!
//! Failures inside a running loop (a bad job, a full recipient mailbox) are
//! contained in the stage thread and only logged; they never show up here.

/// Errors surfaced by stage wiring and lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Invalid wiring, reported before any thread starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The `on_starting` hook failed; the stage never served a job.
    #[error("stage {stage} failed to start: {source:#}")]
    Startup {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not spawn thread for stage {stage}: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    /// The loop thread died outside of the processor's isolation.
    #[error("thread of stage {stage} panicked")]
    Panicked { stage: String },
}

impl StageError {
    pub fn configuration(message: impl Into<String>) -> Self {
        StageError::Configuration(message.into())
    }
}
