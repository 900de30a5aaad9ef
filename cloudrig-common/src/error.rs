use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudrigError {
    /// Read-only provider query failed.
    #[error("lookup of {resource} failed: {source}")]
    Lookup {
        resource: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Create / attach / tag call failed. No rollback is attempted.
    #[error("{step} failed: {source}")]
    Mutation {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    Precondition(String),

    #[error("{operation} did not complete within {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    /// A provider-side waiter reported an error.
    #[error("waiting for {condition} on {resource_id} failed: {source}")]
    WaitFailed {
        condition: &'static str,
        resource_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("command invocation {invocation_id} ended with status {status}")]
    CommandFailed {
        invocation_id: String,
        status: String,
        output: Option<String>,
    },

    /// Background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CloudrigError {
    pub fn lookup(resource: &'static str, source: anyhow::Error) -> Self {
        CloudrigError::Lookup { resource, source }
    }

    pub fn mutation(step: impl Into<String>, source: anyhow::Error) -> Self {
        CloudrigError::Mutation {
            step: step.into(),
            source,
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        CloudrigError::Precondition(msg.into())
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, CloudrigError::Precondition(_))
    }
}
