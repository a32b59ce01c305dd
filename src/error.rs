// src/error.rs
use thiserror::Error;

/// A fatal error: the run stops and nothing further is dispatched.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }

    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) => 2,
            _ => 1,
        }
    }
}

/// A failure confined to one input document. It ends up in the error report
/// and never stops the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Transform(String),

    #[error("{0}")]
    Io(String),
}

impl ItemError {
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::Parse(_) => "parse",
            ItemError::Transform(_) => "transform",
            ItemError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for ItemError {
    fn from(e: std::io::Error) -> Self {
        ItemError::Io(e.to_string())
    }
}
