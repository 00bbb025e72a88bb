use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Failure cases shared across the storage, pipeline, and transport layers.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The caller is not a member of the conversation they addressed.
    #[error("access denied")]
    AccessDenied,

    /// The caller is a member but lacks the role the operation requires.
    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Validation(String),

    /// The backing store refused the write in a way that is safe to retry.
    #[error("storage busy: {0}")]
    TransientStore(String),

    #[error("enrichment unavailable")]
    EnrichmentUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    /// True when retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::TransientStore(_))
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal(format!("{err:#}"))
    }
}
