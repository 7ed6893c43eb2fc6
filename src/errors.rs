use std::borrow::Cow;

/// An error occurred while trying to enqueue a batch.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// An error occurred while serializing the batch payload
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    /// An error occurred while inserting the batch into the database
    #[error(transparent)]
    DatabaseError(#[from] sqlx::Error),
}

/// A failure reported by a handler.
///
/// The dispatcher retries [`Retryable`](Self::Retryable) failures up to the
/// per-type limit with exponential backoff. [`Permanent`](Self::Permanent)
/// failures skip the remaining retries and park the batch in the
/// dead-letter table immediately.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Transient failure: network timeout, upstream 5xx, rate-limit 429.
    #[error(transparent)]
    Retryable(#[from] anyhow::Error),

    /// Permanent failure: upstream 4xx (other than 429), schema violation,
    /// missing entity.
    #[error("{0}")]
    Permanent(Cow<'static, str>),
}

impl HandlerError {
    /// Shorthand for a permanent failure with a fixed message.
    pub fn permanent(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether the dispatcher may retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl From<reqwest::Error> for HandlerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Permanent(format!("response decoding failed: {error}").into())
        } else {
            Self::Retryable(error.into())
        }
    }
}

impl From<sqlx::Error> for HandlerError {
    fn from(error: sqlx::Error) -> Self {
        Self::Retryable(error.into())
    }
}

impl From<EnqueueError> for HandlerError {
    fn from(error: EnqueueError) -> Self {
        match error {
            EnqueueError::SerializationError(e) => {
                Self::Permanent(format!("payload serialization failed: {e}").into())
            }
            EnqueueError::DatabaseError(e) => Self::Retryable(e.into()),
        }
    }
}
