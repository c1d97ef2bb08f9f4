use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoryError {
    /// The operation was refused before anything was attempted.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The backend answered but the request failed.
    #[error("backend error: {0}")]
    Transport(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoryError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        StoryError::NotFound(msg.into())
    }

    /// Transport failures can be retried by the user; everything else needs a
    /// different input first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoryError::Transport(_) | StoryError::Network(_))
    }

    /// Message suitable for an inline error or a toast.
    pub fn user_message(&self) -> String {
        match self {
            StoryError::Validation(msg) => msg.clone(),
            StoryError::NotFound(msg) => format!("{msg} no longer exists"),
            StoryError::Transport(_) | StoryError::Network(_) => {
                "Could not reach the story server. Please try again.".to_string()
            }
            StoryError::Url(_) | StoryError::Io(_) | StoryError::Serialization(_) => {
                "Something went wrong while handling story data.".to_string()
            }
        }
    }
}

pub type StoryResult<T> = Result<T, StoryError>;
