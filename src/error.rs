use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server responded with {status}: {message}")]
    Status { status: u16, message: String },

    #[error("server returned a cached response (304) for attempt status")]
    NotModified,

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::NotModified => Some(304),
            ApiError::Transport(err) => err.status().map(|s| s.as_u16()),
            ApiError::Decode(_) => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt session file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("corrupt session value: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot load test session: {0}")]
    Load(String),

    #[error("an attempt is already in progress; finish it before starting a new one")]
    Conflict,

    #[error("test is not available: {0}")]
    Unavailable(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("invalid answer for question {question_id}: {reason}")]
    InvalidAnswer { question_id: u64, reason: String },

    #[error("answer the current question before continuing")]
    AnswerNotReady,

    #[error("no attempt is in progress")]
    NotInProgress,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("cannot determine a data directory; set EXAMRUN_STATE_DIR")]
    NoStateDir,
}
