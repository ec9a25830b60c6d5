//! Shared error types for the services crate.

use std::sync::Arc;

use thiserror::Error;

use learn_core::model::{ScoreError, SessionStateError, StateKind};

/// Errors emitted by a `QuizApi` implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("credential rejected by the API")]
    Unauthorized,
    #[error("request failed with status {0}: {1}")]
    Status(reqwest::StatusCode, String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("response body could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// The credential was invalid or expired.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// The server answered, but not with the agreed shape.
    #[must_use]
    pub fn is_invalid_payload(&self) -> bool {
        matches!(self, ApiError::Decode(_))
    }
}

/// Why a submission did not produce a score.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionFailure {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("scoring service returned an unusable score: {0}")]
    Score(#[from] ScoreError),
}

/// Errors surfaced by `QuizController`.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum QuizError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("question set is unusable: {0}")]
    InvalidPayload(String),
    #[error("fetching the quiz failed (attempt {attempts})")]
    TransientFetch {
        attempts: u32,
        #[source]
        source: Arc<ApiError>,
    },
    #[error("quiz could not be loaded after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
    #[error("only {answered} of {total} questions answered")]
    IncompleteSubmission { answered: usize, total: usize },
    #[error("submitting answers failed")]
    SubmissionFailed(#[source] Arc<SubmissionFailure>),
    #[error("quiz session is {state}")]
    NotActive { state: StateKind },
    #[error("no question {prompt:?} in this quiz")]
    UnknownQuestion { prompt: String },
    #[error("{option:?} is not an option of question {prompt:?}")]
    UnknownOption { prompt: String, option: String },
    #[error("quiz session was superseded")]
    Superseded,
    #[error(transparent)]
    State(SessionStateError),
}

impl From<SessionStateError> for QuizError {
    fn from(err: SessionStateError) -> Self {
        match err {
            SessionStateError::UnexpectedState { actual, .. } => QuizError::NotActive { state: actual },
            SessionStateError::UnknownQuestion { prompt } => QuizError::UnknownQuestion { prompt },
            SessionStateError::UnknownOption { prompt, option } => {
                QuizError::UnknownOption { prompt, option }
            }
            SessionStateError::Incomplete { answered, total } => {
                QuizError::IncompleteSubmission { answered, total }
            }
            SessionStateError::InvalidPayload(err) => QuizError::InvalidPayload(err.to_string()),
            other => QuizError::State(other),
        }
    }
}

impl From<SubmissionFailure> for QuizError {
    fn from(failure: SubmissionFailure) -> Self {
        QuizError::SubmissionFailed(Arc::new(failure))
    }
}

/// Errors emitted while building API configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid API base URL {raw:?}: {source}")]
    InvalidBaseUrl {
        raw: String,
        #[source]
        source: url::ParseError,
    },
    #[error("API base URL must use http or https: {0}")]
    UnsupportedScheme(String),
    #[error("invalid request timeout {0:?}, expected a positive number of seconds")]
    InvalidTimeout(String),
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}
