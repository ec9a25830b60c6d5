mod http;

use async_trait::async_trait;

use learn_core::model::{QuestionSetDraft, QuizResult, Submission};
use storage::BearerToken;

use crate::error::ApiError;

pub use http::HttpQuizApi;

/// Remote collaborators of a quiz session.
#[async_trait]
pub trait QuizApi: Send + Sync {
    /// Request a freshly generated question set.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Unauthorized` if the credential is rejected, `ApiError::Decode`
    /// for a malformed body, and other variants for transport or server failures.
    async fn fetch_question_set(&self, token: &BearerToken) -> Result<QuestionSetDraft, ApiError>;

    /// Send the learner's answers with the answer key and return the raw percentage.
    ///
    /// The scoring service may answer with a fractional percentage (`66.67`).
    ///
    /// # Errors
    ///
    /// Returns `ApiError` if the request fails or the response cannot be decoded.
    async fn score(&self, token: &BearerToken, submission: &Submission) -> Result<f64, ApiError>;

    /// List the learner's past quiz results.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` if the request fails or the response cannot be decoded.
    async fn quiz_history(&self, token: &BearerToken) -> Result<Vec<QuizResult>, ApiError>;
}
