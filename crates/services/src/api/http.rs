use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use learn_core::model::{QuestionDraft, QuestionSetDraft, QuizResult, Score, Submission};
use storage::BearerToken;

use super::QuizApi;
use crate::config::ApiConfig;
use crate::error::{ApiError, ConfigError};

const QUESTION_SET_PATH: &str = "generate_quiz";
const SCORE_PATH: &str = "check_answers";
const HISTORY_PATH: &str = "quiz_history";

/// `QuizApi` over the learning platform's JSON endpoints.
#[derive(Clone)]
pub struct HttpQuizApi {
    client: Client,
    config: ApiConfig,
}

impl HttpQuizApi {
    /// # Errors
    ///
    /// Returns `ConfigError::Client` if the HTTP client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self, ConfigError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("API rejected the credential");
            return Err(ApiError::Unauthorized);
        }

        let body = response.text().await?;
        if !status.is_success() {
            warn!(%status, "API request failed");
            return Err(ApiError::Status(status, body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl QuizApi for HttpQuizApi {
    async fn fetch_question_set(&self, token: &BearerToken) -> Result<QuestionSetDraft, ApiError> {
        let url = self.config.endpoint(QUESTION_SET_PATH)?;
        debug!(%url, "fetching question set");
        let payload: QuizPayload = self
            .send_json(self.client.get(url).bearer_auth(token.expose()))
            .await?;
        Ok(payload.into_draft())
    }

    async fn score(&self, token: &BearerToken, submission: &Submission) -> Result<f64, ApiError> {
        let url = self.config.endpoint(SCORE_PATH)?;
        debug!(%url, answers = submission.answers.len(), "submitting answers");
        let payload: ScorePayload = self
            .send_json(
                self.client
                    .post(url)
                    .bearer_auth(token.expose())
                    .json(submission),
            )
            .await?;
        Ok(payload.score)
    }

    async fn quiz_history(&self, token: &BearerToken) -> Result<Vec<QuizResult>, ApiError> {
        let url = self.config.endpoint(HISTORY_PATH)?;
        debug!(%url, "fetching quiz history");
        let entries: Vec<HistoryPayload> = self
            .send_json(self.client.get(url).bearer_auth(token.expose()))
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(HistoryPayload::into_result)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct QuizPayload {
    #[serde(default)]
    topic: Option<String>,
    questions: Vec<QuestionPayload>,
}

#[derive(Debug, Deserialize)]
struct QuestionPayload {
    question: String,
    options: Vec<String>,
    correct_answer: String,
}

impl QuizPayload {
    fn into_draft(self) -> QuestionSetDraft {
        QuestionSetDraft::new(
            self.topic,
            self.questions
                .into_iter()
                .map(|q| QuestionDraft::new(q.question, q.options, q.correct_answer))
                .collect(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct ScorePayload {
    score: f64,
}

/// History documents are loosely shaped; every field is optional.
#[derive(Debug, Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    total_questions: Option<u32>,
    #[serde(default)]
    correct_count: Option<u32>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl HistoryPayload {
    fn into_result(self) -> Option<QuizResult> {
        let score = match Score::from_percentage(self.score?) {
            Ok(score) => score,
            Err(err) => {
                debug!(error = %err, "skipping history entry");
                return None;
            }
        };
        Some(QuizResult {
            score,
            total_questions: self.total_questions,
            correct_count: self.correct_count,
            taken_at: self.timestamp.as_deref().and_then(parse_timestamp),
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_timestamp_forms() {
        let rfc3339 = parse_timestamp("2023-11-14T22:13:20Z").unwrap();
        let rfc2822 = parse_timestamp("Tue, 14 Nov 2023 22:13:20 GMT").unwrap();
        assert_eq!(rfc3339, rfc2822);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn score_accepts_integer_and_fractional_percentages() {
        let whole: ScorePayload = serde_json::from_str(r#"{"score": 100}"#).unwrap();
        let fraction: ScorePayload = serde_json::from_str(r#"{"score": 66.67}"#).unwrap();
        assert!((whole.score - 100.0).abs() < f64::EPSILON);
        assert!((fraction.score - 66.67).abs() < f64::EPSILON);
        assert!(serde_json::from_str::<ScorePayload>(r#"{"score": "high"}"#).is_err());
    }

    #[test]
    fn history_entry_without_score_is_skipped() {
        let entry: HistoryPayload = serde_json::from_str(r#"{"topic": "Rust"}"#).unwrap();
        assert!(entry.into_result().is_none());
    }
}
