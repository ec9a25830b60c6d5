use chrono::{DateTime, Utc};

use crate::model::Score;

/// One past quiz attempt as recorded by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizResult {
    pub score: Score,
    pub total_questions: Option<u32>,
    pub correct_count: Option<u32>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl QuizResult {
    #[must_use]
    pub fn new(score: Score) -> Self {
        Self {
            score,
            total_questions: None,
            correct_count: None,
            taken_at: None,
        }
    }

    #[must_use]
    pub fn with_counts(mut self, correct_count: u32, total_questions: u32) -> Self {
        self.correct_count = Some(correct_count);
        self.total_questions = Some(total_questions);
        self
    }

    #[must_use]
    pub fn with_taken_at(mut self, taken_at: DateTime<Utc>) -> Self {
        self.taken_at = Some(taken_at);
        self
    }
}

/// Sort newest first; entries without a timestamp go last, in their original order.
pub fn sort_newest_first(results: &mut [QuizResult]) {
    results.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
}
