use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::QuestionSet;

/// The learner's choices, keyed by question prompt.
///
/// Answers are upserted: re-answering a question replaces the earlier choice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnswerSet {
    choices: BTreeMap<String, String>,
}

impl AnswerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `option` for `prompt`, returning the previous choice if there was one.
    pub fn upsert(&mut self, prompt: impl Into<String>, option: impl Into<String>) -> Option<String> {
        self.choices.insert(prompt.into(), option.into())
    }

    #[must_use]
    pub fn get(&self, prompt: &str) -> Option<&str> {
        self.choices.get(prompt).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.choices
            .iter()
            .map(|(prompt, option)| (prompt.as_str(), option.as_str()))
    }

    /// Progress of these answers against `questions`.
    #[must_use]
    pub fn progress(&self, questions: &QuestionSet) -> QuizProgress {
        let total = questions.len();
        let answered = self.choices.len().min(total);
        QuizProgress {
            total,
            answered,
            remaining: total - answered,
            is_complete: answered == total,
        }
    }

    pub(crate) fn to_map(&self) -> BTreeMap<String, String> {
        self.choices.clone()
    }
}

/// Aggregated view of quiz progress, useful for UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizProgress {
    pub total: usize,
    pub answered: usize,
    pub remaining: usize,
    pub is_complete: bool,
}

impl QuizProgress {
    /// `answered / total`, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn completion_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.answered as f64 / self.total as f64
    }
}

/// Body sent to the scoring service: the learner's answers plus the answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub answers: BTreeMap<String, String>,
    pub correct_answers: BTreeMap<String, String>,
}
