use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

//
// ─── QUESTION TYPES ────────────────────────────────────────────────────────────
//

/// Unvalidated question as delivered by the question-set provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

/// Unvalidated question set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuestionSetDraft {
    pub topic: Option<String>,
    pub questions: Vec<QuestionDraft>,
}

/// A multiple-choice question whose correct answer is one of its options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    prompt: String,
    options: Vec<String>,
    correct_answer: String,
}

/// Ordered, immutable set of questions for one session.
///
/// Prompts are unique within a set, so they can key the learner's answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSet {
    topic: Option<String>,
    questions: Vec<Question>,
}

//
// ─── VALIDATION ERRORS ─────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionSetError {
    #[error("question set contains no questions")]
    Empty,

    #[error("question {prompt:?} has no options")]
    NoOptions { prompt: String },

    #[error("correct answer of question {prompt:?} is not one of its options")]
    MissingCorrectAnswer { prompt: String },

    #[error("question {prompt:?} appears more than once")]
    DuplicatePrompt { prompt: String },
}

//
// ─── DRAFT IMPL ────────────────────────────────────────────────────────────────
//

impl QuestionDraft {
    pub fn new<I, S>(prompt: impl Into<String>, options: I, correct_answer: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prompt: prompt.into(),
            options: options.into_iter().map(Into::into).collect(),
            correct_answer: correct_answer.into(),
        }
    }

    fn validate(self) -> Result<Question, QuestionSetError> {
        if self.options.is_empty() {
            return Err(QuestionSetError::NoOptions {
                prompt: self.prompt,
            });
        }
        if !self.options.contains(&self.correct_answer) {
            return Err(QuestionSetError::MissingCorrectAnswer {
                prompt: self.prompt,
            });
        }

        Ok(Question {
            prompt: self.prompt,
            options: self.options,
            correct_answer: self.correct_answer,
        })
    }
}

impl QuestionSetDraft {
    pub fn new(topic: Option<String>, questions: Vec<QuestionDraft>) -> Self {
        Self { topic, questions }
    }

    /// Validate the payload into a usable question set.
    ///
    /// # Errors
    ///
    /// Returns `QuestionSetError` if the set is empty, a question has no options,
    /// a correct answer is not among its options, or a prompt repeats.
    pub fn validate(self) -> Result<QuestionSet, QuestionSetError> {
        if self.questions.is_empty() {
            return Err(QuestionSetError::Empty);
        }

        let mut seen = HashSet::with_capacity(self.questions.len());
        let mut questions = Vec::with_capacity(self.questions.len());
        for draft in self.questions {
            if !seen.insert(draft.prompt.clone()) {
                return Err(QuestionSetError::DuplicatePrompt {
                    prompt: draft.prompt,
                });
            }
            questions.push(draft.validate()?);
        }

        Ok(QuestionSet {
            topic: self.topic,
            questions,
        })
    }
}

//
// ─── ACCESSORS ─────────────────────────────────────────────────────────────────
//

impl Question {
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn correct_answer(&self) -> &str {
        &self.correct_answer
    }

    #[must_use]
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|candidate| candidate == option)
    }
}

impl QuestionSet {
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Always false for a validated set; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn question(&self, prompt: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.prompt == prompt)
    }

    /// Prompt → correct option for every question.
    #[must_use]
    pub fn answer_key(&self) -> BTreeMap<String, String> {
        self.questions
            .iter()
            .map(|q| (q.prompt.clone(), q.correct_answer.clone()))
            .collect()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
