use std::fmt;

use thiserror::Error;

use crate::model::{AnswerSet, QuestionSet, QuestionSetDraft, QuestionSetError, QuizProgress, Score, Submission};

//
// ─── STATES ────────────────────────────────────────────────────────────────────
//

/// Why a session ended up in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// No credential, or the provider rejected it.
    Unauthenticated,
    /// The provider answered with a set that cannot be used.
    InvalidPayload,
    /// Transient fetch failures used up every attempt.
    MaxRetriesExceeded,
}

/// Discriminant of `SessionState`, for logging and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Loading,
    Failed,
    Active,
    Submitting,
    Scored,
}

/// Lifecycle of one quiz attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Loading {
        attempts: u32,
    },
    Failed {
        reason: FailureReason,
        attempts: u32,
    },
    Active {
        questions: QuestionSet,
        answers: AnswerSet,
    },
    Submitting {
        questions: QuestionSet,
        answers: AnswerSet,
    },
    Scored {
        questions: QuestionSet,
        answers: AnswerSet,
        score: Score,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("session is {actual}, expected {expected}")]
    UnexpectedState {
        expected: StateKind,
        actual: StateKind,
    },

    #[error("no question {prompt:?} in this session")]
    UnknownQuestion { prompt: String },

    #[error("{option:?} is not an option of question {prompt:?}")]
    UnknownOption { prompt: String, option: String },

    #[error("only {answered} of {total} questions answered")]
    Incomplete { answered: usize, total: usize },

    #[error(transparent)]
    InvalidPayload(#[from] QuestionSetError),
}

/// Outcome of recording a transient fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempts: u32 },
    GiveUp { attempts: u32 },
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Loading => "loading",
            StateKind::Failed => "failed",
            StateKind::Active => "active",
            StateKind::Submitting => "submitting",
            StateKind::Scored => "scored",
        };
        f.write_str(name)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::Unauthenticated => "not authenticated",
            FailureReason::InvalidPayload => "quiz could not be used",
            FailureReason::MaxRetriesExceeded => "quiz could not be loaded",
        };
        f.write_str(text)
    }
}

impl SessionState {
    #[must_use]
    pub fn kind(&self) -> StateKind {
        match self {
            SessionState::Loading { .. } => StateKind::Loading,
            SessionState::Failed { .. } => StateKind::Failed,
            SessionState::Active { .. } => StateKind::Active,
            SessionState::Submitting { .. } => StateKind::Submitting,
            SessionState::Scored { .. } => StateKind::Scored,
        }
    }

    /// True once the state no longer waits on the network.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(
            self,
            SessionState::Loading { .. } | SessionState::Submitting { .. }
        )
    }

    #[must_use]
    pub fn questions(&self) -> Option<&QuestionSet> {
        match self {
            SessionState::Active { questions, .. }
            | SessionState::Submitting { questions, .. }
            | SessionState::Scored { questions, .. } => Some(questions),
            SessionState::Loading { .. } | SessionState::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn answers(&self) -> Option<&AnswerSet> {
        match self {
            SessionState::Active { answers, .. }
            | SessionState::Submitting { answers, .. }
            | SessionState::Scored { answers, .. } => Some(answers),
            SessionState::Loading { .. } | SessionState::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn progress(&self) -> Option<QuizProgress> {
        match (self.questions(), self.answers()) {
            (Some(questions), Some(answers)) => Some(answers.progress(questions)),
            _ => None,
        }
    }

    #[must_use]
    pub fn score(&self) -> Option<Score> {
        match self {
            SessionState::Scored { score, .. } => Some(*score),
            _ => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<(FailureReason, u32)> {
        match self {
            SessionState::Failed { reason, attempts } => Some((*reason, *attempts)),
            _ => None,
        }
    }
}

//
// ─── STATE MACHINE ─────────────────────────────────────────────────────────────
//

/// Synchronous quiz session state machine.
///
/// Every transition either succeeds or returns an error with the state untouched,
/// except `load`, which moves to `Failed(InvalidPayload)` when the payload is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizSession {
    state: SessionState,
}

impl Default for QuizSession {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizSession {
    /// A fresh session waiting for its first question set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Loading { attempts: 0 },
        }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Discard questions, answers and score, and wait for a new question set.
    pub fn restart(&mut self) {
        self.state = SessionState::Loading { attempts: 0 };
    }

    /// Stop loading with `reason`, keeping the attempt count.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::UnexpectedState` unless the session is loading.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), SessionStateError> {
        let attempts = self.loading_attempts()?;
        self.state = SessionState::Failed { reason, attempts };
        Ok(())
    }

    /// Accept a fetched question set and start collecting answers.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::UnexpectedState` unless the session is loading, and
    /// `SessionStateError::InvalidPayload` (after moving to `Failed`) if validation fails.
    pub fn load(&mut self, draft: QuestionSetDraft) -> Result<(), SessionStateError> {
        let attempts = self.loading_attempts()?;
        match draft.validate() {
            Ok(questions) => {
                self.state = SessionState::Active {
                    questions,
                    answers: AnswerSet::new(),
                };
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Failed {
                    reason: FailureReason::InvalidPayload,
                    attempts,
                };
                Err(err.into())
            }
        }
    }

    /// Count a transient fetch failure; gives up once `max_attempts` is reached.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::UnexpectedState` unless the session is loading.
    pub fn record_transient_failure(
        &mut self,
        max_attempts: u32,
    ) -> Result<RetryDecision, SessionStateError> {
        let attempts = self.loading_attempts()?.saturating_add(1);
        if attempts >= max_attempts {
            self.state = SessionState::Failed {
                reason: FailureReason::MaxRetriesExceeded,
                attempts,
            };
            return Ok(RetryDecision::GiveUp { attempts });
        }
        self.state = SessionState::Loading { attempts };
        Ok(RetryDecision::Retry { attempts })
    }

    /// Choose `option` for the question identified by `prompt`.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError` if the session is not active, the question is unknown,
    /// or the option does not belong to the question.
    pub fn record_answer(
        &mut self,
        prompt: &str,
        option: &str,
    ) -> Result<QuizProgress, SessionStateError> {
        let actual = self.state.kind();
        let SessionState::Active { questions, answers } = &mut self.state else {
            return Err(SessionStateError::UnexpectedState {
                expected: StateKind::Active,
                actual,
            });
        };

        let question = questions
            .question(prompt)
            .ok_or_else(|| SessionStateError::UnknownQuestion {
                prompt: prompt.to_string(),
            })?;
        if !question.has_option(option) {
            return Err(SessionStateError::UnknownOption {
                prompt: prompt.to_string(),
                option: option.to_string(),
            });
        }

        answers.upsert(prompt, option);
        Ok(answers.progress(questions))
    }

    /// Lock the answers and build the scoring request.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::UnexpectedState` unless active, and
    /// `SessionStateError::Incomplete` unless every question is answered.
    pub fn begin_submit(&mut self) -> Result<Submission, SessionStateError> {
        let actual = self.state.kind();
        let SessionState::Active { questions, answers } = &self.state else {
            return Err(SessionStateError::UnexpectedState {
                expected: StateKind::Active,
                actual,
            });
        };

        let progress = answers.progress(questions);
        if !progress.is_complete {
            return Err(SessionStateError::Incomplete {
                answered: progress.answered,
                total: progress.total,
            });
        }

        let submission = Submission {
            answers: answers.to_map(),
            correct_answers: questions.answer_key(),
        };
        self.transition(|state| match state {
            SessionState::Active { questions, answers } => {
                SessionState::Submitting { questions, answers }
            }
            other => other,
        });
        Ok(submission)
    }

    /// Record the score returned for the in-flight submission.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::UnexpectedState` unless submitting.
    pub fn complete_submit(&mut self, score: Score) -> Result<(), SessionStateError> {
        self.expect(StateKind::Submitting)?;
        self.transition(|state| match state {
            SessionState::Submitting { questions, answers } => SessionState::Scored {
                questions,
                answers,
                score,
            },
            other => other,
        });
        Ok(())
    }

    /// Return to `Active` with answers preserved after a failed submission.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::UnexpectedState` unless submitting.
    pub fn abort_submit(&mut self) -> Result<(), SessionStateError> {
        self.expect(StateKind::Submitting)?;
        self.transition(|state| match state {
            SessionState::Submitting { questions, answers } => {
                SessionState::Active { questions, answers }
            }
            other => other,
        });
        Ok(())
    }

    fn loading_attempts(&self) -> Result<u32, SessionStateError> {
        match self.state {
            SessionState::Loading { attempts } => Ok(attempts),
            _ => Err(SessionStateError::UnexpectedState {
                expected: StateKind::Loading,
                actual: self.state.kind(),
            }),
        }
    }

    fn expect(&self, expected: StateKind) -> Result<(), SessionStateError> {
        let actual = self.state.kind();
        if actual == expected {
            Ok(())
        } else {
            Err(SessionStateError::UnexpectedState { expected, actual })
        }
    }

    fn transition(&mut self, f: impl FnOnce(SessionState) -> SessionState) {
        let current = std::mem::replace(&mut self.state, SessionState::Loading { attempts: 0 });
        self.state = f(current);
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
