mod answers;
mod history;
mod ids;
mod question;
mod score;
mod session;

pub use answers::{AnswerSet, QuizProgress, Submission};
pub use history::{QuizResult, sort_newest_first};
pub use ids::SessionEpoch;
pub use question::{Question, QuestionDraft, QuestionSet, QuestionSetDraft, QuestionSetError};
pub use score::{Score, ScoreError};
pub use session::{
    FailureReason, QuizSession, RetryDecision, SessionState, SessionStateError, StateKind,
};
