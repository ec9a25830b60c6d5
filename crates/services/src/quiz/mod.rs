mod controller;
mod retry;

// Public API of the quiz subsystem.
pub use crate::error::QuizError;
pub use controller::{QuizController, SessionSnapshot};
pub use retry::RetryPolicy;
