#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod quiz;

pub use api::{HttpQuizApi, QuizApi};
pub use config::ApiConfig;
pub use error::{ApiError, ConfigError, QuizError, SubmissionFailure};
pub use quiz::{QuizController, RetryPolicy, SessionSnapshot};
