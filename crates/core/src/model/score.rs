use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ScoreError {
    #[error("score {0} is outside 0..=100")]
    OutOfRange(i64),

    #[error("score {0} is not a finite percentage")]
    NotFinite(f64),
}

/// Integer percentage of correct answers, computed by the scoring service.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Score(u8);

impl Score {
    pub const MAX: u8 = 100;

    /// # Errors
    ///
    /// Returns `ScoreError::OutOfRange` unless `value` is within `0..=100`.
    pub fn new(value: i64) -> Result<Self, ScoreError> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= Self::MAX)
            .map(Self)
            .ok_or(ScoreError::OutOfRange(value))
    }

    /// Round a fractional percentage (as stored in quiz history) to a score.
    ///
    /// # Errors
    ///
    /// Returns `ScoreError` for non-finite or out-of-range values.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_percentage(value: f64) -> Result<Self, ScoreError> {
        if !value.is_finite() {
            return Err(ScoreError::NotFinite(value));
        }
        Self::new(value.round() as i64)
    }

    #[must_use]
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Debug for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Score({})", self.0)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
