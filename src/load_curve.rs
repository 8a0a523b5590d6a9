//! The load curve: an ordered sequence of target concurrency levels held for
//! a fixed step duration each.
//!
//! [`LoadCurve`] is pure data. It does not own a timer and does not validate
//! monotonicity — advancing through the curve and rejecting a negative delta
//! is the fleet controller's job (see [`crate::fleet`]), since a decreasing
//! curve is a programmer error rather than a malformed user input.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while parsing a load curve from its CLI/file representation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LoadCurveError {
    /// Raised when the comma-separated level list is empty.
    #[error("load curve must contain at least one level")]
    Empty,
    /// Raised when a level is not a positive integer.
    #[error("invalid load level {value:?}: {message}")]
    InvalidLevel {
        /// The offending token from the input.
        value: String,
        /// Human-readable description of why it was rejected.
        message: String,
    },
    /// Raised when the step duration is not strictly positive.
    #[error("step duration must be greater than zero")]
    NonPositiveStep,
}

/// An ordered sequence of target concurrency levels, held for `step_size`
/// each before advancing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadCurve {
    levels: Vec<u32>,
    step_size: Duration,
}

impl LoadCurve {
    /// Builds a curve from already-parsed levels and a step duration.
    ///
    /// # Errors
    ///
    /// Returns [`LoadCurveError::Empty`] when `levels` is empty, or
    /// [`LoadCurveError::NonPositiveStep`] when `step_size` is zero.
    pub fn new(levels: Vec<u32>, step_size: Duration) -> Result<Self, LoadCurveError> {
        if levels.is_empty() {
            return Err(LoadCurveError::Empty);
        }
        if step_size.is_zero() {
            return Err(LoadCurveError::NonPositiveStep);
        }
        Ok(Self { levels, step_size })
    }

    /// Parses the CLI form `n1,n2,...` into a curve with the given step size.
    ///
    /// # Errors
    ///
    /// Returns [`LoadCurveError::Empty`] for an empty string, or
    /// [`LoadCurveError::InvalidLevel`] when a token is not a positive
    /// integer.
    pub fn parse(csv: &str, step_size: Duration) -> Result<Self, LoadCurveError> {
        let trimmed = csv.trim();
        if trimmed.is_empty() {
            return Err(LoadCurveError::Empty);
        }

        let levels = trimmed
            .split(',')
            .map(|token| {
                let token = token.trim();
                token.parse::<u32>().map_err(|err| LoadCurveError::InvalidLevel {
                    value: token.to_owned(),
                    message: err.to_string(),
                })
            })
            .collect::<Result<Vec<u32>, LoadCurveError>>()?;

        Self::new(levels, step_size)
    }

    /// Returns the ordered levels.
    #[must_use]
    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    /// Returns the per-step hold duration.
    #[must_use]
    pub const fn step_size(&self) -> Duration {
        self.step_size
    }

    /// Returns the highest level reached by the curve.
    ///
    /// # Panics
    ///
    /// Never panics: construction guarantees at least one level.
    #[must_use]
    pub fn max_level(&self) -> u32 {
        self.levels.iter().copied().max().unwrap_or(0)
    }

    /// Returns the run-wide deadline: `(steps + 1) * step_size`, where the
    /// extra step is a grace period for in-flight tear-down.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        let steps = u32::try_from(self.levels.len()).unwrap_or(u32::MAX);
        self.step_size.saturating_mul(steps.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("10,20,40,80", &[10, 20, 40, 80])]
    #[case(" 1 , 2 ", &[1, 2])]
    #[case("5", &[5])]
    fn parse_accepts_valid_csv(#[case] input: &str, #[case] expected: &[u32]) {
        let curve = LoadCurve::parse(input, Duration::from_secs(1)).expect("should parse");
        assert_eq!(curve.levels(), expected);
    }

    #[test]
    fn parse_rejects_empty_input() {
        let err = LoadCurve::parse("", Duration::from_secs(1)).expect_err("empty should fail");
        assert_eq!(err, LoadCurveError::Empty);
    }

    #[test]
    fn parse_rejects_non_integer_tokens() {
        let err =
            LoadCurve::parse("10,abc", Duration::from_secs(1)).expect_err("abc should fail");
        assert!(matches!(err, LoadCurveError::InvalidLevel { .. }));
    }

    #[test]
    fn new_rejects_zero_step_size() {
        let err = LoadCurve::new(vec![1], Duration::ZERO).expect_err("zero step should fail");
        assert_eq!(err, LoadCurveError::NonPositiveStep);
    }

    #[test]
    fn deadline_adds_one_grace_step() {
        let curve = LoadCurve::new(vec![1, 2, 3], Duration::from_secs(10)).expect("valid");
        assert_eq!(curve.deadline(), Duration::from_secs(40));
    }

    #[test]
    fn max_level_returns_highest_entry() {
        let curve = LoadCurve::new(vec![5, 20, 3], Duration::from_secs(1)).expect("valid");
        assert_eq!(curve.max_level(), 20);
    }
}
