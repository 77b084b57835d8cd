//! Retry backoff for eventually-consistent metadata reads
//!
//! A freshly created topic is not immediately visible through the
//! cluster's metadata API. [`BackOff`] produces the delay sequence
//! used to ride out that window: an immediate first retry, then
//! exponentially growing delays, up to an attempt ceiling. Running
//! past the ceiling is a terminal failure, not a silent stop.

use crate::error::{OperatorError, Result};
use std::time::Duration;

/// Default number of attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Default delay of the second attempt; doubles on each attempt after
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(200);

/// An attempt counter with an increasing, attempt-capped delay sequence
///
/// With the defaults the sequence is 0ms, 200ms, 400ms, 800ms,
/// 1600ms, 3200ms, after which [`BackOff::delay`] fails with
/// [`OperatorError::MaxAttemptsExceeded`].
#[derive(Debug, Clone)]
pub struct BackOff {
    initial_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl BackOff {
    /// A backoff with the default delay sequence
    pub fn new() -> Self {
        Self::with_parameters(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS)
    }

    /// A backoff with a custom initial delay and attempt ceiling
    pub fn with_parameters(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// The delay to wait before the next attempt.
    ///
    /// The first call returns zero so the first retry is immediate.
    /// Fails once the attempt ceiling is passed.
    pub fn delay(&mut self) -> Result<Duration> {
        if self.attempt >= self.max_attempts {
            return Err(OperatorError::MaxAttemptsExceeded {
                attempts: self.max_attempts,
            });
        }
        let delay = if self.attempt == 0 {
            Duration::ZERO
        } else {
            self.initial_delay * 2u32.saturating_pow(self.attempt - 1)
        };
        self.attempt += 1;
        Ok(delay)
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for BackOff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_delay_sequence_increases() {
        let mut backoff = BackOff::new();
        let mut delays = Vec::new();
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            delays.push(backoff.delay().unwrap());
        }
        assert_eq!(delays[0], Duration::ZERO);
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[5], Duration::from_millis(3200));
        for pair in delays.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut backoff = BackOff::with_parameters(Duration::from_millis(1), 3);
        for _ in 0..3 {
            backoff.delay().unwrap();
        }
        assert_matches!(
            backoff.delay(),
            Err(OperatorError::MaxAttemptsExceeded { attempts: 3 })
        );
        // and stays exhausted
        assert!(backoff.delay().is_err());
        assert_eq!(backoff.attempts(), 3);
    }
}
