// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;

/// A single invocation of an operation within a retried call.
///
/// Attempts are numbered from 1. The operation receives its attempt so it can, for example,
/// log the number or shorten its own timeout on the last try.
///
/// # Examples
///
/// ```
/// use bulwark::Attempt;
///
/// let attempt = Attempt::first(3);
/// assert_eq!(attempt.number(), 1);
/// assert!(!attempt.is_last());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    number: u32,
    is_last: bool,
}

impl Attempt {
    /// The first attempt of a call allowed `max_attempts` attempts in total.
    #[must_use]
    pub fn first(max_attempts: u32) -> Self {
        Self {
            number: 1,
            is_last: max_attempts <= 1,
        }
    }

    /// The 1-based attempt number.
    #[must_use]
    pub fn number(self) -> u32 {
        self.number
    }

    /// The 0-based attempt index, as reported to telemetry.
    #[must_use]
    pub fn index(self) -> u32 {
        self.number.saturating_sub(1)
    }

    /// Whether no further attempt will be made after this one.
    #[must_use]
    pub fn is_last(self) -> bool {
        self.is_last
    }

    /// The following attempt, or `None` when `max_attempts` is exhausted.
    #[must_use]
    pub fn next(self, max_attempts: u32) -> Option<Self> {
        if self.number >= max_attempts {
            return None;
        }

        let number = self.number.saturating_add(1);
        Some(Self {
            number,
            is_last: number >= max_attempts,
        })
    }
}

impl Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_attempt_is_first_and_last() {
        let attempt = Attempt::first(1);

        assert_eq!(attempt.number(), 1);
        assert_eq!(attempt.index(), 0);
        assert!(attempt.is_last());
        assert_eq!(attempt.next(1), None);
    }

    #[test]
    fn walks_to_the_last_attempt() {
        let first = Attempt::first(3);
        let second = first.next(3).unwrap();
        let third = second.next(3).unwrap();

        assert!(!second.is_last());
        assert_eq!(third.number(), 3);
        assert!(third.is_last());
        assert_eq!(third.next(3), None);
        assert_eq!(third.to_string(), "3");
    }
}
