// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Invalid retry or circuit breaker settings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// A retry policy must allow at least one attempt.
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// The backoff multiplier must be a finite number no smaller than 1.0.
    #[error("backoff_multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    /// The first retry delay exceeds the cap.
    #[error("base_delay ({base:?}) must not exceed max_delay ({max:?})")]
    BaseExceedsMax {
        /// Configured base delay.
        base: Duration,
        /// Configured maximum delay.
        max: Duration,
    },

    /// A circuit breaker must tolerate at least one failure.
    #[error("failure_threshold must be greater than 0")]
    ZeroThreshold,
}
