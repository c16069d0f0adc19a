// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

use crate::jitter::JitterSource;

/// Lower bound of the jitter factor; delays are scaled by a value in `[JITTER_FLOOR, 1.0)`.
const JITTER_FLOOR: f64 = 0.5;

/// Exponential backoff sequence: `min(max, base * multiplier^n)` for `n = 0, 1, 2, ...`.
#[derive(Debug, Clone)]
pub(crate) struct Delays {
    base: Duration,
    max: Duration,
    multiplier: f64,
    exponent: u32,
}

impl Delays {
    pub(crate) fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
            exponent: 0,
        }
    }
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.base.is_zero() {
            return Some(Duration::ZERO);
        }

        let factor = self.multiplier.powi(i32::try_from(self.exponent).unwrap_or(i32::MAX));
        self.exponent = self.exponent.saturating_add(1);

        Some(clamp_to_max(secs_to_duration_saturating(self.base.as_secs_f64() * factor), self.max))
    }
}

/// Scales `delay` by a uniform factor in `[0.5, 1.0)`.
pub(crate) fn apply_jitter(delay: Duration, source: JitterSource) -> Duration {
    let factor = (1.0 - JITTER_FLOOR).mul_add(source.sample(), JITTER_FLOOR);
    secs_to_duration_saturating(delay.as_secs_f64() * factor)
}

fn clamp_to_max(d: Duration, max: Duration) -> Duration {
    min(d, max)
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 || secs.is_nan() {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
