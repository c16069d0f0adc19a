// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Uniform samples used to spread retry delays apart.
///
/// Draws from `fastrand`'s thread-local generator unless pinned.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct JitterSource {
    pinned: Option<f64>,
}

impl JitterSource {
    #[cfg(test)]
    pub fn pinned(sample: f64) -> Self {
        Self { pinned: Some(sample) }
    }

    /// A sample in `[0.0, 1.0)`.
    pub fn sample(self) -> f64 {
        self.pinned.unwrap_or_else(fastrand::f64)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_unit_interval() {
        let source = JitterSource::default();
        assert!((0..1000).map(|_| source.sample()).all(|s| (0.0..1.0).contains(&s)));
        assert!((JitterSource::pinned(0.25).sample() - 0.25).abs() < f64::EPSILON);
    }
}
