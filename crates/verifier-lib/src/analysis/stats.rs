//! Sample statistics over collected metric values

/// Mean and sample standard deviation of a set of values
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl SampleStats {
    /// Compute statistics using the two-pass algorithm
    ///
    /// Non-finite values are ignored.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        let count = values.len();
        if count == 0 {
            return Self::default();
        }

        let mean = values.iter().sum::<f64>() / count as f64;

        let std_dev = if count > 1 {
            // Sample variance (Bessel's correction)
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Self {
            count,
            mean,
            std_dev,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Deviation of `value` from this sample's mean relative to the mean
    pub fn relative_deviation(&self, value: f64) -> f64 {
        if self.mean.abs() < f64::EPSILON {
            if value.abs() < f64::EPSILON {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            (value - self.mean).abs() / self.mean.abs()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_stats() {
        let stats = SampleStats::from_values([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count, 8);
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!((stats.std_dev - 2.138089935).abs() < 1e-6);
    }

    #[test]
    fn test_single_value_has_zero_std_dev() {
        let stats = SampleStats::from_values([3.0]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn test_non_finite_values_ignored() {
        let stats = SampleStats::from_values([1.0, f64::NAN, 3.0, f64::INFINITY]);
        assert_eq!(stats.count, 2);
        assert!((stats.mean - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_relative_deviation_zero_mean() {
        let stats = SampleStats::from_values([0.0, 0.0]);
        assert_eq!(stats.relative_deviation(0.0), 0.0);
        assert!(stats.relative_deviation(1.0).is_infinite());
    }
}
