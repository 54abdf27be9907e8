//! Exponentially weighted moving average of backend latency.

/// One EWMA update step: `L = alpha * M + (1 - alpha) * L_prev`, seeded
/// with the first measurement when no prior average exists.
#[must_use]
pub fn smooth(alpha: f64, previous: Option<f64>, measurement: f64) -> f64 {
    match previous {
        Some(prev) => alpha.mul_add(measurement, (1.0 - alpha) * prev),
        None => measurement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPHA: f64 = 0.3;

    #[test]
    fn first_sample_seeds_the_average() {
        assert!((smooth(ALPHA, None, 150.0) - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn update_blends_toward_measurement() {
        // 0.3 * 100 + 0.7 * 200 = 170
        assert!((smooth(ALPHA, Some(200.0), 100.0) - 170.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_identical_measurements_converge() {
        let target = 275.0;
        let mut ewma = smooth(ALPHA, None, 40.0);
        for _ in 0..40 {
            ewma = smooth(ALPHA, Some(ewma), target);
        }
        assert!((ewma - target).abs() < 1e-6);
    }

    #[test]
    fn spike_is_damped() {
        let ewma = smooth(ALPHA, Some(100.0), 1_000.0);
        assert!(ewma < 1_000.0);
        assert!(ewma > 100.0);
        assert!((ewma - 370.0).abs() < 1e-9);
    }
}
