//! Robust statistics: median, MAD and sigma-clipped background estimates.

/// MAD to standard deviation conversion factor for a normal distribution.
pub const MAD_TO_SIGMA: f32 = 1.4826022;

/// Median of `data`, reordering it in place.
///
/// Returns 0.0 for an empty slice.
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let len = data.len();
    let mid = len / 2;
    let (left, upper, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper;
    if len % 2 == 1 {
        upper
    } else {
        let lower = left.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (lower + upper) * 0.5
    }
}

/// Background level and noise of a pixel sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Background {
    pub median: f32,
    pub sigma: f32,
}

/// Sigma-clipped median and MAD-based sigma of the finite values in `values`.
///
/// Values further than `kappa * sigma` from the median are rejected for up to
/// `iterations` rounds; the loop stops early once nothing is clipped.
pub fn sigma_clipped_background(values: &[f32], kappa: f32, iterations: usize) -> Background {
    let mut active: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let mut deviations = Vec::with_capacity(active.len());

    for _ in 0..iterations {
        if active.len() < 3 {
            break;
        }
        let Background { median, sigma } = median_and_sigma(&mut active, &mut deviations);
        if sigma < f32::EPSILON {
            return Background { median, sigma: 0.0 };
        }
        let threshold = kappa * sigma;
        let before = active.len();
        active.retain(|v| (v - median).abs() <= threshold);
        if active.len() == before {
            return Background { median, sigma };
        }
    }

    median_and_sigma(&mut active, &mut deviations)
}

fn median_and_sigma(values: &mut [f32], deviations: &mut Vec<f32>) -> Background {
    if values.is_empty() {
        return Background {
            median: 0.0,
            sigma: 0.0,
        };
    }
    let median = median_f32_mut(values);
    deviations.clear();
    deviations.extend(values.iter().map(|v| (v - median).abs()));
    let mad = median_f32_mut(deviations);
    Background {
        median,
        sigma: mad * MAD_TO_SIGMA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::float_ext::FloatExt;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median_f32_mut(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median_f32_mut(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median_f32_mut(&mut []), 0.0);
    }

    #[test]
    fn test_flat_sample_has_zero_sigma() {
        let bg = sigma_clipped_background(&[5.0; 50], 3.0, 5);
        assert_eq!(bg.median, 5.0);
        assert_eq!(bg.sigma, 0.0);
    }

    #[test]
    fn test_outliers_and_nan_are_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut values: Vec<f32> = (0..2000)
            .map(|_| 10.0 + rng.random_range(-1.0f32..1.0))
            .collect();
        values.extend([1.0e4, -1.0e4, f32::NAN, 5.0e3]);

        let bg = sigma_clipped_background(&values, 3.0, 10);
        assert!(bg.median.approximately_eq_tol(10.0, 0.1));
        // Uniform on [-1, 1] has sigma ~0.577; the MAD estimate lands near 0.74
        assert!(bg.sigma > 0.4 && bg.sigma < 1.0, "sigma = {}", bg.sigma);
    }
}
