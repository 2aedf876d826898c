//! Autoregressive coefficient estimation
//!
//! Fits `x[t] = Σ φ_i x[t−i] + e[t]` (i = 1..=p) on a demeaned channel, either
//! by least squares on the lagged design or by Burg's recursion. Returned
//! coefficients are `φ_1..φ_p`.

use gravity_bci_core::{ArMethod, ArSettings, PipelineError, PipelineResult};
use nalgebra::{DMatrix, DVector};

/// Population variance of a slice
#[allow(clippy::cast_precision_loss)]
pub fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n
}

/// Per-channel AR estimator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ArEstimator {
    order: usize,
    method: ArMethod,
}

impl ArEstimator {
    /// Create an estimator
    #[must_use]
    pub fn new(order: usize, method: ArMethod) -> Self {
        Self { order, method }
    }

    /// Model order
    pub fn order(&self) -> usize {
        self.order
    }

    /// Estimation method
    pub fn method(&self) -> ArMethod {
        self.method
    }

    /// Fit channel `channel` of a window.
    ///
    /// # Errors
    ///
    /// `DegenerateWindow` if the channel variance is below `min_variance`,
    /// or the estimation problem is singular.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(&self, channel: usize, samples: &[f64], min_variance: f64) -> PipelineResult<Vec<f64>> {
        let var = variance(samples);
        let degenerate = || PipelineError::DegenerateWindow { channel, variance: var, threshold: min_variance };
        if !(var > min_variance) || samples.len() <= 2 * self.order {
            return Err(degenerate());
        }

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let centered: Vec<f64> = samples.iter().map(|x| x - mean).collect();

        let coeffs = match self.method {
            ArMethod::LeastSquares => least_squares(&centered, self.order),
            ArMethod::Burg => burg(&centered, self.order),
        };
        coeffs.filter(|c| c.iter().all(|v| v.is_finite())).ok_or_else(degenerate)
    }
}

impl From<ArSettings> for ArEstimator {
    fn from(settings: ArSettings) -> Self {
        Self::new(settings.order, settings.method)
    }
}

/// Least squares via the normal equations `(XᵀX) φ = Xᵀy`, solved by Cholesky.
fn least_squares(x: &[f64], order: usize) -> Option<Vec<f64>> {
    let mut gram = DMatrix::<f64>::zeros(order, order);
    let mut rhs = DVector::<f64>::zeros(order);

    for t in order..x.len() {
        for i in 0..order {
            let xi = x[t - 1 - i];
            rhs[i] += xi * x[t];
            for j in i..order {
                gram[(i, j)] += xi * x[t - 1 - j];
            }
        }
    }
    for i in 0..order {
        for j in 0..i {
            gram[(i, j)] = gram[(j, i)];
        }
    }

    let solution = gram.cholesky()?.solve(&rhs);
    Some(solution.iter().copied().collect())
}

/// Burg's method: minimizes forward and backward prediction error jointly,
/// always yielding a stable model.
fn burg(x: &[f64], order: usize) -> Option<Vec<f64>> {
    let n = x.len();
    let mut forward = x.to_vec();
    let mut backward = x.to_vec();
    // prediction-error filter a[0] = 1, a[1..=p]
    let mut a = vec![0.0; order + 1];
    a[0] = 1.0;

    for m in 0..order {
        let mut num = 0.0;
        let mut den = 0.0;
        for k in (m + 1)..n {
            num += forward[k] * backward[k - 1];
            den += forward[k] * forward[k] + backward[k - 1] * backward[k - 1];
        }
        if !(den > 0.0) {
            return None;
        }
        let mu = -2.0 * num / den;

        let prev = a.clone();
        for i in 1..=m + 1 {
            a[i] = prev[i] + mu * prev[m + 1 - i];
        }

        for k in ((m + 1)..n).rev() {
            let f = forward[k];
            let b = backward[k - 1];
            forward[k] = f + mu * b;
            backward[k] = b + mu * f;
        }
    }

    Some(a[1..].iter().map(|c| -c).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// AR(2) process x[t] = 0.6 x[t-1] - 0.3 x[t-2] + e[t]
    fn ar2(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = vec![0.0; n + 100];
        for t in 2..x.len() {
            x[t] = 0.6 * x[t - 1] - 0.3 * x[t - 2] + rng.gen_range(-1.0..1.0);
        }
        x.split_off(100)
    }

    #[test]
    fn test_least_squares_recovers_ar2() {
        let x = ar2(4000, 3);
        let phi = ArEstimator::new(2, ArMethod::LeastSquares).fit(0, &x, 1e-9).unwrap();
        assert!((phi[0] - 0.6).abs() < 0.05, "{phi:?}");
        assert!((phi[1] + 0.3).abs() < 0.05, "{phi:?}");
    }

    #[test]
    fn test_burg_recovers_ar2() {
        let x = ar2(4000, 5);
        let phi = ArEstimator::new(2, ArMethod::Burg).fit(0, &x, 1e-9).unwrap();
        assert!((phi[0] - 0.6).abs() < 0.05, "{phi:?}");
        assert!((phi[1] + 0.3).abs() < 0.05, "{phi:?}");
    }

    #[test]
    fn test_methods_agree_on_higher_order() {
        let x = ar2(4000, 9);
        let ls = ArEstimator::new(4, ArMethod::LeastSquares).fit(0, &x, 1e-9).unwrap();
        let burg = ArEstimator::new(4, ArMethod::Burg).fit(0, &x, 1e-9).unwrap();
        for (a, b) in ls.iter().zip(&burg) {
            assert!((a - b).abs() < 0.05);
        }
        assert!(ls[2].abs() < 0.08 && ls[3].abs() < 0.08);
    }

    #[test]
    fn test_flat_channel_is_degenerate() {
        let flat = vec![3.5; 250];
        for method in [ArMethod::LeastSquares, ArMethod::Burg] {
            let result = ArEstimator::new(6, method).fit(4, &flat, 1e-9);
            assert!(matches!(result, Err(PipelineError::DegenerateWindow { channel: 4, .. })));
        }
    }
}
