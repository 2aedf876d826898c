//! Common Spatial Patterns
//!
//! Fitting solves the generalized eigenproblem `Cmi w = λ (Cmi + Crest) w` by
//! whitening the composite covariance and diagonalizing the whitened MI
//! covariance. Filters with λ far from 0.5 separate the classes best; they
//! are ranked by `|λ − 0.5|` so both tails of the spectrum are kept.
//! Inference projects a window and takes the log-variance of each component.

use gravity_bci_core::{CspProjection, MindState, Window};
use nalgebra::{DMatrix, SymmetricEigen};

use super::training::{TrainingError, TrainingResult};

/// Relative eigenvalue floor below which the composite covariance is singular
const RANK_TOLERANCE: f64 = 1e-10;

/// Trace-normalized spatial covariance `X Xᵀ / tr(X Xᵀ)` of a window.
///
/// Returns `None` for an all-zero window.
#[must_use]
pub fn normalized_covariance(window: &Window) -> Option<DMatrix<f64>> {
    let n = window.channel_count();
    let means: Vec<f64> = window.channels().map(mean).collect();

    let mut cov = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        let xi = window.channel(i);
        for j in i..n {
            let xj = window.channel(j);
            let dot: f64 = xi.iter().zip(xj).map(|(a, b)| (a - means[i]) * (b - means[j])).sum();
            cov[(i, j)] = dot;
            cov[(j, i)] = dot;
        }
    }

    let trace = cov.trace();
    if trace > 0.0 && trace.is_finite() {
        Some(cov / trace)
    } else {
        None
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        0.0
    } else {
        x.iter().sum::<f64>() / x.len() as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn class_covariance(windows: &[&Window], state: MindState) -> TrainingResult<DMatrix<f64>> {
    let covs: Vec<DMatrix<f64>> = windows.iter().filter_map(|w| normalized_covariance(w)).collect();
    let first = covs.first().ok_or(TrainingError::InsufficientWindows { state, got: 0, need: 1 })?;

    let mut sum = DMatrix::<f64>::zeros(first.nrows(), first.ncols());
    for cov in &covs {
        sum += cov;
    }
    Ok(sum / covs.len() as f64)
}

/// Fit `components` CSP filters from filtered REST and MI windows.
///
/// # Errors
///
/// - `InsufficientWindows` if a class has no usable window
/// - `SingularMatrix` if the composite covariance is rank deficient
pub fn fit_csp(rest: &[&Window], mi: &[&Window], components: usize) -> TrainingResult<CspProjection> {
    let c_rest = class_covariance(rest, MindState::Rest)?;
    let c_mi = class_covariance(mi, MindState::MotorImagery)?;
    let channels = c_mi.nrows();
    if c_rest.nrows() != channels {
        return Err(TrainingError::ChannelMismatch { expected: channels, actual: c_rest.nrows() });
    }
    if components == 0 || components > channels {
        return Err(TrainingError::InvalidComponents { components, channels });
    }

    // Whitening transform P = Λ^-1/2 Uᵀ of the composite covariance
    let composite = SymmetricEigen::new(&c_mi + &c_rest);
    let max_eig = composite.eigenvalues.max();
    if !(max_eig > 0.0) || composite.eigenvalues.iter().any(|&l| l <= max_eig * RANK_TOLERANCE) {
        return Err(TrainingError::SingularMatrix { matrix: "composite covariance" });
    }
    let inv_sqrt = DMatrix::from_diagonal(&composite.eigenvalues.map(|l| 1.0 / l.sqrt()));
    let whitening = inv_sqrt * composite.eigenvectors.transpose();

    let whitened_mi = &whitening * &c_mi * whitening.transpose();
    let symmetric = (&whitened_mi + whitened_mi.transpose()) * 0.5;
    let decomposition = SymmetricEigen::new(symmetric);

    // Full filter matrix W = Bᵀ P, one filter per row
    let filters_full = decomposition.eigenvectors.transpose() * whitening;

    let mut order: Vec<usize> = (0..channels).collect();
    order.sort_by(|&a, &b| {
        let sa = (decomposition.eigenvalues[a] - 0.5).abs();
        let sb = (decomposition.eigenvalues[b] - 0.5).abs();
        sb.total_cmp(&sa).then(a.cmp(&b))
    });

    let mut filters = Vec::with_capacity(components);
    let mut eigenvalues = Vec::with_capacity(components);
    for &idx in order.iter().take(components) {
        let mut row: Vec<f64> = filters_full.row(idx).iter().copied().collect();
        // fix the sign so the largest-magnitude weight is positive
        let pivot = row.iter().copied().fold(0.0_f64, |acc, w| if w.abs() > acc.abs() { w } else { acc });
        if pivot < 0.0 {
            row.iter_mut().for_each(|w| *w = -*w);
        }
        filters.push(row);
        eigenvalues.push(decomposition.eigenvalues[idx]);
    }

    Ok(CspProjection { filters, eigenvalues })
}

/// Log-variance of each CSP component of a filtered window.
///
/// The caller guarantees `projection` and `window` agree on the channel count.
#[allow(clippy::cast_precision_loss)]
pub fn log_variance_features(projection: &CspProjection, window: &Window) -> Vec<f64> {
    let len = window.len();
    let mut component = vec![0.0; len];

    projection
        .filters
        .iter()
        .map(|weights| {
            component.fill(0.0);
            for (w, samples) in weights.iter().zip(window.channels()) {
                for (z, x) in component.iter_mut().zip(samples) {
                    *z += w * x;
                }
            }
            let m = mean(&component);
            let var = component.iter().map(|z| (z - m) * (z - m)).sum::<f64>() / len.max(1) as f64;
            var.max(f64::MIN_POSITIVE).ln()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Two-channel windows where class MI has large variance on channel 0 and
    /// REST on channel 1.
    fn windows(rng: &mut StdRng, state: MindState, count: usize) -> Vec<Window> {
        let (a, b) = match state {
            MindState::MotorImagery => (4.0, 1.0),
            MindState::Rest => (1.0, 4.0),
        };
        (0..count)
            .map(|i| {
                let ch0: Vec<f64> = (0..200).map(|_| a * rng.gen_range(-1.0..1.0)).collect();
                let ch1: Vec<f64> = (0..200).map(|_| b * rng.gen_range(-1.0..1.0)).collect();
                let ch2: Vec<f64> = (0..200).map(|_| rng.gen_range(-1.0..1.0)).collect();
                Window::from_channels(i as u64 * 200, &[ch0, ch1, ch2])
            })
            .collect()
    }

    #[test]
    fn test_csp_ranks_discriminative_filters_first() {
        let mut rng = StdRng::seed_from_u64(7);
        let mi = windows(&mut rng, MindState::MotorImagery, 20);
        let rest = windows(&mut rng, MindState::Rest, 20);
        let mi_refs: Vec<&Window> = mi.iter().collect();
        let rest_refs: Vec<&Window> = rest.iter().collect();

        let csp = fit_csp(&rest_refs, &mi_refs, 2).unwrap();
        assert_eq!(csp.components(), 2);
        assert!(csp.eigenvalues.iter().all(|l| (l - 0.5).abs() > 0.3));

        // the MI-dominant filter yields larger log-variance on MI windows
        let top_mi = usize::from(csp.eigenvalues[0] < csp.eigenvalues[1]);
        let f_mi = log_variance_features(&csp, &mi[0]);
        let f_rest = log_variance_features(&csp, &rest[0]);
        assert!(f_mi[top_mi] > f_rest[top_mi]);
    }

    #[test]
    fn test_log_variance_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(11);
        let mi = windows(&mut rng, MindState::MotorImagery, 5);
        let rest = windows(&mut rng, MindState::Rest, 5);
        let csp = fit_csp(&rest.iter().collect::<Vec<_>>(), &mi.iter().collect::<Vec<_>>(), 3).unwrap();

        let a = log_variance_features(&csp, &mi[2]);
        let b = log_variance_features(&csp, &mi[2]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_singular_composite_rejected() {
        let flat = Window::from_channels(0, &[vec![1.0, -1.0, 1.0, -1.0], vec![1.0, -1.0, 1.0, -1.0]]);
        let result = fit_csp(&[&flat], &[&flat], 1);
        assert!(matches!(result, Err(TrainingError::SingularMatrix { .. })));
    }

    #[test]
    fn test_missing_class_rejected() {
        let w = Window::from_channels(0, &[vec![1.0, -1.0, 2.0], vec![0.5, 1.0, -1.0]]);
        assert!(matches!(
            fit_csp(&[], &[&w], 1),
            Err(TrainingError::InsufficientWindows { state: MindState::Rest, .. })
        ));
    }
}
