//! Ordinary least squares
//!
//! Small linear fits over per-player metric rows. The design matrices here
//! are a handful of columns wide, so an SVD solve is plenty.

use nalgebra::{DMatrix, DVector};

/// A fitted linear model with an intercept term
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

/// Fit y = b0 + b1*x1 + ... by least squares.
///
/// Returns `None` when there are no rows, the rows are ragged, or there
/// are not more rows than coefficients.
pub fn fit_ols(features: &[Vec<f64>], targets: &[f64]) -> Option<LinearModel> {
    let n = features.len();
    if n == 0 || n != targets.len() {
        return None;
    }
    let k = features[0].len();
    if features.iter().any(|row| row.len() != k) || n <= k {
        return None;
    }

    let x = DMatrix::from_fn(n, k + 1, |i, j| {
        if j == 0 {
            1.0
        } else {
            features[i][j - 1]
        }
    });
    let y = DVector::from_column_slice(targets);

    let solution = x.svd(true, true).solve(&y, 1e-10).ok()?;
    Some(LinearModel {
        intercept: solution[0],
        coefficients: solution.as_slice()[1..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_recovers_exact_line() {
        let features: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..10).map(|i| 2.0 + 3.0 * i as f64).collect();

        let model = fit_ols(&features, &targets).unwrap();
        assert_approx_eq!(model.intercept, 2.0, 1e-8);
        assert_approx_eq!(model.coefficients[0], 3.0, 1e-8);
        assert_approx_eq!(model.predict(&[4.0]), 14.0, 1e-8);
    }

    #[test]
    fn test_two_features() {
        let features = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![2.0, 3.0],
        ];
        let targets: Vec<f64> = features
            .iter()
            .map(|row| 1.0 - 2.0 * row[0] + 0.5 * row[1])
            .collect();

        let model = fit_ols(&features, &targets).unwrap();
        assert_approx_eq!(model.intercept, 1.0, 1e-8);
        assert_approx_eq!(model.coefficients[0], -2.0, 1e-8);
        assert_approx_eq!(model.coefficients[1], 0.5, 1e-8);
    }

    #[test]
    fn test_underdetermined_returns_none() {
        assert!(fit_ols(&[], &[]).is_none());
        assert!(fit_ols(&[vec![1.0, 2.0]], &[3.0]).is_none());
        assert!(fit_ols(&[vec![1.0], vec![2.0]], &[1.0]).is_none());
    }
}
