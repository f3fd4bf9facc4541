//! Host direct solver using Gaussian elimination with partial pivoting.
//!
//! Used as the reference the relaxation results are checked against.

use crate::error::{JacobiError, Result};

/// Solve the row-major `dimension`×`dimension` system `matrix · x = rhs`.
pub fn gaussian_elimination(dimension: usize, matrix: &[f64], rhs: &[f64]) -> Result<Vec<f64>> {
    let n = dimension;
    if matrix.len() != n * n {
        return Err(JacobiError::DimensionMismatch {
            what: "matrix",
            expected: n * n,
            actual: matrix.len(),
        });
    }
    if rhs.len() != n {
        return Err(JacobiError::DimensionMismatch {
            what: "rhs",
            expected: n,
            actual: rhs.len(),
        });
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    // Build augmented matrix [A | b]
    let mut aug: Vec<Vec<f64>> = matrix
        .chunks_exact(n)
        .zip(rhs)
        .map(|(row, &b)| {
            let mut aug_row = Vec::with_capacity(n + 1);
            aug_row.extend_from_slice(row);
            aug_row.push(b);
            aug_row
        })
        .collect();

    for k in 0..n {
        let mut max_val = aug[k][k].abs();
        let mut max_row = k;
        for (i, row) in aug.iter().enumerate().skip(k + 1) {
            let v = row[k].abs();
            if v > max_val {
                max_val = v;
                max_row = i;
            }
        }

        if max_val < 1e-15 {
            return Err(JacobiError::InvalidProblem("singular matrix".into()));
        }

        if max_row != k {
            aug.swap(k, max_row);
        }

        let (pivot_rows, rest) = aug.split_at_mut(k + 1);
        let pivot_row = &pivot_rows[k];
        let pivot = pivot_row[k];
        for row in rest.iter_mut() {
            let factor = row[k] / pivot;
            row[k] = 0.0;
            for j in (k + 1)..=n {
                row[j] -= factor * pivot_row[j];
            }
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = aug[i][n];
        for j in (i + 1)..n {
            sum -= aug[i][j] * x[j];
        }
        x[i] = sum / aug[i][i];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn solves_two_by_two() {
        // 2x + 3y = 6, 4x + 9y = 15
        let x = gaussian_elimination(2, &[2.0, 3.0, 4.0, 9.0], &[6.0, 15.0]).unwrap();
        assert_abs_diff_eq!(x[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn pivots_around_zero_leading_entry() {
        let x = gaussian_elimination(2, &[0.0, 1.0, 1.0, 0.0], &[2.0, 3.0]).unwrap();
        assert_abs_diff_eq!(x[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let err = gaussian_elimination(2, &[1.0, 2.0, 2.0, 4.0], &[1.0, 2.0]);
        assert!(matches!(err, Err(JacobiError::InvalidProblem(_))));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = gaussian_elimination(2, &[1.0, 0.0, 0.0], &[1.0, 2.0]);
        assert!(matches!(err, Err(JacobiError::DimensionMismatch { what: "matrix", .. })));
    }
}
