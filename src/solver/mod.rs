//! Jacobi relaxation solvers.
//!
//! `solve_linear` relaxes a dense system `Ax = b`; `solve_spline` relaxes the
//! natural-cubic-spline moment recurrence and derives the interpolator. Both
//! drive the same iteration orchestrator against any `ComputeBackend`.

pub mod direct;
pub mod fill;
pub mod linear;
pub mod orchestrator;
pub mod spline;

use crate::error::{JacobiError, Result};

pub use fill::{RandomDominantFill, SystemFill};
pub use linear::solve_linear;
pub use orchestrator::SolveState;
pub use spline::{
    sample_on_device, solve_spline, SplineFit, SplineInterpolator, SplineProblem, SplineSample,
};

/// Outcome of a relaxation solve.
///
/// Not converging is not an error: check `converged` and `final_residual`
/// before trusting `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub values: Vec<f64>,
    pub iterations_used: u32,
    pub converged: bool,
    pub final_residual: f64,
}

/// A dense linear system `Ax = b` with row-major `A`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    dimension: usize,
    matrix: Vec<f64>,
    rhs: Vec<f64>,
}

impl LinearSystem {
    /// Validate and take ownership of a complete system.
    ///
    /// Strict diagonal dominance is not required; without it convergence is
    /// not guaranteed and is reported through `SolveResult::converged`.
    pub fn new(dimension: usize, matrix: Vec<f64>, rhs: Vec<f64>) -> Result<Self> {
        if dimension == 0 {
            return Err(JacobiError::InvalidProblem("dimension must be positive".into()));
        }
        if u32::try_from(dimension).is_err() {
            return Err(JacobiError::InvalidProblem(format!(
                "dimension {dimension} exceeds the device index range"
            )));
        }
        if matrix.len() != dimension * dimension {
            return Err(JacobiError::DimensionMismatch {
                what: "matrix",
                expected: dimension * dimension,
                actual: matrix.len(),
            });
        }
        if rhs.len() != dimension {
            return Err(JacobiError::DimensionMismatch {
                what: "rhs",
                expected: dimension,
                actual: rhs.len(),
            });
        }
        if matrix.iter().chain(&rhs).any(|v| !v.is_finite()) {
            return Err(JacobiError::InvalidProblem("system contains non-finite entries".into()));
        }
        if let Some(row) = (0..dimension).find(|&i| matrix[i * dimension + i] == 0.0) {
            return Err(JacobiError::InvalidProblem(format!(
                "diagonal entry of row {row} is zero"
            )));
        }
        Ok(Self {
            dimension,
            matrix,
            rhs,
        })
    }

    /// Build a system from optional parts, invoking `fill` for each part the
    /// caller leaves out.
    pub fn assemble(
        dimension: usize,
        matrix: Option<&[f64]>,
        rhs: Option<&[f64]>,
        fill: &mut dyn SystemFill,
    ) -> Result<Self> {
        let matrix = match matrix {
            Some(values) => values.to_vec(),
            None => {
                let mut values = vec![0.0; dimension * dimension];
                fill.fill_matrix(dimension, &mut values);
                values
            }
        };
        let rhs = match rhs {
            Some(values) => values.to_vec(),
            None => {
                let mut values = vec![0.0; dimension];
                fill.fill_rhs(&mut values);
                values
            }
        };
        Self::new(dimension, matrix, rhs)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn matrix(&self) -> &[f64] {
        &self.matrix
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.matrix[i * self.dimension..(i + 1) * self.dimension]
    }

    /// `|a_ii| > Σ_{j≠i} |a_ij|` for every row.
    pub fn is_strictly_diagonally_dominant(&self) -> bool {
        (0..self.dimension).all(|i| {
            let row = self.row(i);
            let off: f64 = row
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, v)| v.abs())
                .sum();
            row[i].abs() > off
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_rhs_is_rejected() {
        let err = LinearSystem::new(2, vec![2.0, 3.0, 4.0, 9.0], vec![6.0]);
        assert!(matches!(
            err,
            Err(JacobiError::DimensionMismatch {
                what: "rhs",
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn mismatched_matrix_is_rejected() {
        let err = LinearSystem::new(3, vec![1.0; 8], vec![0.0; 3]);
        assert!(matches!(err, Err(JacobiError::DimensionMismatch { what: "matrix", .. })));
    }

    #[test]
    fn zero_dimension_and_zero_diagonal_are_rejected() {
        assert!(matches!(
            LinearSystem::new(0, vec![], vec![]),
            Err(JacobiError::InvalidProblem(_))
        ));
        assert!(matches!(
            LinearSystem::new(2, vec![0.0, 1.0, 1.0, 1.0], vec![1.0, 1.0]),
            Err(JacobiError::InvalidProblem(_))
        ));
    }

    #[test]
    fn assemble_fills_missing_parts_only() {
        let rhs = [1.0, 2.0, 3.0];
        let system =
            LinearSystem::assemble(3, None, Some(&rhs), &mut RandomDominantFill::new(1)).unwrap();
        assert_eq!(system.rhs(), &rhs);
        assert!(system.is_strictly_diagonally_dominant());
    }

    #[test]
    fn dominance_check() {
        let system = LinearSystem::new(2, vec![2.0, 3.0, 4.0, 9.0], vec![6.0, 15.0]).unwrap();
        assert!(!system.is_strictly_diagonally_dominant());
        let system = LinearSystem::new(2, vec![5.0, 3.0, 4.0, 9.0], vec![6.0, 15.0]).unwrap();
        assert!(system.is_strictly_diagonally_dominant());
    }
}
