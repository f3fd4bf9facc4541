//! Fill routines for system parts the caller does not supply.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces a matrix and/or right-hand side for `LinearSystem::assemble`.
pub trait SystemFill {
    /// Fill a row-major `dimension`×`dimension` matrix.
    fn fill_matrix(&mut self, dimension: usize, matrix: &mut [f64]);

    fn fill_rhs(&mut self, rhs: &mut [f64]);
}

/// Random strictly diagonally dominant systems.
///
/// Off-diagonal entries and the right-hand side are uniform in `[0, range)`;
/// each diagonal entry is `(1 + u + n²) · range`, which dominates the row sum
/// of at most `(n - 1) · range`.
pub struct RandomDominantFill {
    rng: StdRng,
    range: f64,
}

impl RandomDominantFill {
    pub const DEFAULT_RANGE: f64 = 100.0;

    pub fn new(seed: u64) -> Self {
        Self::with_range(seed, Self::DEFAULT_RANGE)
    }

    pub fn with_range(seed: u64, range: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            range,
        }
    }
}

impl SystemFill for RandomDominantFill {
    fn fill_matrix(&mut self, dimension: usize, matrix: &mut [f64]) {
        for value in matrix.iter_mut() {
            *value = self.rng.gen_range(0.0..self.range);
        }
        let n2 = (dimension * dimension) as f64;
        for i in 0..dimension {
            let u: f64 = self.rng.gen_range(0.0..1.0);
            matrix[i * dimension + i] = (1.0 + u + n2) * self.range;
        }
    }

    fn fill_rhs(&mut self, rhs: &mut [f64]) {
        for value in rhs.iter_mut() {
            *value = self.rng.gen_range(0.0..self.range);
        }
    }
}
