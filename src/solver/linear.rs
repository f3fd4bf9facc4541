//! Dense `Ax = b` by Jacobi relaxation.

use std::time::Instant;

use crate::config::SolverConfig;
use crate::device::{BufferAccess, ComputeBackend, PaddedSize};
use crate::error::{JacobiError, Result};
use crate::stats::Stats;

use super::orchestrator::{Orchestrator, Relaxation};
use super::{LinearSystem, SolveResult};

/// Relax `system` on `backend` until the relative L1 change per iteration is at most
/// `config.epsilon` or `config.max_iterations` sweeps have run.
///
/// The matrix is uploaded unpadded with stride `dimension`; the right-hand
/// side and both iterates are padded to the planned global size with zeros.
/// Hitting the iteration cap is reported through `SolveResult::converged`.
pub fn solve_linear<B: ComputeBackend>(
    backend: &B,
    system: &LinearSystem,
    config: &SolverConfig,
    mut stats: Option<&mut Stats>,
) -> Result<SolveResult> {
    config.validate()?;
    let n = system.dimension();
    let _span = tracing::info_span!("solve_linear", dimension = n).entered();

    let size = PaddedSize::plan(n, backend.max_work_group_size());
    tracing::debug!(
        local = size.local,
        global = size.global,
        padding = size.padding(),
        "planned work size"
    );

    let t = Instant::now();
    let matrix = to_device_precision(system.matrix(), "matrix")?;
    let rhs = to_device_precision(system.rhs(), "rhs")?;
    if let Some(row) = (0..n).find(|&i| matrix[i * n + i] == 0.0) {
        return Err(JacobiError::InvalidProblem(format!(
            "diagonal entry of row {row} underflows to zero in f32"
        )));
    }
    let matrix_buf = backend.upload("matrix", &matrix, n * n, BufferAccess::ReadOnly)?;
    let rhs_buf = backend.upload("rhs", &rhs, size.global, BufferAccess::ReadOnly)?;
    if let Some(ref mut s) = stats {
        s.add_phase("upload", t.elapsed());
    }

    let relaxation = Relaxation::Dense {
        matrix: &matrix_buf,
        rhs: &rhs_buf,
        dimension: n as u32,
    };
    let mut orchestrator = Orchestrator::new(backend, size, config.epsilon, config.max_iterations);
    orchestrator.run(&relaxation, stats.as_deref_mut())?;
    let result = orchestrator.finish(n, stats.as_deref_mut())?;

    if let Some(ref mut s) = stats {
        s.solves += 1;
    }
    tracing::info!(
        iterations = result.iterations_used,
        converged = result.converged,
        residual = result.final_residual,
        "linear solve finished"
    );
    Ok(result)
}

/// Narrow host values to the device's f32, rejecting anything that does not
/// survive the conversion.
pub(crate) fn to_device_precision(values: &[f64], what: &str) -> Result<Vec<f32>> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let narrowed = v as f32;
            if narrowed.is_finite() {
                Ok(narrowed)
            } else {
                Err(JacobiError::InvalidProblem(format!(
                    "{what}[{i}] = {v} is outside f32 range"
                )))
            }
        })
        .collect()
}
