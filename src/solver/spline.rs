//! Natural cubic splines on uniformly spaced knots.
//!
//! The second-derivative moments `c` satisfy the tridiagonal system
//! `c[i-1] + 4c[i] + c[i+1] = 6/h² (y[i-1] - 2y[i] + y[i+1])` with
//! `c[0] = c[n-1] = 0`. The matrix is never formed: the device relaxes the
//! recurrence directly, then derives the per-segment `a` and `b`
//! coefficients from the converged moments.

use std::time::Instant;

use crate::config::SolverConfig;
use crate::device::{BufferAccess, ComputeBackend, Kernel, KernelArgs, PaddedSize};
use crate::error::{JacobiError, Result};
use crate::stats::Stats;

use super::linear::to_device_precision;
use super::orchestrator::{Orchestrator, Relaxation};
use super::SolveResult;

/// Knot values `y[i]` at `x = i·h`.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineProblem {
    knots: Vec<f64>,
    spacing: f64,
}

impl SplineProblem {
    pub fn new(knots: Vec<f64>, spacing: f64) -> Result<Self> {
        if knots.len() < 2 {
            return Err(JacobiError::InvalidProblem(format!(
                "a spline needs at least two knots, got {}",
                knots.len()
            )));
        }
        if u32::try_from(knots.len()).is_err() {
            return Err(JacobiError::InvalidProblem(format!(
                "{} knots exceed the device index range",
                knots.len()
            )));
        }
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(JacobiError::InvalidProblem(format!(
                "knot spacing must be positive and finite, got {spacing}"
            )));
        }
        if knots.iter().any(|v| !v.is_finite()) {
            return Err(JacobiError::InvalidProblem("knots contain non-finite values".into()));
        }
        Ok(Self { knots, spacing })
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }
}

/// Piecewise cubic through the knots.
///
/// Segment `i ∈ [1, n)` spans `[(i-1)h, ih]` and evaluates
/// `c[i]/(6h)(x - x₍ᵢ₋₁₎)³ + c[i-1]/(6h)(xᵢ - x)³ + b[i](x - mid) + a[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineInterpolator {
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    h: f64,
}

impl SplineInterpolator {
    pub fn from_coefficients(a: Vec<f64>, b: Vec<f64>, c: Vec<f64>, h: f64) -> Result<Self> {
        let n = c.len();
        if n < 2 {
            return Err(JacobiError::InvalidProblem(format!(
                "a spline needs at least two knots, got {n}"
            )));
        }
        for (what, len) in [("a", a.len()), ("b", b.len())] {
            if len != n {
                return Err(JacobiError::DimensionMismatch {
                    what,
                    expected: n,
                    actual: len,
                });
            }
        }
        if !(h.is_finite() && h > 0.0) {
            return Err(JacobiError::InvalidProblem(format!(
                "knot spacing must be positive and finite, got {h}"
            )));
        }
        Ok(Self { a, b, c, h })
    }

    pub fn knot_count(&self) -> usize {
        self.c.len()
    }

    pub fn spacing(&self) -> f64 {
        self.h
    }

    /// `[0, (n-1)h]`
    pub fn domain(&self) -> (f64, f64) {
        (0.0, (self.knot_count() - 1) as f64 * self.h)
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Second-derivative moments at the knots.
    pub fn c(&self) -> &[f64] {
        &self.c
    }

    /// Evaluate at `x`, which must lie inside `domain()`.
    pub fn evaluate(&self, x: f64) -> Result<f64> {
        let (min, max) = self.domain();
        if !(min..=max).contains(&x) {
            return Err(JacobiError::DomainError { x, min, max });
        }
        Ok(self.segment_value(x))
    }

    /// Evaluate at `x` clamped into `domain()`.
    pub fn evaluate_clamped(&self, x: f64) -> f64 {
        let (min, max) = self.domain();
        self.segment_value(x.clamp(min, max))
    }

    fn segment_value(&self, x: f64) -> f64 {
        let h = self.h;
        let last = self.knot_count() - 1;
        let i = ((x / h).floor().max(0.0) as usize + 1).clamp(1, last);
        let lower = (i - 1) as f64 * h;
        let upper = i as f64 * h;
        let left = x - lower;
        let right = upper - x;
        self.c[i] / (6.0 * h) * left.powi(3)
            + self.c[i - 1] / (6.0 * h) * right.powi(3)
            + self.b[i] * (x - 0.5 * (lower + upper))
            + self.a[i]
    }
}

/// A fitted spline plus the diagnostics of the moment relaxation.
#[derive(Debug, Clone)]
pub struct SplineFit {
    pub interpolator: SplineInterpolator,
    /// `values` holds the moments `c`.
    pub moments: SolveResult,
}

/// One evaluated point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineSample {
    pub x: f64,
    pub y: f64,
}

/// Fit a natural cubic spline through `problem`'s knots on `backend`.
pub fn solve_spline<B: ComputeBackend>(
    backend: &B,
    problem: &SplineProblem,
    config: &SolverConfig,
    mut stats: Option<&mut Stats>,
) -> Result<SplineFit> {
    config.validate()?;
    let n = problem.knots().len();
    let h = problem.spacing();
    let _span = tracing::info_span!("solve_spline", knots = n, spacing = h).entered();

    let size = PaddedSize::plan(n, backend.max_work_group_size());
    let t = Instant::now();
    let y = to_device_precision(problem.knots(), "knots")?;
    let y_buf = backend.upload("knots", &y, size.global, BufferAccess::ReadOnly)?;
    let rhs_buf = backend.create_buffer("spline_rhs", size.global, BufferAccess::ReadWrite)?;
    let call = KernelArgs::new(Kernel::InitRhs)
        .buffer(&y_buf)
        .buffer(&rhs_buf)
        .float(h as f32)
        .uint(n as u32)
        .bind(size)?;
    backend.dispatch(&call)?;
    if let Some(ref mut s) = stats {
        s.dispatches += 1;
        s.add_phase("upload", t.elapsed());
    }

    let relaxation = Relaxation::Spline {
        rhs: &rhs_buf,
        knots: n as u32,
    };
    let mut orchestrator = Orchestrator::new(backend, size, config.epsilon, config.max_iterations);
    orchestrator.run(&relaxation, stats.as_deref_mut())?;

    let t = Instant::now();
    let a_buf = backend.create_buffer("spline_a", size.global, BufferAccess::ReadWrite)?;
    let b_buf = backend.create_buffer("spline_b", size.global, BufferAccess::ReadWrite)?;
    let call = KernelArgs::new(Kernel::ComputeAb)
        .buffer(&y_buf)
        .buffer(orchestrator.solution()?)
        .buffer(&a_buf)
        .buffer(&b_buf)
        .float(h as f32)
        .uint(n as u32)
        .bind(size)?;
    backend.dispatch(&call)?;
    let a = backend.read_buffer(&a_buf)?;
    let b = backend.read_buffer(&b_buf)?;
    let moments = orchestrator.finish(n, stats.as_deref_mut())?;
    if let Some(ref mut s) = stats {
        s.dispatches += 1;
        s.readbacks += 2;
        s.solves += 1;
        s.add_phase("coefficients", t.elapsed());
    }

    let widen = |v: &[f32]| v[..n].iter().map(|&x| x as f64).collect::<Vec<_>>();
    let interpolator =
        SplineInterpolator::from_coefficients(widen(&a), widen(&b), moments.values.clone(), h)?;

    tracing::info!(
        iterations = moments.iterations_used,
        converged = moments.converged,
        residual = moments.final_residual,
        "spline fit finished"
    );
    Ok(SplineFit {
        interpolator,
        moments,
    })
}

/// Evaluate `interpolator` at `count` evenly spaced points spanning its
/// domain, on `backend`.
pub fn sample_on_device<B: ComputeBackend>(
    backend: &B,
    interpolator: &SplineInterpolator,
    count: usize,
    mut stats: Option<&mut Stats>,
) -> Result<Vec<SplineSample>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let samples = u32::try_from(count).map_err(|_| {
        JacobiError::InvalidProblem(format!("{count} samples exceed the device index range"))
    })?;
    let n = interpolator.knot_count();
    let h = interpolator.spacing();
    let (min, max) = interpolator.domain();
    let delta = if count > 1 { (max - min) / (count - 1) as f64 } else { 0.0 };

    let size = PaddedSize::plan(count, backend.max_work_group_size());
    let upload = |label: &'static str, values: &[f64]| -> Result<B::Buffer> {
        let narrowed = to_device_precision(values, label)?;
        backend.upload(label, &narrowed, n, BufferAccess::ReadOnly)
    };
    let a_buf = upload("spline_a", interpolator.a())?;
    let b_buf = upload("spline_b", interpolator.b())?;
    let c_buf = upload("spline_c", interpolator.c())?;
    let out_buf = backend.create_buffer("samples", size.global, BufferAccess::WriteOnly)?;

    let call = KernelArgs::new(Kernel::Interpolate)
        .buffer(&a_buf)
        .buffer(&b_buf)
        .buffer(&c_buf)
        .buffer(&out_buf)
        .float(h as f32)
        .float(min as f32)
        .float(delta as f32)
        .uint(n as u32)
        .uint(samples)
        .bind(size)?;
    backend.dispatch(&call)?;
    let values = backend.read_buffer(&out_buf)?;
    if let Some(ref mut s) = stats {
        s.dispatches += 1;
        s.readbacks += 1;
    }

    Ok(values
        .iter()
        .take(count)
        .enumerate()
        .map(|(k, &y)| SplineSample {
            x: min + k as f64 * delta,
            y: y as f64,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn linear_interpolator() -> SplineInterpolator {
        // y = 2x on knots 0, 0.5, 1.0: zero moments, a = midpoint, b = slope.
        SplineInterpolator::from_coefficients(
            vec![0.0, 0.5, 1.5],
            vec![0.0, 2.0, 2.0],
            vec![0.0; 3],
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn zero_moments_interpolate_linearly() {
        let spline = linear_interpolator();
        assert_eq!(spline.domain(), (0.0, 1.0));
        for x in [0.0, 0.1, 0.5, 0.75, 1.0] {
            assert_abs_diff_eq!(spline.evaluate(x).unwrap(), 2.0 * x, epsilon = 1e-12);
        }
    }

    #[test]
    fn out_of_domain_is_an_error_unless_clamped() {
        let spline = linear_interpolator();
        assert!(matches!(
            spline.evaluate(1.5),
            Err(JacobiError::DomainError { max, .. }) if max == 1.0
        ));
        assert!(spline.evaluate(-0.1).is_err());
        assert!(spline.evaluate(f64::NAN).is_err());
        assert_abs_diff_eq!(spline.evaluate_clamped(1.5), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(spline.evaluate_clamped(-3.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_coefficients_are_rejected() {
        let err =
            SplineInterpolator::from_coefficients(vec![0.0; 2], vec![0.0; 3], vec![0.0; 3], 1.0);
        assert!(matches!(err, Err(JacobiError::DimensionMismatch { what: "a", .. })));
    }

    #[test]
    fn problem_validation() {
        assert!(SplineProblem::new(vec![1.0], 1.0).is_err());
        assert!(SplineProblem::new(vec![1.0, 2.0], 0.0).is_err());
        assert!(SplineProblem::new(vec![1.0, f64::INFINITY], 1.0).is_err());
        assert!(SplineProblem::new(vec![1.0, 2.0], 0.25).is_ok());
    }
}
