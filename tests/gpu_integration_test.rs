//! Integration tests running the relaxation on a real wgpu device and
//! comparing against the host backend and the direct solver.
//!
//! Note: device arithmetic is f32, so comparisons use relative tolerances
//! rather than exact equality. Every test skips when no adapter is present.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use jacobi_relax::config::{DeviceSelector, SolverConfig};
use jacobi_relax::device::{
    BufferAccess, ComputeBackend, Context, HostBackend, Kernel, KernelArgs, PaddedSize,
};
use jacobi_relax::error::JacobiError;
use jacobi_relax::solver::direct::gaussian_elimination;
use jacobi_relax::solver::{
    sample_on_device, solve_linear, solve_spline, LinearSystem, RandomDominantFill, SplineProblem,
};

fn gpu_available() -> bool {
    Context::open(&DeviceSelector::default()).is_ok()
}

macro_rules! skip_if_no_gpu {
    () => {
        if !gpu_available() {
            eprintln!("Skipping: no GPU available");
            return;
        }
    };
}

fn context() -> Context {
    Context::open(&DeviceSelector::default()).expect("device open failed")
}

/// Run `difference` over `a` and `b` with work-groups of at most `max`
/// lanes and return both halves of the partials.
fn partials<B: ComputeBackend>(backend: &B, a: &[f32], b: &[f32], max: usize) -> Vec<f32> {
    let size = PaddedSize::plan(a.len(), max);
    let a = backend.upload("a", a, size.global, BufferAccess::ReadOnly).unwrap();
    let b = backend.upload("b", b, size.global, BufferAccess::ReadOnly).unwrap();
    let out = backend
        .create_buffer("partials", 2 * size.work_groups(), BufferAccess::ReadWrite)
        .unwrap();
    let call = KernelArgs::new(Kernel::Difference)
        .buffer(&a)
        .buffer(&b)
        .buffer(&out)
        .local_scratch(size.local)
        .bind(size)
        .unwrap();
    backend.dispatch(&call).unwrap();
    backend.read_buffer(&out).unwrap()
}

// ── Device context ────────────────────────────────────────────────

#[test]
fn unmatched_device_name_is_unavailable() {
    let selector = DeviceSelector::NameContains("no adapter is called this".into());
    assert!(matches!(
        Context::open(&selector),
        Err(JacobiError::DeviceUnavailable(_))
    ));
}

#[test]
fn gpu_context_reports_limits() {
    skip_if_no_gpu!();
    let ctx = context();
    eprintln!("adapter: {}", ctx.adapter_info().name);
    assert!(ctx.max_work_group_size() >= 1);
    assert!(ctx.max_work_group_size() <= 256);
}

#[test]
fn gpu_difference_matches_host() {
    skip_if_no_gpu!();
    let ctx = context();
    let host = HostBackend::with_max_work_group_size(ctx.max_work_group_size());
    let a: Vec<f32> = (0..700).map(|i| (i as f32 * 0.37).sin()).collect();
    let b: Vec<f32> = (0..700).map(|i| (i as f32 * 0.11).cos()).collect();

    let gpu = partials(&ctx, &a, &b, ctx.max_work_group_size());
    let cpu = partials(&host, &a, &b, ctx.max_work_group_size());
    assert_eq!(gpu.len(), cpu.len());
    for (g, c) in gpu.iter().zip(&cpu) {
        assert_relative_eq!(*g, *c, max_relative = 1e-5);
    }
}

#[test]
fn gpu_pipelines_follow_local_size() {
    skip_if_no_gpu!();
    let ctx = context();
    let max = ctx.max_work_group_size();
    let ones = vec![1.0f32; 700];
    let zeros = vec![0.0f32; 700];
    // The context compiles a small local size on open; larger and odd sizes
    // must each run with their own lane count.
    for local in [max, 32.min(max), 100.min(max), max] {
        let got = partials(&ctx, &ones, &zeros, local);
        let size = PaddedSize::plan(700, local);
        let groups = size.work_groups();
        for group in 0..groups {
            let lanes = (700 - group * size.local).min(size.local) as f32;
            assert_eq!(got[group], lanes, "local {local}, group {group}");
            assert_eq!(got[groups + group], lanes, "local {local}, group {group}");
        }
    }
    if max > 32 {
        assert!(ctx.compiled_local_sizes() >= 2);
    }
}

// ── Linear systems ────────────────────────────────────────────────

#[test]
fn gpu_two_by_two_matches_reference() {
    skip_if_no_gpu!();
    let system = LinearSystem::new(2, vec![2.0, 3.0, 4.0, 9.0], vec![6.0, 15.0]).unwrap();
    let expected =
        gaussian_elimination(system.dimension(), system.matrix(), system.rhs()).unwrap();
    let result = solve_linear(&context(), &system, &SolverConfig::default(), None).unwrap();
    assert!(result.converged);
    for (got, want) in result.values.iter().zip(&expected) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
    }
}

#[test]
fn gpu_random_system_matches_reference() {
    skip_if_no_gpu!();
    let system =
        LinearSystem::assemble(512, None, None, &mut RandomDominantFill::new(512)).unwrap();
    let expected =
        gaussian_elimination(system.dimension(), system.matrix(), system.rhs()).unwrap();
    let result = solve_linear(&context(), &system, &SolverConfig::default(), None).unwrap();
    assert!(result.converged);
    assert!(result.iterations_used < 100);
    for (got, want) in result.values.iter().zip(&expected) {
        assert_relative_eq!(*got, *want, max_relative = 1e-3);
    }
}

#[test]
fn gpu_random_system_1024_converges() {
    skip_if_no_gpu!();
    let system =
        LinearSystem::assemble(1024, None, None, &mut RandomDominantFill::new(1)).unwrap();
    let result = solve_linear(&context(), &system, &SolverConfig::default(), None).unwrap();
    assert!(result.converged);
    assert_eq!(result.values.len(), 1024);
}

#[test]
fn gpu_non_dominant_system_hits_the_cap() {
    skip_if_no_gpu!();
    let system = LinearSystem::new(2, vec![1.0, 2.0, 2.0, 1.0], vec![1.0, 1.0]).unwrap();
    let result = solve_linear(&context(), &system, &SolverConfig::default(), None).unwrap();
    assert!(!result.converged);
    assert_eq!(result.iterations_used, 100);
}

#[test]
fn gpu_is_deterministic() {
    skip_if_no_gpu!();
    let ctx = context();
    let system = LinearSystem::assemble(96, None, None, &mut RandomDominantFill::new(4)).unwrap();
    let first = solve_linear(&ctx, &system, &SolverConfig::default(), None).unwrap();
    let second = solve_linear(&ctx, &system, &SolverConfig::default(), None).unwrap();
    assert_eq!(first.values, second.values);
    assert_eq!(first.iterations_used, second.iterations_used);
}

// ── Splines ───────────────────────────────────────────────────────

#[test]
fn gpu_spline_matches_host_spline() {
    skip_if_no_gpu!();
    let ctx = context();
    let knots: Vec<f64> = (0..40).map(|i| (i as f64 * 0.3).sin()).collect();
    let problem = SplineProblem::new(knots.clone(), 0.1).unwrap();
    let config = SolverConfig::default();
    let gpu = solve_spline(&ctx, &problem, &config, None).unwrap();
    let host = solve_spline(&HostBackend::new(), &problem, &config, None).unwrap();
    assert!(gpu.moments.converged, "residual {}", gpu.moments.final_residual);

    for (i, &y) in knots.iter().enumerate() {
        let x = i as f64 * 0.1;
        assert_abs_diff_eq!(gpu.interpolator.evaluate(x).unwrap(), y, epsilon = 1e-3);
    }
    for (g, h) in gpu.interpolator.c().iter().zip(host.interpolator.c()) {
        assert_abs_diff_eq!(*g, *h, epsilon = 1e-2);
    }

    let samples = sample_on_device(&ctx, &gpu.interpolator, 200, None).unwrap();
    assert_eq!(samples.len(), 200);
    for sample in &samples {
        let expected = gpu.interpolator.evaluate_clamped(sample.x);
        assert_abs_diff_eq!(sample.y, expected, epsilon = 1e-3);
    }
}

#[test]
fn gpu_wide_system_matches_host_rows() {
    skip_if_no_gpu!();
    // Every row must be relaxed, not only the first work-group's worth.
    let ctx = context();
    let system = LinearSystem::assemble(700, None, None, &mut RandomDominantFill::new(8)).unwrap();
    let config = SolverConfig::default();
    let gpu = solve_linear(&ctx, &system, &config, None).unwrap();
    let host = solve_linear(
        &HostBackend::with_max_work_group_size(ctx.max_work_group_size()),
        &system,
        &config,
        None,
    )
    .unwrap();
    assert!(gpu.converged);
    for (i, (g, h)) in gpu.values.iter().zip(&host.values).enumerate() {
        assert_relative_eq!(*g, *h, max_relative = 1e-4);
        assert!(*g != 0.0, "row {i} was never written");
    }
}
