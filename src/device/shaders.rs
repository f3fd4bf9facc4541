//! WGSL compute shader source for the relaxation solver.
//!
//! Every entry point runs one work-item per vector element with a local size
//! injected through the `WG_SIZE` override constant. Buffers are bound to
//! consecutive bindings in argument order; scalars share one uniform block at
//! the next binding, in declaration order.

/// WGSL source containing all kernels.
///
/// Entry points:
/// - `init`: zero-fill
/// - `init_rhs`: spline right-hand side from knot second differences
/// - `jacobi_step`: dense Jacobi half-step, one work-item per row
/// - `jacobi_spline_step`: tridiagonal (1, 4, 1) Jacobi half-step
/// - `difference`: per-work-group partial sums of |a - b| and of |a|
/// - `compute_ab`: per-segment spline coefficients from moments
/// - `interpolate`: evaluate the spline at evenly spaced samples
pub const SHADER_SOURCE: &str = r#"
override WG_SIZE: u32 = 64u;

// --- init ---

@group(0) @binding(0) var<storage, read_write> init_out: array<f32>;

@compute @workgroup_size(WG_SIZE)
fn init(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i < arrayLength(&init_out) {
        init_out[i] = 0.0;
    }
}

// --- init_rhs ---
// rhs[i] = 6 / h^2 * (y[i-1] - 2 y[i] + y[i+1]) for interior i, 0 otherwise.

struct RhsParams {
    h: f32,
    n: u32,
}

@group(0) @binding(0) var<storage, read> rhs_y: array<f32>;
@group(0) @binding(1) var<storage, read_write> rhs_out: array<f32>;
@group(0) @binding(2) var<uniform> rhs_params: RhsParams;

@compute @workgroup_size(WG_SIZE)
fn init_rhs(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let n = rhs_params.n;
    if i >= arrayLength(&rhs_out) {
        return;
    }
    if i == 0u || i + 1u >= n {
        rhs_out[i] = 0.0;
        return;
    }
    let h = rhs_params.h;
    rhs_out[i] = 6.0 / (h * h) * (rhs_y[i - 1u] - 2.0 * rhs_y[i] + rhs_y[i + 1u]);
}

// --- jacobi_step ---
// dst[i] = (b[i] - sum_{j != i} A[i][j] * src[j]) / A[i][i]

struct StepParams {
    n: u32,
}

@group(0) @binding(0) var<storage, read> step_a: array<f32>;
@group(0) @binding(1) var<storage, read> step_b: array<f32>;
@group(0) @binding(2) var<storage, read_write> step_dst: array<f32>;
@group(0) @binding(3) var<storage, read> step_src: array<f32>;
@group(0) @binding(4) var<uniform> step_params: StepParams;

@compute @workgroup_size(WG_SIZE)
fn jacobi_step(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let n = step_params.n;
    if i >= arrayLength(&step_dst) {
        return;
    }
    if i >= n {
        step_dst[i] = 0.0;
        return;
    }
    let row = i * n;
    var sigma: f32 = 0.0;
    for (var j = 0u; j < n; j = j + 1u) {
        if j != i {
            sigma = sigma + step_a[row + j] * step_src[j];
        }
    }
    step_dst[i] = (step_b[i] - sigma) / step_a[row + i];
}

// --- jacobi_spline_step ---
// dst[i] = (rhs[i] - src[i-1] - src[i+1]) / 4, natural ends fixed at 0.

struct SplineStepParams {
    n: u32,
}

@group(0) @binding(0) var<storage, read> spline_rhs: array<f32>;
@group(0) @binding(1) var<storage, read> spline_src: array<f32>;
@group(0) @binding(2) var<storage, read_write> spline_dst: array<f32>;
@group(0) @binding(3) var<uniform> spline_params: SplineStepParams;

@compute @workgroup_size(WG_SIZE)
fn jacobi_spline_step(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let n = spline_params.n;
    if i >= arrayLength(&spline_dst) {
        return;
    }
    if i == 0u || i + 1u >= n {
        spline_dst[i] = 0.0;
        return;
    }
    spline_dst[i] = (spline_rhs[i] - spline_src[i - 1u] - spline_src[i + 1u]) * 0.25;
}

// --- difference ---
// partials[group]          = sum over the group of |a[i] - b[i]|
// partials[groups + group] = sum over the group of |a[i]|

@group(0) @binding(0) var<storage, read> diff_a: array<f32>;
@group(0) @binding(1) var<storage, read> diff_b: array<f32>;
@group(0) @binding(2) var<storage, read_write> diff_partials: array<f32>;

var<workgroup> diff_scratch: array<f32, 256>;
var<workgroup> norm_scratch: array<f32, 256>;

@compute @workgroup_size(WG_SIZE)
fn difference(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let i = gid.x;
    var delta: f32 = 0.0;
    var norm: f32 = 0.0;
    if i < arrayLength(&diff_a) && i < arrayLength(&diff_b) {
        delta = abs(diff_a[i] - diff_b[i]);
        norm = abs(diff_a[i]);
    }
    diff_scratch[lid.x] = delta;
    norm_scratch[lid.x] = norm;
    workgroupBarrier();

    // Halving fold that also handles non power-of-two group sizes.
    var span = WG_SIZE;
    while span > 1u {
        let keep = (span + 1u) / 2u;
        if lid.x < span - keep {
            diff_scratch[lid.x] = diff_scratch[lid.x] + diff_scratch[lid.x + keep];
            norm_scratch[lid.x] = norm_scratch[lid.x] + norm_scratch[lid.x + keep];
        }
        workgroupBarrier();
        span = keep;
    }

    if lid.x == 0u {
        diff_partials[wid.x] = diff_scratch[0];
        diff_partials[groups.x + wid.x] = norm_scratch[0];
    }
}

// --- compute_ab ---
// a[i] = (y[i-1] + y[i]) / 2 - h^2 (c[i-1] + c[i]) / 12
// b[i] = (y[i] - y[i-1]) / h - h (c[i] - c[i-1]) / 6

struct AbParams {
    h: f32,
    n: u32,
}

@group(0) @binding(0) var<storage, read> ab_y: array<f32>;
@group(0) @binding(1) var<storage, read> ab_c: array<f32>;
@group(0) @binding(2) var<storage, read_write> ab_a: array<f32>;
@group(0) @binding(3) var<storage, read_write> ab_b: array<f32>;
@group(0) @binding(4) var<uniform> ab_params: AbParams;

@compute @workgroup_size(WG_SIZE)
fn compute_ab(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= arrayLength(&ab_a) {
        return;
    }
    if i == 0u || i >= ab_params.n {
        ab_a[i] = 0.0;
        ab_b[i] = 0.0;
        return;
    }
    let h = ab_params.h;
    ab_a[i] = 0.5 * (ab_y[i - 1u] + ab_y[i]) - h * h * (ab_c[i - 1u] + ab_c[i]) / 12.0;
    ab_b[i] = (ab_y[i] - ab_y[i - 1u]) / h - h * (ab_c[i] - ab_c[i - 1u]) / 6.0;
}

// --- interpolate ---
// out[k] = spline(domain_min + k * domain_delta)

struct SampleParams {
    h: f32,
    domain_min: f32,
    domain_delta: f32,
    knots: u32,
    samples: u32,
}

@group(0) @binding(0) var<storage, read> sample_a: array<f32>;
@group(0) @binding(1) var<storage, read> sample_b: array<f32>;
@group(0) @binding(2) var<storage, read> sample_c: array<f32>;
@group(0) @binding(3) var<storage, read_write> sample_out: array<f32>;
@group(0) @binding(4) var<uniform> sample_params: SampleParams;

@compute @workgroup_size(WG_SIZE)
fn interpolate(@builtin(global_invocation_id) gid: vec3<u32>) {
    let k = gid.x;
    if k >= arrayLength(&sample_out) {
        return;
    }
    if k >= sample_params.samples {
        sample_out[k] = 0.0;
        return;
    }
    let h = sample_params.h;
    let x = sample_params.domain_min + f32(k) * sample_params.domain_delta;
    let last = sample_params.knots - 1u;
    let i = clamp(u32(max(floor(x / h), 0.0)) + 1u, 1u, last);
    let lower = f32(i - 1u) * h;
    let upper = lower + h;
    let left = x - lower;
    let right = upper - x;
    sample_out[k] = sample_c[i] / (6.0 * h) * left * left * left
        + sample_c[i - 1u] / (6.0 * h) * right * right * right
        + sample_b[i] * (x - 0.5 * (lower + upper))
        + sample_a[i];
}
"#;
