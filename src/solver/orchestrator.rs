//! Iteration orchestrator.
//!
//! Drives a Jacobi relaxation to convergence on any `ComputeBackend`. Each
//! full iteration issues, in order on one queue:
//!
//! 1. a relaxation half-step writing slot 1 from slot 0,
//! 2. a relaxation half-step writing slot 0 from slot 1,
//! 3. a `difference` reduction of `|slot0 - slot1|` and `|slot0|` into two
//!    partials per work-group.
//!
//! The partials are then read back (the only blocking read inside the loop)
//! and summed on the host into the relative L1 residual
//! `sum|slot0 - slot1| / max(sum|slot0|, 1)`.

use std::time::Instant;

use crate::device::{
    BufferAccess, ComputeBackend, DeviceBuffer, Kernel, KernelArgs, KernelCall, PaddedSize,
};
use crate::error::{JacobiError, Result};
use crate::stats::Stats;

use super::SolveResult;

/// Lifecycle of one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveState {
    Uninitialized,
    Initialized,
    Iterating,
    Converged,
    MaxIterExceeded,
}

impl SolveState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SolveState::Converged | SolveState::MaxIterExceeded)
    }
}

/// Two equally sized buffers whose source/destination roles swap every
/// half-step. A relaxation always reads `current` and writes `next`.
pub struct PingPong<B> {
    slots: [B; 2],
    current: usize,
}

impl<B> PingPong<B> {
    pub fn new(first: B, second: B) -> Self {
        Self {
            slots: [first, second],
            current: 0,
        }
    }

    pub fn current(&self) -> &B {
        &self.slots[self.current]
    }

    pub fn next(&self) -> &B {
        &self.slots[1 - self.current]
    }

    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Both slots in allocation order, independent of the role flag.
    pub fn slots(&self) -> (&B, &B) {
        (&self.slots[0], &self.slots[1])
    }

    /// True when `current` is the first slot again, i.e. after a whole
    /// number of full iterations.
    pub fn at_rest(&self) -> bool {
        self.current == 0
    }
}

/// Device state owned by one solve call; dropped on every exit path.
pub struct IterationBuffers<B> {
    pub state: PingPong<B>,
    pub reduction: B,
}

/// The elementwise update a solve relaxes with.
pub enum Relaxation<'a, B> {
    /// Dense `Ax = b`; `matrix` is row-major with stride `dimension`.
    Dense {
        matrix: &'a B,
        rhs: &'a B,
        dimension: u32,
    },
    /// Natural-spline moment recurrence over `knots` entries.
    Spline { rhs: &'a B, knots: u32 },
}

impl<'a, B: DeviceBuffer> Relaxation<'a, B> {
    fn bind(&self, dst: &'a B, src: &'a B, size: PaddedSize) -> Result<KernelCall<'a, B>> {
        match *self {
            Relaxation::Dense {
                matrix,
                rhs,
                dimension,
            } => KernelArgs::new(Kernel::JacobiStep)
                .buffer(matrix)
                .buffer(rhs)
                .buffer(dst)
                .buffer(src)
                .uint(dimension)
                .bind(size),
            Relaxation::Spline { rhs, knots } => KernelArgs::new(Kernel::JacobiSplineStep)
                .buffer(rhs)
                .buffer(src)
                .buffer(dst)
                .uint(knots)
                .bind(size),
        }
    }

    fn len(&self) -> usize {
        match *self {
            Relaxation::Dense { dimension, .. } => dimension as usize,
            Relaxation::Spline { knots, .. } => knots as usize,
        }
    }
}

/// Sequences the relaxation loop for one solve.
pub struct Orchestrator<'b, B: ComputeBackend> {
    backend: &'b B,
    size: PaddedSize,
    epsilon: f64,
    max_iterations: u32,
    state: SolveState,
    iterations: u32,
    residual: f64,
    buffers: Option<IterationBuffers<B::Buffer>>,
}

impl<'b, B: ComputeBackend> Orchestrator<'b, B> {
    pub fn new(backend: &'b B, size: PaddedSize, epsilon: f64, max_iterations: u32) -> Self {
        Self {
            backend,
            size,
            epsilon,
            max_iterations,
            state: SolveState::Uninitialized,
            iterations: 0,
            residual: f64::INFINITY,
            buffers: None,
        }
    }

    pub fn state(&self) -> SolveState {
        self.state
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn residual(&self) -> f64 {
        self.residual
    }

    pub fn size(&self) -> PaddedSize {
        self.size
    }

    /// Allocate the ping-pong pair and reduction buffer and zero both slots
    /// with the `init` kernel.
    pub fn initialize(&mut self, mut stats: Option<&mut Stats>) -> Result<()> {
        if self.state != SolveState::Uninitialized {
            return Err(JacobiError::Device(format!(
                "orchestrator initialized twice (state {:?})",
                self.state
            )));
        }
        let backend = self.backend;
        let global = self.size.global;
        let x_old = backend.create_buffer("x_old", global, BufferAccess::ReadWrite)?;
        let x_new = backend.create_buffer("x_new", global, BufferAccess::ReadWrite)?;
        let reduction = backend.create_buffer(
            "reduction",
            2 * self.size.work_groups(),
            BufferAccess::ReadWrite,
        )?;

        for slot in [&x_old, &x_new] {
            let call = KernelArgs::new(Kernel::Init).buffer(slot).bind(self.size)?;
            backend.dispatch(&call)?;
        }
        if let Some(ref mut s) = stats {
            s.dispatches += 2;
        }

        self.buffers = Some(IterationBuffers {
            state: PingPong::new(x_old, x_new),
            reduction,
        });
        self.state = SolveState::Initialized;
        Ok(())
    }

    /// One full iteration: sweep, read the reduction, decide.
    pub fn step(
        &mut self,
        relaxation: &Relaxation<'_, B::Buffer>,
        mut stats: Option<&mut Stats>,
    ) -> Result<SolveState> {
        match self.state {
            SolveState::Initialized | SolveState::Iterating => {}
            state => {
                return Err(JacobiError::Device(format!("cannot step in state {state:?}")));
            }
        }
        if relaxation.len() > self.size.global {
            return Err(JacobiError::DimensionMismatch {
                what: "relaxation",
                expected: self.size.global,
                actual: relaxation.len(),
            });
        }

        self.dispatch_sweep(relaxation)?;
        if let Some(ref mut s) = stats {
            s.dispatches += 3;
        }
        self.residual = self.read_reduction()?;
        if let Some(ref mut s) = stats {
            s.readbacks += 1;
        }
        self.iterations += 1;
        self.state = self.decide();

        tracing::trace!(iteration = self.iterations, residual = self.residual, "sweep");
        Ok(self.state)
    }

    /// Step until a terminal state.
    pub fn run(
        &mut self,
        relaxation: &Relaxation<'_, B::Buffer>,
        mut stats: Option<&mut Stats>,
    ) -> Result<SolveState> {
        if self.state == SolveState::Uninitialized {
            self.initialize(stats.as_deref_mut())?;
        }
        let t = Instant::now();
        while !self.state.is_terminal() {
            self.step(relaxation, stats.as_deref_mut())?;
        }
        if let Some(ref mut s) = stats {
            s.add_phase("relaxation", t.elapsed());
            s.iterations += self.iterations;
        }

        match self.state {
            SolveState::Converged => tracing::debug!(
                iterations = self.iterations,
                residual = self.residual,
                "relaxation converged"
            ),
            _ => tracing::warn!(
                iterations = self.iterations,
                residual = self.residual,
                epsilon = self.epsilon,
                "relaxation hit the iteration cap before reaching tolerance"
            ),
        }
        Ok(self.state)
    }

    /// The buffer holding the latest iterate.
    pub fn solution(&self) -> Result<&B::Buffer> {
        Ok(self.buffers()?.state.current())
    }

    /// Read back the latest iterate, truncated to the first `len` entries.
    pub fn materialize(&self, len: usize, mut stats: Option<&mut Stats>) -> Result<Vec<f64>> {
        let values = self.backend.read_buffer(self.solution()?)?;
        if let Some(ref mut s) = stats {
            s.readbacks += 1;
        }
        if values.len() < len {
            return Err(JacobiError::DimensionMismatch {
                what: "solution",
                expected: len,
                actual: values.len(),
            });
        }
        Ok(values[..len].iter().map(|&v| v as f64).collect())
    }

    /// Materialize and package the terminal state as a `SolveResult`.
    pub fn finish(&self, len: usize, stats: Option<&mut Stats>) -> Result<SolveResult> {
        if !self.state.is_terminal() {
            return Err(JacobiError::Device(format!(
                "solve not finished (state {:?})",
                self.state
            )));
        }
        Ok(SolveResult {
            values: self.materialize(len, stats)?,
            iterations_used: self.iterations,
            converged: self.state == SolveState::Converged,
            final_residual: self.residual,
        })
    }

    fn buffers(&self) -> Result<&IterationBuffers<B::Buffer>> {
        self.buffers
            .as_ref()
            .ok_or_else(|| JacobiError::Device("iteration buffers not allocated".into()))
    }

    fn dispatch_sweep(&mut self, relaxation: &Relaxation<'_, B::Buffer>) -> Result<()> {
        let backend = self.backend;
        let size = self.size;
        let buffers = self
            .buffers
            .as_mut()
            .ok_or_else(|| JacobiError::Device("iteration buffers not allocated".into()))?;

        for _ in 0..2 {
            {
                let pair = &buffers.state;
                let call = relaxation.bind(pair.next(), pair.current(), size)?;
                backend.dispatch(&call)?;
            }
            buffers.state.swap();
        }
        debug_assert!(buffers.state.at_rest());

        let (x_old, x_new) = buffers.state.slots();
        let call = KernelArgs::new(Kernel::Difference)
            .buffer(x_old)
            .buffer(x_new)
            .buffer(&buffers.reduction)
            .local_scratch(size.local)
            .bind(size)?;
        backend.dispatch(&call)
    }

    fn read_reduction(&self) -> Result<f64> {
        let partials = self.backend.read_buffer(&self.buffers()?.reduction)?;
        let groups = self.size.work_groups();
        if partials.len() < 2 * groups {
            return Err(JacobiError::DimensionMismatch {
                what: "reduction",
                expected: 2 * groups,
                actual: partials.len(),
            });
        }
        let (deltas, norms) = partials.split_at(groups);
        let delta: f64 = deltas.iter().map(|&p| p as f64).sum();
        let norm: f64 = norms[..groups].iter().map(|&p| p as f64).sum();
        Ok(relative_residual(delta, norm))
    }

    fn decide(&self) -> SolveState {
        if self.residual <= self.epsilon {
            SolveState::Converged
        } else if self.iterations >= self.max_iterations {
            SolveState::MaxIterExceeded
        } else {
            SolveState::Iterating
        }
    }
}

/// Change between iterates relative to the iterate's size. Below unit norm
/// the change is taken as is, so a zero solution still converges. An
/// overflowed norm yields NaN, which never converges.
pub fn relative_residual(delta: f64, norm: f64) -> f64 {
    if !norm.is_finite() {
        return f64::NAN;
    }
    delta / norm.max(1.0)
}
