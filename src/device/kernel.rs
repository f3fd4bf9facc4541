//! Named kernels and the argument binder.
//!
//! Arguments are collected with `KernelArgs` and checked against the
//! kernel's static signature in `bind`, so arity, kind, access and extent
//! errors are reported before anything reaches the device.

use crate::error::{JacobiError, Result};

use super::planner::PaddedSize;
use super::DeviceBuffer;

/// Capacity of the work-group scratch array in the compiled program.
pub const MAX_LOCAL_SIZE: usize = 256;

/// Entry points of the compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Init,
    InitRhs,
    JacobiStep,
    JacobiSplineStep,
    Difference,
    ComputeAb,
    Interpolate,
}

/// Minimum element count a buffer argument must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extent {
    /// The padded global size of the dispatch.
    Global,
    /// Two partials per work-group.
    Partials,
    /// The value of the `Uint` argument at this index.
    Count(usize),
    /// The square of the `Uint` argument at this index.
    Square(usize),
}

/// One formal parameter of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Buffer the kernel only reads.
    Input,
    /// Buffer the kernel writes.
    Output,
    Uint,
    Float,
    /// Work-group scratch, sized in f32 elements.
    LocalScratch,
}

impl Kernel {
    pub const ALL: [Kernel; 7] = [
        Kernel::Init,
        Kernel::InitRhs,
        Kernel::JacobiStep,
        Kernel::JacobiSplineStep,
        Kernel::Difference,
        Kernel::ComputeAb,
        Kernel::Interpolate,
    ];

    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::Init => "init",
            Kernel::InitRhs => "init_rhs",
            Kernel::JacobiStep => "jacobi_step",
            Kernel::JacobiSplineStep => "jacobi_spline_step",
            Kernel::Difference => "difference",
            Kernel::ComputeAb => "compute_ab",
            Kernel::Interpolate => "interpolate",
        }
    }

    pub fn signature(self) -> &'static [Param] {
        use Param::*;
        match self {
            Kernel::Init => &[Output],
            // y, rhs, h, n
            Kernel::InitRhs => &[Input, Output, Float, Uint],
            // A, b, dst, src, n
            Kernel::JacobiStep => &[Input, Input, Output, Input, Uint],
            // rhs, src, dst, n
            Kernel::JacobiSplineStep => &[Input, Input, Output, Uint],
            // a, b, partials, scratch
            Kernel::Difference => &[Input, Input, Output, LocalScratch],
            // y, c, a_out, b_out, h, n
            Kernel::ComputeAb => &[Input, Input, Output, Output, Float, Uint],
            // a, b, c, out, h, domain_min, domain_delta, knots, samples
            Kernel::Interpolate => &[Input, Input, Input, Output, Float, Float, Float, Uint, Uint],
        }
    }

    /// What the buffer argument at `index` must cover: every element an
    /// output is written at, every element an input is read from.
    fn extent(self, index: usize) -> Extent {
        match (self, index) {
            (Kernel::InitRhs, 0) => Extent::Count(3),
            (Kernel::JacobiStep, 0) => Extent::Square(4),
            (Kernel::JacobiStep, 1 | 3) => Extent::Count(4),
            (Kernel::JacobiSplineStep, 0 | 1) => Extent::Count(3),
            (Kernel::Difference, 0 | 1) => Extent::Global,
            (Kernel::Difference, _) => Extent::Partials,
            (Kernel::ComputeAb, 0 | 1) => Extent::Count(5),
            (Kernel::Interpolate, 0..=2) => Extent::Count(7),
            _ => Extent::Global,
        }
    }
}

/// A single bound argument.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Uint(u32),
    Float(f32),
    LocalScratch(usize),
}

impl<B> Clone for KernelArg<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for KernelArg<'_, B> {}

/// Argument list under construction.
pub struct KernelArgs<'a, B> {
    kernel: Kernel,
    args: Vec<KernelArg<'a, B>>,
}

impl<'a, B: DeviceBuffer> KernelArgs<'a, B> {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            args: Vec::with_capacity(kernel.signature().len()),
        }
    }

    pub fn buffer(mut self, buffer: &'a B) -> Self {
        self.args.push(KernelArg::Buffer(buffer));
        self
    }

    pub fn uint(mut self, value: u32) -> Self {
        self.args.push(KernelArg::Uint(value));
        self
    }

    pub fn float(mut self, value: f32) -> Self {
        self.args.push(KernelArg::Float(value));
        self
    }

    pub fn local_scratch(mut self, elements: usize) -> Self {
        self.args.push(KernelArg::LocalScratch(elements));
        self
    }

    fn resolve(&self, extent: Extent, size: PaddedSize) -> usize {
        let count = |index: usize| match self.args.get(index) {
            Some(KernelArg::Uint(value)) => *value as usize,
            _ => 0,
        };
        match extent {
            Extent::Global => size.global,
            Extent::Partials => 2 * size.work_groups(),
            Extent::Count(index) => count(index),
            Extent::Square(index) => count(index).saturating_mul(count(index)),
        }
    }

    /// Validate against the kernel signature and attach the dispatch shape.
    pub fn bind(self, size: PaddedSize) -> Result<KernelCall<'a, B>> {
        let kernel = self.kernel;
        let fail = |reason: String| JacobiError::ArgumentMismatch {
            kernel: kernel.entry_point(),
            reason,
        };

        let signature = kernel.signature();
        if self.args.len() != signature.len() {
            return Err(fail(format!(
                "expected {} arguments, got {}",
                signature.len(),
                self.args.len()
            )));
        }
        if size.local > MAX_LOCAL_SIZE {
            return Err(fail(format!(
                "local size {} exceeds program limit {MAX_LOCAL_SIZE}",
                size.local
            )));
        }

        for (index, (param, arg)) in signature.iter().zip(&self.args).enumerate() {
            match (param, arg) {
                (Param::Input, KernelArg::Buffer(buffer)) => {
                    if buffer.access() == super::BufferAccess::WriteOnly {
                        return Err(fail(format!(
                            "argument {index} (`{}`) is write-only but read by the kernel",
                            buffer.label()
                        )));
                    }
                    let extent = self.resolve(kernel.extent(index), size);
                    if buffer.len() < extent {
                        return Err(fail(format!(
                            "argument {index} (`{}`) holds {} elements, dispatch reads {extent}",
                            buffer.label(),
                            buffer.len()
                        )));
                    }
                }
                (Param::Output, KernelArg::Buffer(buffer)) => {
                    if !buffer.access().writable() {
                        return Err(fail(format!(
                            "argument {index} (`{}`) is read-only but written by the kernel",
                            buffer.label()
                        )));
                    }
                    let extent = self.resolve(kernel.extent(index), size);
                    if buffer.len() < extent {
                        return Err(fail(format!(
                            "argument {index} (`{}`) holds {} elements, dispatch writes {extent}",
                            buffer.label(),
                            buffer.len()
                        )));
                    }
                    let aliased = self.args.iter().enumerate().any(|(other, arg)| {
                        other != index
                            && matches!(arg, KernelArg::Buffer(b) if std::ptr::eq(*b, *buffer))
                    });
                    if aliased {
                        return Err(fail(format!(
                            "argument {index} (`{}`) is written while bound a second time",
                            buffer.label()
                        )));
                    }
                }
                (Param::Uint, KernelArg::Uint(_)) | (Param::Float, KernelArg::Float(_)) => {}
                (Param::LocalScratch, KernelArg::LocalScratch(elements)) => {
                    if *elements != size.local {
                        return Err(fail(format!(
                            "local scratch of {elements} elements does not match local size {}",
                            size.local
                        )));
                    }
                }
                (param, _) => {
                    return Err(fail(format!("argument {index} does not match {param:?}")));
                }
            }
        }

        Ok(KernelCall {
            kernel,
            args: self.args,
            size,
        })
    }
}

/// A validated dispatch, ready for `ComputeBackend::dispatch`.
pub struct KernelCall<'a, B> {
    kernel: Kernel,
    args: Vec<KernelArg<'a, B>>,
    size: PaddedSize,
}

impl<'a, B> KernelCall<'a, B> {
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn size(&self) -> PaddedSize {
        self.size
    }

    pub fn args(&self) -> &[KernelArg<'a, B>] {
        &self.args
    }

    /// Buffer arguments in declaration order.
    pub fn buffers(&self) -> impl Iterator<Item = &'a B> + '_ {
        self.args.iter().filter_map(|arg| match arg {
            KernelArg::Buffer(buffer) => Some(*buffer),
            _ => None,
        })
    }

    pub fn buffer(&self, index: usize) -> Result<&'a B> {
        match self.args.get(index) {
            Some(KernelArg::Buffer(buffer)) => Ok(*buffer),
            _ => Err(self.missing(index, "buffer")),
        }
    }

    pub fn uint(&self, index: usize) -> Result<u32> {
        match self.args.get(index) {
            Some(KernelArg::Uint(value)) => Ok(*value),
            _ => Err(self.missing(index, "uint")),
        }
    }

    pub fn float(&self, index: usize) -> Result<f32> {
        match self.args.get(index) {
            Some(KernelArg::Float(value)) => Ok(*value),
            _ => Err(self.missing(index, "float")),
        }
    }

    /// Scalar arguments packed as 32-bit words in declaration order,
    /// padded to a 16-byte uniform block.
    pub fn uniform_words(&self) -> Vec<u32> {
        let mut words: Vec<u32> = self
            .args
            .iter()
            .filter_map(|arg| match arg {
                KernelArg::Uint(value) => Some(*value),
                KernelArg::Float(value) => Some(value.to_bits()),
                _ => None,
            })
            .collect();
        let padded = words.len().div_ceil(4).max(1) * 4;
        words.resize(padded, 0);
        words
    }

    fn missing(&self, index: usize, kind: &str) -> JacobiError {
        JacobiError::ArgumentMismatch {
            kernel: self.kernel.entry_point(),
            reason: format!("argument {index} is not a {kind}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferAccess;

    struct FakeBuffer {
        len: usize,
        access: BufferAccess,
    }

    impl DeviceBuffer for FakeBuffer {
        fn len(&self) -> usize {
            self.len
        }
        fn access(&self) -> BufferAccess {
            self.access
        }
        fn label(&self) -> &'static str {
            "fake"
        }
    }

    fn rw(len: usize) -> FakeBuffer {
        FakeBuffer {
            len,
            access: BufferAccess::ReadWrite,
        }
    }

    #[test]
    fn jacobi_step_binds_in_order() {
        let (a, b, dst, src) = (rw(16), rw(4), rw(4), rw(4));
        let size = PaddedSize::plan(4, 256);
        let call = KernelArgs::new(Kernel::JacobiStep)
            .buffer(&a)
            .buffer(&b)
            .buffer(&dst)
            .buffer(&src)
            .uint(4)
            .bind(size)
            .unwrap();
        assert_eq!(call.buffers().count(), 4);
        assert!(std::ptr::eq(call.buffer(2).unwrap(), &dst));
        assert_eq!(call.uint(4).unwrap(), 4);
        assert_eq!(call.uniform_words(), vec![4, 0, 0, 0]);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let buf = rw(4);
        let err = KernelArgs::new(Kernel::Init)
            .buffer(&buf)
            .uint(1)
            .bind(PaddedSize::plan(4, 256))
            .err()
            .unwrap();
        assert!(matches!(err, JacobiError::ArgumentMismatch { kernel: "init", .. }));
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let (y, rhs) = (rw(4), rw(4));
        let err = KernelArgs::new(Kernel::InitRhs)
            .buffer(&y)
            .buffer(&rhs)
            .uint(3)
            .uint(4)
            .bind(PaddedSize::plan(4, 256));
        assert!(err.is_err());
    }

    #[test]
    fn aliased_destination_is_rejected() {
        let (rhs, c) = (rw(8), rw(8));
        let err = KernelArgs::new(Kernel::JacobiSplineStep)
            .buffer(&rhs)
            .buffer(&c)
            .buffer(&c)
            .uint(8)
            .bind(PaddedSize::plan(8, 256));
        assert!(err.is_err());
    }

    #[test]
    fn read_only_destination_is_rejected() {
        let y = FakeBuffer {
            len: 8,
            access: BufferAccess::ReadOnly,
        };
        let err = KernelArgs::new(Kernel::Init).buffer(&y).bind(PaddedSize::plan(8, 256));
        assert!(err.is_err());
    }

    #[test]
    fn short_destination_is_rejected() {
        let out = rw(3);
        let err = KernelArgs::new(Kernel::Init).buffer(&out).bind(PaddedSize::plan(8, 4));
        assert!(err.is_err());
    }

    fn mismatch_reason<B>(result: Result<KernelCall<'_, B>>) -> String {
        match result {
            Err(JacobiError::ArgumentMismatch { reason, .. }) => reason,
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("binding succeeded"),
        }
    }

    #[test]
    fn short_spline_rhs_is_rejected() {
        let (rhs, src, dst) = (rw(2), rw(8), rw(8));
        let result = KernelArgs::new(Kernel::JacobiSplineStep)
            .buffer(&rhs)
            .buffer(&src)
            .buffer(&dst)
            .uint(8)
            .bind(PaddedSize::plan(8, 256));
        assert!(mismatch_reason(result).contains("dispatch reads 8"));
    }

    #[test]
    fn short_dense_matrix_is_rejected() {
        let (a, b, dst, src) = (rw(15), rw(4), rw(4), rw(4));
        let result = KernelArgs::new(Kernel::JacobiStep)
            .buffer(&a)
            .buffer(&b)
            .buffer(&dst)
            .buffer(&src)
            .uint(4)
            .bind(PaddedSize::plan(4, 256));
        assert!(mismatch_reason(result).contains("dispatch reads 16"));
    }

    #[test]
    fn short_knot_buffers_are_rejected() {
        let (y, rhs) = (rw(5), rw(8));
        let result = KernelArgs::new(Kernel::InitRhs)
            .buffer(&y)
            .buffer(&rhs)
            .float(0.5)
            .uint(6)
            .bind(PaddedSize::plan(6, 4));
        assert!(mismatch_reason(result).contains("argument 0"));

        let (y, c, a_out, b_out) = (rw(6), rw(3), rw(8), rw(8));
        let result = KernelArgs::new(Kernel::ComputeAb)
            .buffer(&y)
            .buffer(&c)
            .buffer(&a_out)
            .buffer(&b_out)
            .float(0.5)
            .uint(6)
            .bind(PaddedSize::plan(6, 4));
        assert!(mismatch_reason(result).contains("argument 1"));
    }

    #[test]
    fn short_coefficients_are_rejected_for_sampling() {
        let (a, b, c, out) = (rw(4), rw(4), rw(3), rw(8));
        let result = KernelArgs::new(Kernel::Interpolate)
            .buffer(&a)
            .buffer(&b)
            .buffer(&c)
            .buffer(&out)
            .float(2.0)
            .float(0.0)
            .float(0.5)
            .uint(4)
            .uint(8)
            .bind(PaddedSize::plan(8, 256));
        assert!(mismatch_reason(result).contains("argument 2"));
    }

    #[test]
    fn difference_needs_two_partials_per_group() {
        let (a, b, partials) = (rw(8), rw(8), rw(3));
        let result = KernelArgs::new(Kernel::Difference)
            .buffer(&a)
            .buffer(&b)
            .buffer(&partials)
            .local_scratch(4)
            .bind(PaddedSize::plan(8, 4));
        assert!(mismatch_reason(result).contains("dispatch writes 4"));
    }

    #[test]
    fn scratch_must_match_local_size() {
        let (a, b, partials) = (rw(8), rw(8), rw(4));
        let size = PaddedSize::plan(8, 4);
        assert!(KernelArgs::new(Kernel::Difference)
            .buffer(&a)
            .buffer(&b)
            .buffer(&partials)
            .local_scratch(8)
            .bind(size)
            .is_err());
        assert!(KernelArgs::new(Kernel::Difference)
            .buffer(&a)
            .buffer(&b)
            .buffer(&partials)
            .local_scratch(4)
            .bind(size)
            .is_ok());
    }

    #[test]
    fn floats_pack_as_bits() {
        let (a, b, c, out) = (rw(4), rw(4), rw(4), rw(8));
        let call = KernelArgs::new(Kernel::Interpolate)
            .buffer(&a)
            .buffer(&b)
            .buffer(&c)
            .buffer(&out)
            .float(2.0)
            .float(0.0)
            .float(0.5)
            .uint(4)
            .uint(8)
            .bind(PaddedSize::plan(8, 256))
            .unwrap();
        let words = call.uniform_words();
        assert_eq!(words.len(), 8);
        assert_eq!(f32::from_bits(words[0]), 2.0);
        assert_eq!(f32::from_bits(words[2]), 0.5);
        assert_eq!(words[4], 8);
    }
}
