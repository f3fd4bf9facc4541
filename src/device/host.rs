//! Host reference device.
//!
//! Executes the same kernel contracts as the WGSL program, in f32, on the
//! calling machine. Elementwise kernels fan out over work-items with rayon;
//! the reduction walks each work-group with the same halving fold as the
//! shader so partial sums match the device bit for bit in ordering. Buffer
//! extents are checked by the binder before a call gets here.

use std::cell::{Cell, Ref, RefCell, RefMut};

use rayon::prelude::*;

use crate::error::{JacobiError, Result};

use super::kernel::{Kernel, KernelCall, MAX_LOCAL_SIZE};
use super::{BufferAccess, ComputeBackend, DeviceBuffer};

/// A host-resident buffer with declared access mode.
pub struct HostBuffer {
    data: RefCell<Vec<f32>>,
    len: usize,
    access: BufferAccess,
    label: &'static str,
}

impl HostBuffer {
    fn read(&self) -> Result<Ref<'_, Vec<f32>>> {
        self.data
            .try_borrow()
            .map_err(|_| JacobiError::Device(format!("buffer `{}` is being written", self.label)))
    }

    fn write(&self) -> Result<RefMut<'_, Vec<f32>>> {
        self.data
            .try_borrow_mut()
            .map_err(|_| JacobiError::Device(format!("buffer `{}` is already bound", self.label)))
    }
}

impl DeviceBuffer for HostBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn access(&self) -> BufferAccess {
        self.access
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

/// Host implementation of `ComputeBackend`.
pub struct HostBackend {
    max_work_group_size: usize,
    dispatches: Cell<u32>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_max_work_group_size(MAX_LOCAL_SIZE)
    }

    /// Emulate a device with a smaller work-group limit, which forces
    /// padding and multi-group reductions on small problems.
    pub fn with_max_work_group_size(max: usize) -> Self {
        Self {
            max_work_group_size: max.clamp(1, MAX_LOCAL_SIZE),
            dispatches: Cell::new(0),
        }
    }

    /// Number of kernels executed so far.
    pub fn dispatch_count(&self) -> u32 {
        self.dispatches.get()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for HostBackend {
    type Buffer = HostBuffer;

    fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }

    fn create_buffer(&self, label: &'static str, len: usize, access: BufferAccess) -> Result<HostBuffer> {
        Ok(HostBuffer {
            data: RefCell::new(vec![0.0; len]),
            len,
            access,
            label,
        })
    }

    fn write_buffer(&self, buffer: &HostBuffer, data: &[f32]) -> Result<()> {
        let mut dst = buffer.write()?;
        if data.len() > dst.len() {
            return Err(JacobiError::DimensionMismatch {
                what: buffer.label,
                expected: dst.len(),
                actual: data.len(),
            });
        }
        dst[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &HostBuffer) -> Result<Vec<f32>> {
        Ok(buffer.read()?.clone())
    }

    fn dispatch(&self, call: &KernelCall<'_, HostBuffer>) -> Result<()> {
        if call.size().local > self.max_work_group_size {
            return Err(JacobiError::Device(format!(
                "local size {} exceeds device limit {}",
                call.size().local,
                self.max_work_group_size
            )));
        }
        self.dispatches.set(self.dispatches.get() + 1);

        match call.kernel() {
            Kernel::Init => {
                call.buffer(0)?.write()?.fill(0.0);
            }
            Kernel::InitRhs => {
                let y = call.buffer(0)?.read()?;
                let mut rhs = call.buffer(1)?.write()?;
                let h = call.float(2)?;
                let n = call.uint(3)? as usize;
                let y: &[f32] = &y;
                rhs.par_iter_mut().enumerate().for_each(|(i, out)| {
                    *out = if i == 0 || i + 1 >= n {
                        0.0
                    } else {
                        6.0 / (h * h) * (y[i - 1] - 2.0 * y[i] + y[i + 1])
                    };
                });
            }
            Kernel::JacobiStep => {
                let a = call.buffer(0)?.read()?;
                let b = call.buffer(1)?.read()?;
                let mut dst = call.buffer(2)?.write()?;
                let src = call.buffer(3)?.read()?;
                let n = call.uint(4)? as usize;
                let (a, b, src): (&[f32], &[f32], &[f32]) = (&a, &b, &src);
                if a.len() < n * n || b.len() < n || src.len() < n {
                    return Err(JacobiError::Device(format!(
                        "jacobi_step inputs too short for dimension {n}"
                    )));
                }
                dst.par_iter_mut().enumerate().for_each(|(i, out)| {
                    if i >= n {
                        *out = 0.0;
                        return;
                    }
                    let row = &a[i * n..(i + 1) * n];
                    let mut sigma = 0.0f32;
                    for (j, (&aij, &xj)) in row.iter().zip(src).enumerate() {
                        if j != i {
                            sigma += aij * xj;
                        }
                    }
                    *out = (b[i] - sigma) / row[i];
                });
            }
            Kernel::JacobiSplineStep => {
                let rhs = call.buffer(0)?.read()?;
                let src = call.buffer(1)?.read()?;
                let mut dst = call.buffer(2)?.write()?;
                let n = call.uint(3)? as usize;
                let (rhs, src): (&[f32], &[f32]) = (&rhs, &src);
                dst.par_iter_mut().enumerate().for_each(|(i, out)| {
                    *out = if i == 0 || i + 1 >= n {
                        0.0
                    } else {
                        (rhs[i] - src[i - 1] - src[i + 1]) * 0.25
                    };
                });
            }
            Kernel::Difference => {
                let a = call.buffer(0)?.read()?;
                let b = call.buffer(1)?.read()?;
                let mut partials = call.buffer(2)?.write()?;
                let local = call.size().local;
                let groups = call.size().work_groups();
                let (a, b): (&[f32], &[f32]) = (&a, &b);
                let (deltas, norms) = partials.split_at_mut(groups);
                deltas
                    .par_iter_mut()
                    .zip(norms.par_iter_mut())
                    .enumerate()
                    .for_each(|(group, (delta, norm))| {
                        let lanes = (0..local).map(|lid| {
                            let i = group * local + lid;
                            match (a.get(i), b.get(i)) {
                                (Some(x), Some(y)) => ((x - y).abs(), x.abs()),
                                _ => (0.0, 0.0),
                            }
                        });
                        let (changes, magnitudes): (Vec<f32>, Vec<f32>) = lanes.unzip();
                        *delta = fold_work_group(changes);
                        *norm = fold_work_group(magnitudes);
                    });
            }
            Kernel::ComputeAb => {
                let y = call.buffer(0)?.read()?;
                let c = call.buffer(1)?.read()?;
                let mut a_out = call.buffer(2)?.write()?;
                let mut b_out = call.buffer(3)?.write()?;
                let h = call.float(4)?;
                let n = call.uint(5)? as usize;
                let (y, c): (&[f32], &[f32]) = (&y, &c);
                a_out
                    .par_iter_mut()
                    .zip(b_out.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, (a, b))| {
                        if i == 0 || i >= n {
                            *a = 0.0;
                            *b = 0.0;
                        } else {
                            *a = 0.5 * (y[i - 1] + y[i]) - h * h * (c[i - 1] + c[i]) / 12.0;
                            *b = (y[i] - y[i - 1]) / h - h * (c[i] - c[i - 1]) / 6.0;
                        }
                    });
            }
            Kernel::Interpolate => {
                let a = call.buffer(0)?.read()?;
                let b = call.buffer(1)?.read()?;
                let c = call.buffer(2)?.read()?;
                let mut out = call.buffer(3)?.write()?;
                let h = call.float(4)?;
                let domain_min = call.float(5)?;
                let domain_delta = call.float(6)?;
                let knots = call.uint(7)? as usize;
                let samples = call.uint(8)? as usize;
                if knots < 2 {
                    return Err(JacobiError::Device(format!(
                        "interpolate needs at least two knots, got {knots}"
                    )));
                }
                let last = knots - 1;
                let (a, b, c): (&[f32], &[f32], &[f32]) = (&a, &b, &c);
                out.par_iter_mut().enumerate().for_each(|(k, out)| {
                    if k >= samples {
                        *out = 0.0;
                        return;
                    }
                    let x = domain_min + k as f32 * domain_delta;
                    let i = ((x / h).floor().max(0.0) as usize + 1).clamp(1, last);
                    let lower = (i - 1) as f32 * h;
                    let upper = lower + h;
                    let left = x - lower;
                    let right = upper - x;
                    *out = c[i] / (6.0 * h) * left * left * left
                        + c[i - 1] / (6.0 * h) * right * right * right
                        + b[i] * (x - 0.5 * (lower + upper))
                        + a[i];
                });
            }
        }
        Ok(())
    }
}

/// Sum one work-group's lanes in the order the shader's halving fold does.
fn fold_work_group(mut scratch: Vec<f32>) -> f32 {
    let mut span = scratch.len();
    while span > 1 {
        let keep = span.div_ceil(2);
        for lid in 0..span - keep {
            scratch[lid] += scratch[lid + keep];
        }
        span = keep;
    }
    scratch.first().copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{KernelArgs, PaddedSize};

    #[test]
    fn difference_sums_per_work_group() {
        let backend = HostBackend::with_max_work_group_size(4);
        let size = PaddedSize::plan(10, backend.max_work_group_size());
        assert_eq!(size.global, 12);
        let a = backend
            .upload("a", &[1.0; 10], size.global, BufferAccess::ReadWrite)
            .unwrap();
        let b = backend
            .upload("b", &[0.5; 10], size.global, BufferAccess::ReadWrite)
            .unwrap();
        let partials = backend
            .create_buffer("partials", 2 * size.work_groups(), BufferAccess::ReadWrite)
            .unwrap();
        let call = KernelArgs::new(Kernel::Difference)
            .buffer(&a)
            .buffer(&b)
            .buffer(&partials)
            .local_scratch(size.local)
            .bind(size)
            .unwrap();
        backend.dispatch(&call).unwrap();
        // |a - b| per group, then |a| per group
        assert_eq!(
            backend.read_buffer(&partials).unwrap(),
            vec![2.0, 2.0, 1.0, 4.0, 4.0, 2.0]
        );
    }

    #[test]
    fn init_zero_fills() {
        let backend = HostBackend::new();
        let buf = backend
            .upload("x", &[3.0, 4.0, 5.0], 3, BufferAccess::ReadWrite)
            .unwrap();
        let call = KernelArgs::new(Kernel::Init)
            .buffer(&buf)
            .bind(PaddedSize::plan(3, 256))
            .unwrap();
        backend.dispatch(&call).unwrap();
        assert_eq!(backend.read_buffer(&buf).unwrap(), vec![0.0; 3]);
        assert_eq!(backend.dispatch_count(), 1);
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let backend = HostBackend::new();
        let buf = backend.create_buffer("x", 2, BufferAccess::ReadWrite).unwrap();
        assert!(backend.write_buffer(&buf, &[1.0, 2.0, 3.0]).is_err());
    }
}
