//! Compute device abstraction.
//!
//! Defines the `ComputeBackend` trait the iteration orchestrator is written
//! against, with two implementations: `Context` (wgpu compute shaders) and
//! `HostBackend` (the same kernel contracts executed on the host).

pub mod context;
pub mod host;
pub mod kernel;
pub mod planner;
pub mod shaders;

use crate::error::Result;

pub use context::Context;
pub use host::HostBackend;
pub use kernel::{Kernel, KernelArgs, KernelCall};
pub use planner::{round_up, PaddedSize, PaddedSize2d};

/// Declared access mode of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl BufferAccess {
    pub fn writable(self) -> bool {
        !matches!(self, BufferAccess::ReadOnly)
    }
}

/// Metadata every backend buffer exposes so kernel arguments can be
/// validated before dispatch.
pub trait DeviceBuffer {
    fn len(&self) -> usize;
    fn access(&self) -> BufferAccess;
    fn label(&self) -> &'static str;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Abstract compute device operating on f32 buffers.
///
/// Dispatches are issued in order on a single queue. `read_buffer` is the
/// only blocking operation and observes every dispatch issued before it.
pub trait ComputeBackend {
    type Buffer: DeviceBuffer;

    /// Largest local work-group size this backend accepts for 1-D dispatches.
    fn max_work_group_size(&self) -> usize;

    /// Allocate a zero-filled buffer of `len` f32 elements.
    fn create_buffer(&self, label: &'static str, len: usize, access: BufferAccess) -> Result<Self::Buffer>;

    /// Upload `data` to the start of `buffer`. Remaining elements are untouched.
    fn write_buffer(&self, buffer: &Self::Buffer, data: &[f32]) -> Result<()>;

    /// Blocking read of the whole buffer.
    fn read_buffer(&self, buffer: &Self::Buffer) -> Result<Vec<f32>>;

    /// Enqueue one validated kernel dispatch.
    fn dispatch(&self, call: &KernelCall<'_, Self::Buffer>) -> Result<()>;

    /// Create a buffer and upload `data`, zero-padding up to `len`.
    fn upload(
        &self,
        label: &'static str,
        data: &[f32],
        len: usize,
        access: BufferAccess,
    ) -> Result<Self::Buffer> {
        let buffer = self.create_buffer(label, len.max(data.len()), access)?;
        self.write_buffer(&buffer, data)?;
        Ok(buffer)
    }
}
