//! wgpu device context.
//!
//! Owns the selected adapter's device and queue together with the compiled
//! program. The program is compiled once per local work-group size, with
//! `WG_SIZE` overridden for that size, and pipelines are cached per
//! `(kernel, local)` pair. A shader module is never shared between local
//! sizes.

use std::collections::HashMap;
use std::sync::Mutex;

use wgpu::util::DeviceExt;

use crate::config::DeviceSelector;
use crate::error::{JacobiError, Result};

use super::kernel::{Kernel, KernelArg, KernelCall, MAX_LOCAL_SIZE};
use super::shaders;
use super::{BufferAccess, ComputeBackend, DeviceBuffer};

/// Local size the program is validated with when the context is opened.
const VALIDATION_LOCAL_SIZE: usize = 64;

/// A device buffer wrapping a `wgpu::Buffer` with element count metadata.
pub struct GpuBuffer {
    pub(crate) buffer: wgpu::Buffer,
    len: usize,
    access: BufferAccess,
    label: &'static str,
}

impl DeviceBuffer for GpuBuffer {
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

/// Compute context: device, queue, and the compiled relaxation program.
pub struct Context {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    max_work_group_size: usize,
    programs: Mutex<Programs>,
}

/// Shader modules keyed by local size and the pipelines built from them.
#[derive(Default)]
struct Programs {
    modules: HashMap<usize, wgpu::ShaderModule>,
    pipelines: HashMap<(Kernel, usize), wgpu::ComputePipeline>,
}

impl Programs {
    /// Build the module for `local` and every kernel's pipeline from it.
    /// Validation errors surface through the caller's error scope.
    fn compile(&mut self, device: &wgpu::Device, local: usize) {
        let module = compile_module(device, local);
        for kernel in Kernel::ALL {
            self.pipelines
                .insert((kernel, local), build_pipeline(device, &module, kernel, local));
        }
        self.modules.insert(local, module);
    }
}

impl Context {
    /// Select a device and compile the program.
    ///
    /// Fails with `DeviceUnavailable` when no adapter matches `selector`, and
    /// with `CompileError` when the program does not validate. No context is
    /// returned in either case.
    pub fn open(selector: &DeviceSelector) -> Result<Self> {
        pollster::block_on(Self::open_async(selector))
    }

    async fn open_async(selector: &DeviceSelector) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        for adapter in &adapters {
            let info = adapter.get_info();
            tracing::debug!(name = %info.name, backend = ?info.backend, device_type = ?info.device_type, "found adapter");
        }

        let adapter = adapters
            .into_iter()
            .filter(|adapter| selector.accepts(&adapter.get_info().name))
            .max_by_key(|adapter| throughput_rank(&adapter.get_info(), &adapter.limits()))
            .ok_or_else(|| JacobiError::DeviceUnavailable(format!("no adapter matches {selector}")))?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        tracing::info!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected compute device"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("jacobi_relax"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| JacobiError::DeviceUnavailable(format!("failed to open device: {e}")))?;

        let max_work_group_size = (limits.max_compute_invocations_per_workgroup as usize)
            .min(limits.max_compute_workgroup_size_x as usize)
            .min(MAX_LOCAL_SIZE);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut programs = Programs::default();
        programs.compile(&device, VALIDATION_LOCAL_SIZE.min(max_work_group_size));
        if let Some(err) = device.pop_error_scope().await {
            return Err(JacobiError::CompileError(err.to_string()));
        }

        Ok(Self {
            device,
            queue,
            adapter_info,
            max_work_group_size,
            programs: Mutex::new(programs),
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn pipeline(&self, kernel: Kernel, local: usize) -> Result<wgpu::ComputePipeline> {
        let mut programs = self
            .programs
            .lock()
            .map_err(|_| JacobiError::Device("pipeline cache poisoned".into()))?;
        if let Some(pipeline) = programs.pipelines.get(&(kernel, local)) {
            return Ok(pipeline.clone());
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        programs.compile(&self.device, local);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            programs.modules.remove(&local);
            programs.pipelines.retain(|&(_, l), _| l != local);
            return Err(JacobiError::CompileError(format!(
                "program at local size {local}: {err}"
            )));
        }
        tracing::debug!(local, "compiled program for local size");
        programs
            .pipelines
            .get(&(kernel, local))
            .cloned()
            .ok_or_else(|| JacobiError::Device(format!("no pipeline for {}", kernel.entry_point())))
    }

    /// Number of local sizes the program has been compiled for.
    pub fn compiled_local_sizes(&self) -> usize {
        self.programs.lock().map(|p| p.modules.len()).unwrap_or(0)
    }
}

fn compile_module(device: &wgpu::Device, local: usize) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("jacobi_relax_shaders_wg{local}")),
        source: wgpu::ShaderSource::Wgsl(shaders::SHADER_SOURCE.into()),
    })
}

fn build_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    kernel: Kernel,
    local: usize,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(kernel.entry_point()),
        layout: None,
        module,
        entry_point: Some(kernel.entry_point()),
        compilation_options: wgpu::PipelineCompilationOptions {
            constants: &[("WG_SIZE", local as f64)],
            zero_initialize_workgroup_memory: true,
        },
        cache: None,
    })
}

/// Rank adapters by estimated floating-point throughput: hardware class
/// first, then how much parallel work a single dispatch may carry.
fn throughput_rank(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> (u8, u32, u32, u64) {
    let class = match info.device_type {
        wgpu::DeviceType::DiscreteGpu => 4,
        wgpu::DeviceType::IntegratedGpu => 3,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Other => 1,
        wgpu::DeviceType::Cpu => 0,
    };
    (
        class,
        limits.max_compute_invocations_per_workgroup,
        limits.max_compute_workgroups_per_dimension,
        limits.max_storage_buffer_binding_size as u64,
    )
}

/// Read a device buffer back to the host as f32 values.
fn read_buffer_f32(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<f32>> {
    let size = (count * std::mem::size_of::<f32>()) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("read_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&Default::default());
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = sender.send(r);
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| JacobiError::Device(format!("device poll failed: {e}")))?;
    receiver
        .recv()
        .map_err(|e| JacobiError::Device(format!("readback channel closed: {e}")))?
        .map_err(|e| JacobiError::Device(format!("buffer map failed: {e}")))?;

    let data = slice.get_mapped_range();
    let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(result)
}

impl ComputeBackend for Context {
    type Buffer = GpuBuffer;

    fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }

    fn create_buffer(&self, label: &'static str, len: usize, access: BufferAccess) -> Result<GpuBuffer> {
        let zeros = vec![0.0f32; len.max(1)];
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&zeros),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        Ok(GpuBuffer {
            buffer,
            len,
            access,
            label,
        })
    }

    fn write_buffer(&self, buffer: &GpuBuffer, data: &[f32]) -> Result<()> {
        if data.len() > buffer.len {
            return Err(JacobiError::DimensionMismatch {
                what: buffer.label,
                expected: buffer.len,
                actual: data.len(),
            });
        }
        if !data.is_empty() {
            self.queue
                .write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(data));
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &GpuBuffer) -> Result<Vec<f32>> {
        let mut values = read_buffer_f32(&self.device, &self.queue, &buffer.buffer, buffer.len.max(1))?;
        values.truncate(buffer.len);
        Ok(values)
    }

    fn dispatch(&self, call: &KernelCall<'_, GpuBuffer>) -> Result<()> {
        let size = call.size();
        if size.local > self.max_work_group_size {
            return Err(JacobiError::Device(format!(
                "local size {} exceeds device limit {}",
                size.local, self.max_work_group_size
            )));
        }
        let pipeline = self.pipeline(call.kernel(), size.local)?;

        let has_scalars = call
            .args()
            .iter()
            .any(|arg| matches!(arg, KernelArg::Uint(_) | KernelArg::Float(_)));
        let params_buf = has_scalars.then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("kernel_params"),
                    contents: bytemuck::cast_slice(&call.uniform_words()),
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = call
            .buffers()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.buffer.as_entire_binding(),
            })
            .collect();
        if let Some(params_buf) = &params_buf {
            let binding = entries.len() as u32;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: params_buf.as_entire_binding(),
            });
        }

        let bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(call.kernel().entry_point()),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });
        let mut encoder = self.device.create_command_encoder(&Default::default());
        {
            let mut pass = encoder.begin_compute_pass(&Default::default());
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, Some(&bg), &[]);
            pass.dispatch_workgroups(size.work_groups() as u32, 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
