//! GPU context negotiation and the wgpu-backed device.
//!
//! [`WgpuPlatform`] performs the two-step handshake (adapter, then
//! device) and yields a [`GpuContext`], a thin wrapper around wgpu's
//! instance, adapter, device and queue.  `GpuContext` implements
//! [`ComputeDevice`] by translating the dispatcher's command batch into
//! a wgpu command encoder.  The `new_blocking` constructor hides the
//! asynchronous requests behind [`pollster`].

use log::{debug, info};
use wgpu::{Adapter, BufferUsages, Device, Instance, Queue};

use crate::buffer;
use crate::config::DispatcherOptions;
use crate::device::{Command, CommandBatch, ComputeDevice, ComputePlatform};
use crate::error::DispatchError;
use crate::kernel::Kernel;

/// The real platform: whatever backends wgpu finds on this machine.
#[derive(Debug, Clone, Default)]
pub struct WgpuPlatform {
    options: DispatcherOptions,
}

impl WgpuPlatform {
    pub fn new(options: DispatcherOptions) -> Self {
        Self { options }
    }
}

impl ComputePlatform for WgpuPlatform {
    type Device = GpuContext;

    async fn request_device(&self) -> Result<GpuContext, DispatchError> {
        GpuContext::new_async(&self.options).await
    }
}

/// A GPU context encapsulates all state needed to submit compute work.
///
/// The context holds on to the `Instance`, `Adapter`, `Device` and
/// `Queue`.  Those types have internal reference counting so they can
/// cheaply be cloned if you need multiple references.
pub struct GpuContext {
    pub instance: Instance,
    /// The physical device selected for computation.
    pub adapter: Adapter,
    /// Logical device used to create resources and command encoders.
    pub device: Device,
    /// Command submission queue used to send recorded command buffers
    /// to the GPU.
    pub queue: Queue,
}

/// Compiled pipeline together with the layout its bind groups must use.
pub struct GpuPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl GpuContext {
    /// Create a new GPU context synchronously.
    ///
    /// Blocks the current thread while the adapter and device requests
    /// complete.
    pub fn new_blocking(options: &DispatcherOptions) -> Result<Self, DispatchError> {
        pollster::block_on(Self::new_async(options))
    }

    /// Create a new GPU context asynchronously.
    ///
    /// Fails with [`DispatchError::PlatformUnavailable`] if no adapter is
    /// found or the adapter cannot run compute shaders, and with
    /// [`DispatchError::DeviceUnavailable`] if the device request is
    /// refused.
    pub async fn new_async(options: &DispatcherOptions) -> Result<Self, DispatchError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                force_fallback_adapter: options.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .map_err(|e| {
                debug!("adapter request failed: {e}");
                DispatchError::PlatformUnavailable
            })?;

        // Downlevel backends (WebGL, some GLES drivers) may expose an
        // adapter without compute support.
        let capabilities = adapter.get_downlevel_capabilities();
        if !capabilities.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            debug!("adapter {:?} lacks compute shader support", adapter.get_info().name);
            return Err(DispatchError::PlatformUnavailable);
        }
        let info = adapter.get_info();
        info!("using adapter {} ({:?})", info.name, info.backend);

        let supported = adapter.limits();
        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..wgpu::Limits::downlevel_defaults()
        };
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(options.device_label.as_str()),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| DispatchError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }
}

impl ComputeDevice for GpuContext {
    type Buffer = wgpu::Buffer;
    type Pipeline = GpuPipeline;
    type BindGroup = wgpu::BindGroup;

    fn max_workgroups_per_dimension(&self) -> u32 {
        self.device.limits().max_compute_workgroups_per_dimension
    }

    fn max_storage_binding_size(&self) -> u64 {
        u64::from(self.device.limits().max_storage_buffer_binding_size)
    }

    fn create_buffer_init(&self, label: &str, contents: &[u8], usage: BufferUsages) -> wgpu::Buffer {
        buffer::create_mapped_init(&self.device, label, contents, usage)
    }

    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsages) -> wgpu::Buffer {
        buffer::create_uninit(&self.device, label, size, usage)
    }

    fn buffer_size(&self, buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }

    fn buffer_usage(&self, buffer: &wgpu::Buffer) -> BufferUsages {
        buffer.usage()
    }

    async fn create_pipeline(&self, kernel: &Kernel) -> Result<GpuPipeline, DispatchError> {
        // Shader and pipeline errors are otherwise reported to the
        // uncaptured error handler, which panics by default.
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kernel.label),
                source: wgpu::ShaderSource::Wgsl(kernel.source.into()),
            });
        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("double_bind_group_layout"),
                    entries: &kernel.layout_entries(),
                });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("double_pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("double_pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(kernel.entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        if let Some(error) = self.device.pop_error_scope().await {
            return Err(DispatchError::KernelCompilation(error.to_string()));
        }
        debug!("compiled kernel `{}`", kernel.label);
        Ok(GpuPipeline {
            pipeline,
            bind_group_layout,
        })
    }

    fn create_bind_group(
        &self,
        pipeline: &GpuPipeline,
        entries: &[(u32, &wgpu::Buffer)],
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry<'_>> = entries
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("double_bind_group"),
            layout: &pipeline.bind_group_layout,
            entries: &entries,
        })
    }

    fn submit(&self, batch: CommandBatch<'_, Self>) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("double_encoder"),
            });
        // A pass stays open across consecutive pass commands and is
        // closed before any encoder-level command such as a copy.
        let mut pass: Option<wgpu::ComputePass<'static>> = None;
        for command in batch.commands() {
            match command {
                Command::SetPipeline(pipeline) => {
                    open_pass(&mut pass, &mut encoder).set_pipeline(&pipeline.pipeline);
                }
                Command::SetBindGroup { index, bind_group } => {
                    open_pass(&mut pass, &mut encoder).set_bind_group(*index, *bind_group, &[]);
                }
                Command::Dispatch { x, y, z } => {
                    open_pass(&mut pass, &mut encoder).dispatch_workgroups(*x, *y, *z);
                }
                Command::CopyBufferToBuffer {
                    source,
                    destination,
                    size,
                } => {
                    pass = None;
                    encoder.copy_buffer_to_buffer(source, 0, destination, 0, *size);
                }
            }
        }
        drop(pass);
        let index = self.queue.submit([encoder.finish()]);
        debug!("submitted {} commands as {index:?}", batch.len());
    }

    async fn read_buffer(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>, DispatchError> {
        buffer::read_mapped(&self.device, buffer).await
    }
}

fn open_pass<'p>(
    pass: &'p mut Option<wgpu::ComputePass<'static>>,
    encoder: &mut wgpu::CommandEncoder,
) -> &'p mut wgpu::ComputePass<'static> {
    pass.get_or_insert_with(|| {
        encoder
            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("double_pass"),
                timestamp_writes: None,
            })
            .forget_lifetime()
    })
}
