//! The seam between the dispatcher and whatever executes its commands.
//!
//! [`ComputePlatform`] covers negotiation (adapter, then device) and
//! [`ComputeDevice`] covers everything after it: buffers, pipelines,
//! bind groups, one command submission and the mapped readback.  The
//! wgpu-backed [`crate::GpuContext`] is the production implementation;
//! `soft::SoftDevice` (behind the `soft` feature) emulates the same
//! contract on the CPU so the dispatch sequence can be tested without a
//! GPU.

use wgpu::BufferUsages;

use crate::error::DispatchError;
use crate::kernel::Kernel;

/// Something that can hand out a compute device.
#[allow(async_fn_in_trait)]
pub trait ComputePlatform {
    type Device: ComputeDevice;

    /// Request an adapter and then a device from it.
    ///
    /// Returns [`DispatchError::PlatformUnavailable`] when no
    /// compute-capable adapter exists and
    /// [`DispatchError::DeviceUnavailable`] when the adapter refuses a
    /// device.  No retry is attempted.
    async fn request_device(&self) -> Result<Self::Device, DispatchError>;
}

/// Resource creation, submission and readback on a negotiated device.
#[allow(async_fn_in_trait)]
pub trait ComputeDevice: Sized {
    type Buffer;
    type Pipeline;
    type BindGroup;

    /// Largest work-group count the device accepts in one dimension.
    fn max_workgroups_per_dimension(&self) -> u32;

    /// Largest buffer, in bytes, that may be bound to a storage slot.
    fn max_storage_binding_size(&self) -> u64;

    /// Create a buffer mapped at creation, copy `contents` into it and
    /// unmap it.  After this call the host can no longer write to it.
    fn create_buffer_init(&self, label: &str, contents: &[u8], usage: BufferUsages)
        -> Self::Buffer;

    /// Create an uninitialised buffer of `size` bytes.
    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsages) -> Self::Buffer;

    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    fn buffer_usage(&self, buffer: &Self::Buffer) -> BufferUsages;

    /// Compile `kernel` and build a compute pipeline for it.
    async fn create_pipeline(&self, kernel: &Kernel) -> Result<Self::Pipeline, DispatchError>;

    /// Associate buffers with the pipeline's binding slots in group 0.
    fn create_bind_group(
        &self,
        pipeline: &Self::Pipeline,
        entries: &[(u32, &Self::Buffer)],
    ) -> Self::BindGroup;

    /// Execute the batch as one queue submission.
    fn submit(&self, batch: CommandBatch<'_, Self>);

    /// Map `buffer` for reading, wait for the device, copy the bytes out
    /// and unmap it again.
    ///
    /// Implementations may wait by blocking the calling thread, as the
    /// wgpu one does.
    async fn read_buffer(&self, buffer: &Self::Buffer) -> Result<Vec<u8>, DispatchError>;
}

/// One encoded operation.
pub enum Command<'a, D: ComputeDevice> {
    SetPipeline(&'a D::Pipeline),
    SetBindGroup {
        index: u32,
        bind_group: &'a D::BindGroup,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBufferToBuffer {
        source: &'a D::Buffer,
        destination: &'a D::Buffer,
        size: u64,
    },
}

/// Commands recorded in order and submitted together.
pub struct CommandBatch<'a, D: ComputeDevice> {
    commands: Vec<Command<'a, D>>,
}

impl<'a, D: ComputeDevice> CommandBatch<'a, D> {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: Command<'a, D>) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn commands(&self) -> &[Command<'a, D>] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<D: ComputeDevice> Default for CommandBatch<'_, D> {
    fn default() -> Self {
        Self::new()
    }
}
