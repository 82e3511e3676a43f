//! wgpu buffer creation and host readback.
//!
//! These helpers back the [`crate::ComputeDevice`] implementation of
//! [`crate::GpuContext`].  Uploads go through a buffer that is mapped at
//! creation and unmapped once filled, so the input never needs
//! `COPY_DST` or a queue write.  Readback maps a `MAP_READ` buffer,
//! waits for the device, copies the bytes out and unmaps.

use log::debug;
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::error::DispatchError;

/// Create a buffer holding `contents`.
///
/// The buffer starts mapped, the bytes are written into the mapped
/// range and the buffer is unmapped before it is returned.  `contents`
/// must be a multiple of four bytes long, which holds for every `f32`
/// slice and for [`crate::kernel::Params`].
pub(crate) fn create_mapped_init(
    device: &wgpu::Device,
    label: &str,
    contents: &[u8],
    usage: BufferUsages,
) -> Buffer {
    let buffer = device.create_buffer(&BufferDescriptor {
        label: Some(label),
        size: contents.len() as u64,
        usage,
        mapped_at_creation: true,
    });
    buffer
        .slice(..)
        .get_mapped_range_mut()
        .copy_from_slice(contents);
    buffer.unmap();
    debug!("uploaded {} bytes into `{label}`", contents.len());
    buffer
}

pub(crate) fn create_uninit(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    usage: BufferUsages,
) -> Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some(label),
        size,
        usage,
        mapped_at_creation: false,
    })
}

/// Read the contents of a `MAP_READ` buffer back to the CPU.
///
/// The map request completes through a oneshot channel once the device
/// has finished all submitted work.  The mapped view is dropped before
/// the buffer is unmapped.
///
/// Although `async`, this blocks the calling thread: the device is
/// polled with [`wgpu::PollType::Wait`] before the channel is awaited,
/// so the future does all its waiting on its first poll.  That suits
/// `pollster` and a dedicated thread; on a shared executor run it
/// under `spawn_blocking` or the equivalent.
pub(crate) async fn read_mapped(
    device: &wgpu::Device,
    buffer: &Buffer,
) -> Result<Vec<u8>, DispatchError> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });

    device
        .poll(wgpu::PollType::Wait)
        .map_err(|e| DispatchError::Mapping(format!("device poll failed: {e}")))?;

    receiver
        .receive()
        .await
        .ok_or_else(|| DispatchError::Mapping("map callback was dropped".to_string()))?
        .map_err(|e| DispatchError::Mapping(e.to_string()))?;

    let bytes = {
        let view = slice.get_mapped_range();
        view.to_vec()
    };
    buffer.unmap();
    debug!("read back {} bytes", bytes.len());
    Ok(bytes)
}
