//! The doubling dispatcher.
//!
//! A run is two explicit stages: [`negotiate`] obtains a device from a
//! [`ComputePlatform`], then a [`Dispatcher`] built on that device
//! stages buffers, records one command batch and reads the result back.
//! [`run`] strings both stages together and presents the outcome on an
//! [`OutputSink`].

use bytemuck::{bytes_of, cast_slice};
use log::{debug, error, info, warn};
use wgpu::BufferUsages;

use crate::config::DispatcherOptions;
use crate::device::{Command, CommandBatch, ComputeDevice, ComputePlatform};
use crate::error::DispatchError;
use crate::kernel::{dispatch_grid, BoundResource, Kernel, Params, DOUBLE_KERNEL};
use crate::output::{OutputSink, Presentation, DONE_PLACEHOLDER};

const ELEMENT_SIZE: u64 = std::mem::size_of::<f32>() as u64;

/// First stage: acquire a device from `platform`.
pub async fn negotiate<P: ComputePlatform>(platform: &P) -> Result<P::Device, DispatchError> {
    let device = platform.request_device().await?;
    debug!("device negotiated");
    Ok(device)
}

/// Doubles `f32` slices on a device.
///
/// The kernel is compiled once in [`Dispatcher::new`] and reused by
/// every call to [`Dispatcher::double`].  Buffers are not: each call
/// allocates its own input, result, params and readback buffers and
/// drops them before returning.
pub struct Dispatcher<D: ComputeDevice> {
    device: D,
    kernel: Kernel,
    pipeline: D::Pipeline,
}

impl<D: ComputeDevice> Dispatcher<D> {
    /// Compile [`DOUBLE_KERNEL`] on `device`.
    pub async fn new(device: D) -> Result<Self, DispatchError> {
        Self::with_kernel(device, DOUBLE_KERNEL).await
    }

    /// Compile a kernel with the same binding schema as [`DOUBLE_KERNEL`]:
    /// read-only input at 0, result at 1, [`Params`] at 2.
    pub async fn with_kernel(device: D, kernel: Kernel) -> Result<Self, DispatchError> {
        let pipeline = device.create_pipeline(&kernel).await?;
        Ok(Self {
            device,
            kernel,
            pipeline,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Second stage: return `input` with every element multiplied by two.
    ///
    /// Nothing is returned before the device signals that the readback
    /// buffer is mapped.
    pub async fn double(&self, input: &[f32]) -> Result<Vec<f32>, DispatchError> {
        if input.is_empty() {
            return Err(DispatchError::EmptyInput);
        }
        let len = input.len();
        let len_u32 = u32::try_from(len).map_err(|_| {
            DispatchError::ConfigurationMismatch(format!(
                "{len} elements exceed the kernel's 32-bit index range"
            ))
        })?;
        let byte_len = len as u64 * ELEMENT_SIZE;
        if byte_len > self.device.max_storage_binding_size() {
            return Err(DispatchError::ConfigurationMismatch(format!(
                "{byte_len} bytes exceed the device's storage binding limit of {}",
                self.device.max_storage_binding_size()
            )));
        }
        let device = &self.device;

        let input_buffer =
            device.create_buffer_init("double_input", cast_slice(input), BufferUsages::STORAGE);
        let result_buffer = device.create_buffer(
            "double_result",
            byte_len,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        );
        let params_buffer = device.create_buffer_init(
            "double_params",
            bytes_of(&Params::for_len(len_u32)),
            BufferUsages::UNIFORM,
        );
        debug!("staged {len} elements ({byte_len} bytes)");

        let entries = [(0, &input_buffer), (1, &result_buffer), (2, &params_buffer)];
        let resources: Vec<BoundResource> = entries
            .iter()
            .map(|(binding, buffer)| BoundResource {
                binding: *binding,
                size: device.buffer_size(buffer),
                usage: device.buffer_usage(buffer),
            })
            .collect();
        if let Err(e) = self.kernel.validate_bindings(&resources, len) {
            warn!("refusing to bind kernel `{}`: {e}", self.kernel.label);
            return Err(e);
        }
        let bind_group = device.create_bind_group(&self.pipeline, &entries);

        // The result buffer also serves device writes, so it is never
        // mapped itself.
        let readback_buffer = device.create_buffer(
            "double_readback",
            byte_len,
            BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        );

        let limit = device.max_workgroups_per_dimension();
        let total_groups = self.kernel.workgroup_count(len_u32);
        let (groups_x, groups_y) = dispatch_grid(total_groups, limit);
        if groups_y > limit {
            return Err(DispatchError::ConfigurationMismatch(format!(
                "{total_groups} work-groups do not fit a {limit}x{limit} grid"
            )));
        }
        debug!("dispatching {groups_x}x{groups_y} work-groups of {}", self.kernel.workgroup_size);

        let mut batch = CommandBatch::new();
        batch
            .push(Command::SetPipeline(&self.pipeline))
            .push(Command::SetBindGroup {
                index: 0,
                bind_group: &bind_group,
            })
            .push(Command::Dispatch {
                x: groups_x,
                y: groups_y,
                z: 1,
            })
            .push(Command::CopyBufferToBuffer {
                source: &result_buffer,
                destination: &readback_buffer,
                size: byte_len,
            });
        device.submit(batch);

        let bytes = device.read_buffer(&readback_buffer).await?;
        if bytes.len() as u64 != byte_len {
            return Err(DispatchError::Mapping(format!(
                "mapped {} bytes, expected {byte_len}",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Blocking wrapper around [`Dispatcher::double`].
    pub fn double_blocking(&self, input: &[f32]) -> Result<Vec<f32>, DispatchError> {
        pollster::block_on(self.double(input))
    }
}

/// The processor-side loop the GPU path is compared against.
pub fn cpu_double(input: &[f32]) -> Vec<f32> {
    let mut out = input.to_vec();
    for x in &mut out {
        *x *= 2.0;
    }
    out
}

/// Negotiate a device, double `input` once and present the outcome.
///
/// Exactly one presentation is made on `sink`: a diagnostic when any
/// stage fails, the rendered values, or [`DONE_PLACEHOLDER`] when the
/// result is longer than `options.render_limit`.  The outcome is also
/// returned so callers can pick an exit status.
pub async fn run<P, S>(
    platform: &P,
    input: &[f32],
    sink: &mut S,
    options: &DispatcherOptions,
) -> Result<Vec<f32>, DispatchError>
where
    P: ComputePlatform,
    S: OutputSink + ?Sized,
{
    let outcome = async {
        let device = negotiate(platform).await?;
        let dispatcher = Dispatcher::new(device).await?;
        dispatcher.double(input).await
    }
    .await;

    match &outcome {
        Ok(values) if options.exceeds_render_limit(values.len()) => {
            info!("doubled {} elements", values.len());
            debug!("result: {values:?}");
            sink.present(Presentation::Placeholder(DONE_PLACEHOLDER));
        }
        Ok(values) => {
            info!("doubled {} elements", values.len());
            sink.present(Presentation::Values(values));
        }
        Err(e) => {
            error!("dispatch failed: {e}");
            sink.present(Presentation::Diagnostic(&e.diagnostic()));
        }
    }
    outcome
}

/// Blocking wrapper around [`run`].
pub fn run_blocking<P, S>(
    platform: &P,
    input: &[f32],
    sink: &mut S,
    options: &DispatcherOptions,
) -> Result<Vec<f32>, DispatchError>
where
    P: ComputePlatform,
    S: OutputSink + ?Sized,
{
    pollster::block_on(run(platform, input, sink, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_double_matches_scalar_multiply() {
        let input = [1.0, -2.5, 0.0, 1e30];
        assert_eq!(cpu_double(&input), vec![2.0, -5.0, 0.0, 2e30]);
    }

    #[test]
    fn cpu_double_of_empty_is_empty() {
        assert!(cpu_double(&[]).is_empty());
    }
}
