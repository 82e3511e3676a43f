//! A CPU emulation of the compute device.
//!
//! [`SoftPlatform`] and [`SoftDevice`] implement the same traits as the
//! wgpu context, with deterministic behaviour and counters that tests
//! can inspect: how many devices were granted, how many buffers were
//! allocated, how many invocations ran and how many of them touched
//! memory.  Work-groups execute sequentially over the same linearised
//! index the WGSL kernel computes, and buffers are sized exactly, so an
//! unguarded out-of-range access panics instead of going unnoticed.
//!
//! Kernels cannot be interpreted from WGSL; instead each kernel label
//! is mapped to a Rust [`SoftProgram`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use wgpu::BufferUsages;

use crate::device::{Command, CommandBatch, ComputeDevice, ComputePlatform};
use crate::error::DispatchError;
use crate::kernel::{Kernel, Params, SlotAccess};

/// Body of a kernel for one invocation.
///
/// Receives the linearised global index, the input array, the result
/// array and the params block.  Returns whether it accessed memory.
pub type SoftProgram = fn(index: u32, input: &[f32], result: &mut [f32], params: &Params) -> bool;

/// Software counterpart of the doubling kernel.
pub fn soft_double(index: u32, input: &[f32], result: &mut [f32], params: &Params) -> bool {
    if index >= params.len {
        return false;
    }
    let i = index as usize;
    result[i] = input[i] * 2.0;
    true
}

/// What negotiation with a [`SoftPlatform`] yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ready,
    NoPlatform,
    DeviceDenied,
}

/// Counters shared between a platform and every device it grants.
#[derive(Debug, Default)]
pub struct SoftStats {
    devices_granted: AtomicUsize,
    buffers_allocated: AtomicUsize,
    bytes_allocated: AtomicUsize,
    pipelines_compiled: AtomicUsize,
    submissions: AtomicUsize,
    workgroups: AtomicUsize,
    invocations: AtomicUsize,
    memory_accesses: AtomicUsize,
}

impl SoftStats {
    pub fn devices_granted(&self) -> usize {
        self.devices_granted.load(Ordering::Relaxed)
    }

    pub fn buffers_allocated(&self) -> usize {
        self.buffers_allocated.load(Ordering::Relaxed)
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    pub fn pipelines_compiled(&self) -> usize {
        self.pipelines_compiled.load(Ordering::Relaxed)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }

    pub fn workgroups(&self) -> usize {
        self.workgroups.load(Ordering::Relaxed)
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Invocations that passed the bounds guard and touched memory.
    pub fn memory_accesses(&self) -> usize {
        self.memory_accesses.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicUsize, by: usize) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// A platform whose negotiation outcome is chosen up front.
#[derive(Debug, Clone)]
pub struct SoftPlatform {
    availability: Availability,
    max_workgroups_per_dimension: u32,
    max_storage_binding_size: u64,
    stats: Arc<SoftStats>,
}

impl Default for SoftPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftPlatform {
    /// A platform that grants devices with wgpu's default limits.
    pub fn new() -> Self {
        Self {
            availability: Availability::Ready,
            max_workgroups_per_dimension: 65_535,
            max_storage_binding_size: 128 << 20,
            stats: Arc::default(),
        }
    }

    /// A platform with no compute backend at all.
    pub fn unsupported() -> Self {
        Self {
            availability: Availability::NoPlatform,
            ..Self::new()
        }
    }

    /// A platform that has an adapter but refuses to create devices.
    pub fn denying_devices() -> Self {
        Self {
            availability: Availability::DeviceDenied,
            ..Self::new()
        }
    }

    pub fn with_max_workgroups_per_dimension(mut self, limit: u32) -> Self {
        self.max_workgroups_per_dimension = limit;
        self
    }

    pub fn with_max_storage_binding_size(mut self, bytes: u64) -> Self {
        self.max_storage_binding_size = bytes;
        self
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    pub fn stats(&self) -> Arc<SoftStats> {
        Arc::clone(&self.stats)
    }
}

impl ComputePlatform for SoftPlatform {
    type Device = SoftDevice;

    async fn request_device(&self) -> Result<SoftDevice, DispatchError> {
        match self.availability {
            Availability::NoPlatform => Err(DispatchError::PlatformUnavailable),
            Availability::DeviceDenied => Err(DispatchError::DeviceUnavailable(
                "software adapter refused the device request".to_string(),
            )),
            Availability::Ready => {
                SoftStats::bump(&self.stats.devices_granted, 1);
                let mut device = SoftDevice::new(Arc::clone(&self.stats));
                device.max_workgroups_per_dimension = self.max_workgroups_per_dimension;
                device.max_storage_binding_size = self.max_storage_binding_size;
                Ok(device)
            }
        }
    }
}

#[derive(Debug)]
struct SoftBufferInner {
    label: String,
    size: u64,
    usage: BufferUsages,
    // Word storage keeps the contents aligned for `f32` casts.
    words: RefCell<Vec<u32>>,
    mapped: Cell<bool>,
}

/// Host memory standing in for a device buffer.
#[derive(Debug, Clone)]
pub struct SoftBuffer(Rc<SoftBufferInner>);

impl SoftBuffer {
    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn is_mapped(&self) -> bool {
        self.0.mapped.get()
    }

    fn same(&self, other: &SoftBuffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

pub struct SoftPipeline {
    kernel: Kernel,
    program: SoftProgram,
}

pub struct SoftBindGroup {
    entries: Vec<(u32, SoftBuffer)>,
}

impl SoftBindGroup {
    fn buffer_for(&self, binding: u32) -> Option<&SoftBuffer> {
        self.entries
            .iter()
            .find(|(b, _)| *b == binding)
            .map(|(_, buffer)| buffer)
    }
}

/// CPU-executed device.  Not `Send`: buffers are reference counted with
/// `Rc`.
pub struct SoftDevice {
    stats: Arc<SoftStats>,
    programs: HashMap<&'static str, SoftProgram>,
    max_workgroups_per_dimension: u32,
    max_storage_binding_size: u64,
    // First validation failure seen during a submission.  Surfaces as a
    // mapping error, like a lost device would.
    lost: RefCell<Option<String>>,
}

impl SoftDevice {
    fn new(stats: Arc<SoftStats>) -> Self {
        let mut programs: HashMap<&'static str, SoftProgram> = HashMap::new();
        programs.insert("double", soft_double);
        Self {
            stats,
            programs,
            max_workgroups_per_dimension: 65_535,
            max_storage_binding_size: 128 << 20,
            lost: RefCell::new(None),
        }
    }

    /// Make `program` the body of every kernel labelled `label`.
    pub fn register_program(&mut self, label: &'static str, program: SoftProgram) {
        self.programs.insert(label, program);
    }

    pub fn stats(&self) -> &SoftStats {
        &self.stats
    }

    fn allocate(&self, label: &str, size: u64, usage: BufferUsages) -> SoftBuffer {
        SoftStats::bump(&self.stats.buffers_allocated, 1);
        SoftStats::bump(&self.stats.bytes_allocated, size as usize);
        SoftBuffer(Rc::new(SoftBufferInner {
            label: label.to_string(),
            size,
            usage,
            words: RefCell::new(vec![0; size.div_ceil(4) as usize]),
            mapped: Cell::new(false),
        }))
    }

    fn lose(&self, reason: String) {
        debug!("soft device lost: {reason}");
        let mut lost = self.lost.borrow_mut();
        if lost.is_none() {
            *lost = Some(reason);
        }
    }

    fn execute(
        &self,
        pipeline: &SoftPipeline,
        bind_group: &SoftBindGroup,
        (x, y, z): (u32, u32, u32),
    ) -> Result<(), String> {
        let slot = |binding: u32| {
            bind_group
                .buffer_for(binding)
                .ok_or_else(|| format!("binding {binding} is not bound"))
        };
        for declared in pipeline.kernel.bindings {
            let buffer = slot(declared.binding)?;
            let required = declared.access.required_usage();
            if !buffer.0.usage.contains(required) {
                return Err(format!(
                    "`{}` bound at {} lacks {required:?}",
                    buffer.0.label, declared.binding
                ));
            }
        }
        let input = slot(0)?;
        let result = slot(1)?;
        let params = slot(2)?;
        if input.same(result) || params.same(result) {
            return Err("result buffer aliases another binding".to_string());
        }
        let params: Params = {
            let words = params.0.words.borrow();
            let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
            if bytes.len() < std::mem::size_of::<Params>() {
                return Err("params buffer is too small".to_string());
            }
            bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<Params>()])
        };
        let input_words = input.0.words.borrow();
        let mut result_words = result.0.words.borrow_mut();
        let input_values =
            &bytemuck::cast_slice::<u32, f32>(input_words.as_slice())[..(input.0.size / 4) as usize];
        let result_len = (result.0.size / 4) as usize;
        let result_values =
            &mut bytemuck::cast_slice_mut::<u32, f32>(result_words.as_mut_slice())[..result_len];

        // Same linearisation as the WGSL kernel.  z is not part of the
        // index, so extra layers repeat the same invocations.
        let size = pipeline.kernel.workgroup_size;
        let row = x.wrapping_mul(size);
        let mut accesses = 0;
        for _layer in 0..z {
            for gy in 0..y {
                for gx in 0..x {
                    for local in 0..size {
                        let index = gy.wrapping_mul(row).wrapping_add(gx * size + local);
                        if (pipeline.program)(index, input_values, result_values, &params) {
                            accesses += 1;
                        }
                    }
                }
            }
        }
        let groups = x as usize * y as usize * z as usize;
        SoftStats::bump(&self.stats.workgroups, groups);
        SoftStats::bump(&self.stats.invocations, groups * size as usize);
        SoftStats::bump(&self.stats.memory_accesses, accesses);
        Ok(())
    }

    fn copy(&self, source: &SoftBuffer, destination: &SoftBuffer, size: u64) -> Result<(), String> {
        if !source.0.usage.contains(BufferUsages::COPY_SRC) {
            return Err(format!("`{}` is not a copy source", source.0.label));
        }
        if !destination.0.usage.contains(BufferUsages::COPY_DST) {
            return Err(format!("`{}` is not a copy destination", destination.0.label));
        }
        if size > source.0.size || size > destination.0.size || size % 4 != 0 {
            return Err(format!(
                "copy of {size} bytes from `{}` to `{}` is out of range",
                source.0.label, destination.0.label
            ));
        }
        if source.same(destination) {
            return Err("copy source and destination are the same buffer".to_string());
        }
        let words = (size / 4) as usize;
        destination.0.words.borrow_mut()[..words]
            .copy_from_slice(&source.0.words.borrow()[..words]);
        Ok(())
    }
}

impl ComputeDevice for SoftDevice {
    type Buffer = SoftBuffer;
    type Pipeline = SoftPipeline;
    type BindGroup = SoftBindGroup;

    fn max_workgroups_per_dimension(&self) -> u32 {
        self.max_workgroups_per_dimension
    }

    fn max_storage_binding_size(&self) -> u64 {
        self.max_storage_binding_size
    }

    fn create_buffer_init(&self, label: &str, contents: &[u8], usage: BufferUsages) -> SoftBuffer {
        let buffer = self.allocate(label, contents.len() as u64, usage);
        {
            let mut words = buffer.0.words.borrow_mut();
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
            bytes[..contents.len()].copy_from_slice(contents);
        }
        buffer
    }

    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsages) -> SoftBuffer {
        self.allocate(label, size, usage)
    }

    fn buffer_size(&self, buffer: &SoftBuffer) -> u64 {
        buffer.0.size
    }

    fn buffer_usage(&self, buffer: &SoftBuffer) -> BufferUsages {
        buffer.0.usage
    }

    async fn create_pipeline(&self, kernel: &Kernel) -> Result<SoftPipeline, DispatchError> {
        let program = self.programs.get(kernel.label).copied().ok_or_else(|| {
            DispatchError::KernelCompilation(format!(
                "no software program for kernel `{}`",
                kernel.label
            ))
        })?;
        if kernel.workgroup_size == 0 {
            return Err(DispatchError::KernelCompilation(
                "workgroup size must be non-zero".to_string(),
            ));
        }
        let storage_slots = kernel
            .bindings
            .iter()
            .filter(|slot| slot.access != SlotAccess::Uniform)
            .count();
        if storage_slots != 2 {
            return Err(DispatchError::KernelCompilation(format!(
                "software kernels take two storage bindings, `{}` declares {storage_slots}",
                kernel.label
            )));
        }
        SoftStats::bump(&self.stats.pipelines_compiled, 1);
        Ok(SoftPipeline {
            kernel: *kernel,
            program,
        })
    }

    fn create_bind_group(
        &self,
        _pipeline: &SoftPipeline,
        entries: &[(u32, &SoftBuffer)],
    ) -> SoftBindGroup {
        SoftBindGroup {
            entries: entries
                .iter()
                .map(|(binding, buffer)| (*binding, (*buffer).clone()))
                .collect(),
        }
    }

    fn submit(&self, batch: CommandBatch<'_, Self>) {
        SoftStats::bump(&self.stats.submissions, 1);
        let mut pipeline: Option<&SoftPipeline> = None;
        let mut bind_group: Option<&SoftBindGroup> = None;
        for command in batch.commands() {
            let outcome = match command {
                Command::SetPipeline(p) => {
                    pipeline = Some(*p);
                    Ok(())
                }
                Command::SetBindGroup { index: 0, bind_group: group } => {
                    bind_group = Some(*group);
                    Ok(())
                }
                Command::SetBindGroup { index, .. } => {
                    Err(format!("bind group index {index} is out of range"))
                }
                Command::Dispatch { x, y, z } => match (pipeline, bind_group) {
                    (Some(p), Some(g)) => self.execute(p, g, (*x, *y, *z)),
                    _ => Err("dispatch without a pipeline and bind group".to_string()),
                },
                Command::CopyBufferToBuffer {
                    source,
                    destination,
                    size,
                } => self.copy(source, destination, *size),
            };
            if let Err(reason) = outcome {
                self.lose(reason);
                return;
            }
        }
    }

    async fn read_buffer(&self, buffer: &SoftBuffer) -> Result<Vec<u8>, DispatchError> {
        if let Some(reason) = self.lost.borrow().as_ref() {
            return Err(DispatchError::Mapping(format!("device lost: {reason}")));
        }
        if !buffer.0.usage.contains(BufferUsages::MAP_READ) {
            return Err(DispatchError::Mapping(format!(
                "`{}` was not created with MAP_READ",
                buffer.0.label
            )));
        }
        if buffer.0.mapped.replace(true) {
            return Err(DispatchError::Mapping(format!(
                "`{}` is already mapped",
                buffer.0.label
            )));
        }
        let bytes = {
            let words = buffer.0.words.borrow();
            let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
            bytes[..buffer.0.size as usize].to_vec()
        };
        buffer.0.mapped.set(false);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::DOUBLE_KERNEL;

    fn device() -> SoftDevice {
        pollster::block_on(SoftPlatform::new().request_device()).unwrap()
    }

    #[test]
    fn unsupported_platform_grants_nothing() {
        let platform = SoftPlatform::unsupported();
        let err = pollster::block_on(platform.request_device()).err().unwrap();
        assert_eq!(err, DispatchError::PlatformUnavailable);
        assert_eq!(platform.stats().devices_granted(), 0);
    }

    #[test]
    fn init_buffer_holds_contents() {
        let device = device();
        let buffer = device.create_buffer_init(
            "staging",
            bytemuck::cast_slice(&[1.0f32, 2.0]),
            BufferUsages::MAP_READ,
        );
        let bytes = pollster::block_on(device.read_buffer(&buffer)).unwrap();
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
        assert_eq!(values, vec![1.0, 2.0]);
        assert!(!buffer.is_mapped());
    }

    #[test]
    fn read_requires_map_read_usage() {
        let device = device();
        let buffer = device.create_buffer("result", 16, BufferUsages::STORAGE);
        let err = pollster::block_on(device.read_buffer(&buffer)).unwrap_err();
        assert!(matches!(err, DispatchError::Mapping(_)));
    }

    #[test]
    fn copy_without_copy_src_loses_device() {
        let device = device();
        let source = device.create_buffer("result", 16, BufferUsages::STORAGE);
        let destination =
            device.create_buffer("readback", 16, BufferUsages::COPY_DST | BufferUsages::MAP_READ);
        let mut batch = CommandBatch::new();
        batch.push(Command::CopyBufferToBuffer {
            source: &source,
            destination: &destination,
            size: 16,
        });
        device.submit(batch);
        let err = pollster::block_on(device.read_buffer(&destination)).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Mapping("device lost: `result` is not a copy source".into())
        );
    }

    #[test]
    fn unknown_kernel_fails_to_compile() {
        let device = device();
        let kernel = Kernel {
            label: "triple",
            ..DOUBLE_KERNEL
        };
        let err = pollster::block_on(device.create_pipeline(&kernel))
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::KernelCompilation(_)));
    }

    #[test]
    fn soft_double_respects_guard() {
        let input = [1.0, 2.0];
        let mut result = [0.0; 2];
        let params = Params::for_len(2);
        assert!(soft_double(1, &input, &mut result, &params));
        assert!(!soft_double(2, &input, &mut result, &params));
        assert_eq!(result, [0.0, 4.0]);
    }
}
