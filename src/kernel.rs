//! The doubling kernel and its binding schema.
//!
//! A [`Kernel`] is the WGSL source together with a description of the
//! bindings it declares.  The schema is what the dispatcher checks the
//! concrete buffers against before it creates a bind group, so a buffer
//! of the wrong size or with the wrong usage flags is reported as a
//! configuration error instead of reaching the device.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use wgpu::BufferUsages;

use crate::error::DispatchError;

/// How a kernel slot accesses the buffer bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAccess {
    ReadOnlyStorage,
    ReadWriteStorage,
    Uniform,
}

impl SlotAccess {
    /// Usage flag a buffer must carry to be bound to a slot of this kind.
    pub fn required_usage(self) -> BufferUsages {
        match self {
            SlotAccess::ReadOnlyStorage | SlotAccess::ReadWriteStorage => BufferUsages::STORAGE,
            SlotAccess::Uniform => BufferUsages::UNIFORM,
        }
    }

    pub fn binding_type(self) -> wgpu::BufferBindingType {
        match self {
            SlotAccess::ReadOnlyStorage => wgpu::BufferBindingType::Storage { read_only: true },
            SlotAccess::ReadWriteStorage => wgpu::BufferBindingType::Storage { read_only: false },
            SlotAccess::Uniform => wgpu::BufferBindingType::Uniform,
        }
    }
}

/// Expected byte size of the buffer bound to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotExtent {
    /// One element of the given byte size per input element.
    PerElement(u64),
    /// A fixed-size block, independent of the input length.
    Fixed(u64),
}

impl SlotExtent {
    pub fn bytes_for(self, len: usize) -> u64 {
        match self {
            SlotExtent::PerElement(element) => element * len as u64,
            SlotExtent::Fixed(size) => size,
        }
    }

    fn min_binding_size(self) -> Option<NonZeroU64> {
        match self {
            SlotExtent::PerElement(element) => NonZeroU64::new(element),
            SlotExtent::Fixed(size) => NonZeroU64::new(size),
        }
    }
}

/// One `@binding(n)` declaration in group 0 of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlot {
    pub binding: u32,
    pub access: SlotAccess,
    pub extent: SlotExtent,
}

/// A buffer as the validator sees it: where it goes, how big it is and
/// what it may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundResource {
    pub binding: u32,
    pub size: u64,
    pub usage: BufferUsages,
}

/// Uniform block passed at binding 2.  Padded to 16 bytes so the same
/// layout is valid as a uniform on every backend.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod)]
pub struct Params {
    pub len: u32,
    pub _pad: [u32; 3],
}

impl Params {
    pub fn for_len(len: u32) -> Self {
        Self { len, _pad: [0; 3] }
    }
}

/// WGSL source plus the schema the dispatcher validates bindings against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kernel {
    pub label: &'static str,
    pub source: &'static str,
    pub entry_point: &'static str,
    pub workgroup_size: u32,
    pub bindings: &'static [BindingSlot],
}

const F32_SIZE: u64 = std::mem::size_of::<f32>() as u64;
const PARAMS_SIZE: u64 = std::mem::size_of::<Params>() as u64;

/// Multiplies every element by two.
///
/// The index is linearised over a 2-D grid so that inputs needing more
/// work-groups than one dimension allows still work.  Invocations past
/// `params.len` return without touching either array.
pub const DOUBLE_KERNEL: Kernel = Kernel {
    label: "double",
    source: r#"
struct Params {
    len: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0)
var<storage, read> input: array<f32>;
@group(0) @binding(1)
var<storage, read_write> result: array<f32>;
@group(0) @binding(2)
var<uniform> params: Params;

@compute @workgroup_size(8)
fn main(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let i = global_id.y * groups.x * 8u + global_id.x;
    if (i >= params.len) {
        return;
    }
    result[i] = input[i] * 2.0;
}
"#,
    entry_point: "main",
    workgroup_size: 8,
    bindings: &[
        BindingSlot {
            binding: 0,
            access: SlotAccess::ReadOnlyStorage,
            extent: SlotExtent::PerElement(F32_SIZE),
        },
        BindingSlot {
            binding: 1,
            access: SlotAccess::ReadWriteStorage,
            extent: SlotExtent::PerElement(F32_SIZE),
        },
        BindingSlot {
            binding: 2,
            access: SlotAccess::Uniform,
            extent: SlotExtent::Fixed(PARAMS_SIZE),
        },
    ],
};

impl Kernel {
    /// Number of work-groups needed to give every element an invocation.
    pub fn workgroup_count(&self, len: u32) -> u32 {
        len.div_ceil(self.workgroup_size)
    }

    /// Check a concrete binding set against the declared slots.
    ///
    /// Every slot must be bound exactly once, by a buffer of exactly the
    /// expected size that carries the usage the slot's access mode needs.
    pub fn validate_bindings(
        &self,
        resources: &[BoundResource],
        len: usize,
    ) -> Result<(), DispatchError> {
        if resources.len() != self.bindings.len() {
            return Err(DispatchError::ConfigurationMismatch(format!(
                "kernel `{}` declares {} bindings but {} were supplied",
                self.label,
                self.bindings.len(),
                resources.len()
            )));
        }
        for slot in self.bindings {
            let mut matching = resources.iter().filter(|r| r.binding == slot.binding);
            let resource = matching.next().ok_or_else(|| {
                DispatchError::ConfigurationMismatch(format!(
                    "binding {} is not bound",
                    slot.binding
                ))
            })?;
            if matching.next().is_some() {
                return Err(DispatchError::ConfigurationMismatch(format!(
                    "binding {} is bound more than once",
                    slot.binding
                )));
            }
            let expected = slot.extent.bytes_for(len);
            if resource.size != expected {
                return Err(DispatchError::ConfigurationMismatch(format!(
                    "binding {} is {} bytes, expected {}",
                    slot.binding, resource.size, expected
                )));
            }
            let required = slot.access.required_usage();
            if !resource.usage.contains(required) {
                return Err(DispatchError::ConfigurationMismatch(format!(
                    "binding {} has usage {:?}, which lacks {:?}",
                    slot.binding, resource.usage, required
                )));
            }
        }
        Ok(())
    }

    /// Bind group layout entries matching the schema.
    pub fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        self.bindings
            .iter()
            .map(|slot| wgpu::BindGroupLayoutEntry {
                binding: slot.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: slot.access.binding_type(),
                    has_dynamic_offset: false,
                    min_binding_size: slot.extent.min_binding_size(),
                },
                count: None,
            })
            .collect()
    }
}

/// Calculate an (x, y) workgroup grid that covers `total_groups`
/// workgroups without exceeding the per-dimension limit.
pub fn dispatch_grid(total_groups: u32, limit: u32) -> (u32, u32) {
    if total_groups <= limit {
        (total_groups, 1)
    } else {
        (limit, total_groups.div_ceil(limit))
    }
}
