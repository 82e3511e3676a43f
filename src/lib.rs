//! Double every element of an `f32` array with a GPU compute dispatch
//! using [wgpu](https://github.com/gfx-rs/wgpu), and compare it against
//! a plain CPU loop.
//!
//! A run has two stages.  [`negotiate`] asks a [`ComputePlatform`] for
//! a device (adapter first, then device); a [`Dispatcher`] built on that
//! device stages the input, result and readback buffers, submits one
//! compute pass followed by a copy, and maps the readback buffer once
//! the device is done.  [`run`] does both and shows exactly one outcome
//! on an [`OutputSink`]: a diagnostic, the values, or a placeholder for
//! large results.
//!
//! The library API is `async`; `*_blocking` variants wrap it with
//! [`pollster`].  The `soft` feature adds a deterministic CPU device
//! with the same contract, for tests.

mod buffer;
pub mod compute;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod kernel;
pub mod output;
#[cfg(any(test, feature = "soft"))]
pub mod soft;

// Re-export the most common types at the crate root so that users can
// simply `use gpu_doubler::*;`.
pub use compute::{cpu_double, negotiate, run, run_blocking, Dispatcher};
pub use config::DispatcherOptions;
pub use context::{GpuContext, WgpuPlatform};
pub use device::{Command, CommandBatch, ComputeDevice, ComputePlatform};
pub use error::{DispatchError, DEVICE_UNAVAILABLE_MESSAGE, UNSUPPORTED_PLATFORM_MESSAGE};
pub use kernel::{Kernel, DOUBLE_KERNEL};
pub use output::{ConsoleSink, OutputSink, Presentation, TextSurface, DONE_PLACEHOLDER};
