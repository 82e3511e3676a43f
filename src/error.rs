//! Error type shared by every stage of a dispatch.

use thiserror::Error;

/// Shown on the output surface when no compute backend is reachable.
pub const UNSUPPORTED_PLATFORM_MESSAGE: &str =
    "GPU compute is not supported on this platform: no compute-capable adapter was found.";

/// Shown on the output surface when an adapter exists but refuses a device.
pub const DEVICE_UNAVAILABLE_MESSAGE: &str = "Failed to acquire a GPU device.";

/// Everything that can stop a doubling dispatch.
///
/// `PlatformUnavailable` and `DeviceUnavailable` happen during
/// negotiation, before any buffer exists. The remaining variants are
/// raised while staging or reading back and are fatal for that call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no compute-capable platform is available")]
    PlatformUnavailable,
    #[error("device request failed: {0}")]
    DeviceUnavailable(String),
    #[error("binding configuration mismatch: {0}")]
    ConfigurationMismatch(String),
    #[error("kernel failed to compile: {0}")]
    KernelCompilation(String),
    #[error("input slice must not be empty")]
    EmptyInput,
    #[error("readback mapping failed: {0}")]
    Mapping(String),
}

impl DispatchError {
    /// The fixed text shown to the user for this error.
    ///
    /// Negotiation failures use fixed diagnostics; the rest fall back to
    /// their `Display` form.
    pub fn diagnostic(&self) -> String {
        match self {
            DispatchError::PlatformUnavailable => UNSUPPORTED_PLATFORM_MESSAGE.to_string(),
            DispatchError::DeviceUnavailable(_) => DEVICE_UNAVAILABLE_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
