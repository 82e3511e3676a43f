//! Options for negotiating a device and presenting results.

/// Knobs for [`crate::WgpuPlatform`] and [`crate::run`].
///
/// Everything has a sensible default; the demos only override
/// `render_limit`.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherOptions {
    /// Adapter preference passed to `request_adapter`.
    pub power_preference: wgpu::PowerPreference,
    /// Only accept a software (fallback) adapter.
    pub force_fallback_adapter: bool,
    /// Debug label attached to the logical device.
    pub device_label: String,
    /// Results longer than this are replaced by a placeholder on the
    /// output surface.  `None` always renders the values.
    pub render_limit: Option<usize>,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            device_label: "gpu_doubler_device".to_string(),
            render_limit: Some(64),
        }
    }
}

impl DispatcherOptions {
    pub fn with_render_limit(mut self, limit: Option<usize>) -> Self {
        self.render_limit = limit;
        self
    }

    /// Whether a result of `len` elements should be shown as a placeholder.
    pub fn exceeds_render_limit(&self, len: usize) -> bool {
        self.render_limit.is_some_and(|limit| len > limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limit_keeps_small_results_visible() {
        let options = DispatcherOptions::default();
        assert!(!options.exceeds_render_limit(8));
        assert!(options.exceeds_render_limit(10_000));
    }

    #[test]
    fn no_limit_never_uses_placeholder() {
        let options = DispatcherOptions::default().with_render_limit(None);
        assert!(!options.exceeds_render_limit(usize::MAX));
    }
}
