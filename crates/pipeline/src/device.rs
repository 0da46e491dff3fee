//! GPU name lookup for provenance tags.
//!
//! NVML is optional: on hosts without NVIDIA drivers the probe logs once
//! and every lookup falls back to [`UNKNOWN_DEVICE`].

use std::collections::HashMap;
use std::sync::Mutex;

use nvml_wrapper::Nvml;

/// Device name recorded when none can be determined.
pub const UNKNOWN_DEVICE: &str = "unknown device";

/// Resolves a CUDA device index to a human-readable GPU name.
pub struct DeviceProbe {
    /// Fixed name from configuration; bypasses NVML entirely.
    fixed: Option<String>,
    /// `None` when NVML could not be initialised (no drivers / no GPU).
    nvml: Option<Nvml>,
    cache: Mutex<HashMap<u32, String>>,
}

impl DeviceProbe {
    /// Build a probe. A non-empty `fixed` name is always returned as-is.
    pub fn new(fixed: Option<String>) -> Self {
        let fixed = fixed.filter(|name| !name.trim().is_empty());
        if fixed.is_some() {
            return Self::with_name(fixed, None);
        }

        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!("NVML initialised successfully");
                Some(nvml)
            }
            Err(e) => {
                tracing::warn!(error = %e, "NVML unavailable, device names will not be recorded");
                None
            }
        };
        Self::with_name(None, nvml)
    }

    /// A probe that never touches NVML.
    pub fn fixed(name: impl Into<String>) -> Self {
        Self::with_name(Some(name.into()), None)
    }

    fn with_name(fixed: Option<String>, nvml: Option<Nvml>) -> Self {
        Self {
            fixed,
            nvml,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the GPU at `index`, or [`UNKNOWN_DEVICE`].
    pub fn name(&self, index: u32) -> String {
        if let Some(name) = &self.fixed {
            return name.clone();
        }

        if let Ok(cache) = self.cache.lock() {
            if let Some(name) = cache.get(&index) {
                return name.clone();
            }
        }

        let name = self.query(index).unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(index, name.clone());
        }
        name
    }

    fn query(&self, index: u32) -> Option<String> {
        let nvml = self.nvml.as_ref()?;
        match nvml.device_by_index(index).and_then(|device| device.name()) {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!(cuda_device = index, error = %e, "GPU name lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_name_wins() {
        let probe = DeviceProbe::fixed("Test GPU");
        assert_eq!(probe.name(0), "Test GPU");
        assert_eq!(probe.name(3), "Test GPU");
    }

    #[test]
    fn no_nvml_means_unknown_device() {
        let probe = DeviceProbe::with_name(None, None);
        assert_eq!(probe.name(0), UNKNOWN_DEVICE);
    }

    #[test]
    fn configured_name_is_kept_verbatim() {
        let probe = DeviceProbe::new(Some("RTX A6000 (rack 2)".into()));
        assert_eq!(probe.name(1), "RTX A6000 (rack 2)");
    }

    /// Must not panic on hosts without NVIDIA drivers (typical CI).
    #[test]
    fn probing_without_drivers_falls_back() {
        let probe = DeviceProbe::new(None);
        let name = probe.name(99);
        assert!(!name.is_empty());
    }
}
