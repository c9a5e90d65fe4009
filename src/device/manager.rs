//! Process-wide device registry.
//!
//! Devices are enumerated once at first use and the default computation and
//! visualization devices stay stable from then on. Tests that need a clean
//! slate call [`DeviceManager::reset_for_test`] and must be serialized
//! (`serial_test`), since the registry is process-global.

use crate::config::DeviceConfig;
use crate::device::{ComputeRuntime, ExecutionDevice, SoftwareRuntime};
use crate::error::{MediFlowError, Result};
use crate::types::DeviceId;
use std::sync::{Arc, Mutex, OnceLock};

/// Registry of available execution devices with stable default selections.
pub struct DeviceManager {
    devices: Vec<Arc<ExecutionDevice>>,
    default_computation: Arc<ExecutionDevice>,
    default_visualization: Arc<ExecutionDevice>,
}

fn instance_slot() -> &'static Mutex<Option<Arc<DeviceManager>>> {
    static SLOT: OnceLock<Mutex<Option<Arc<DeviceManager>>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

impl DeviceManager {
    /// Enumerate devices honoring `config` and install the result as the
    /// process-wide instance. Fails if devices were already enumerated;
    /// call before any node construction, or not at all to get defaults.
    pub fn initialize(config: &DeviceConfig) -> Result<Arc<DeviceManager>> {
        let mut slot = instance_slot()
            .lock()
            .map_err(|_| MediFlowError::Device("device registry lock poisoned".to_string()))?;
        if slot.is_some() {
            return Err(MediFlowError::Precondition(
                "devices already enumerated; initialize before first use".to_string(),
            ));
        }
        let manager = Arc::new(Self::enumerate(config)?);
        *slot = Some(manager.clone());
        Ok(manager)
    }

    /// The process-wide instance, enumerating with default preferences on
    /// first use.
    pub fn instance() -> Arc<DeviceManager> {
        let mut slot = instance_slot()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(manager) = slot.as_ref() {
            return manager.clone();
        }
        let manager = Arc::new(
            Self::enumerate(&DeviceConfig::default())
                .unwrap_or_else(|_| Self::host_only_fallback()),
        );
        *slot = Some(manager.clone());
        manager
    }

    /// Drop the process-wide instance so the next use re-enumerates.
    /// Test isolation only; never call while pipelines are running.
    pub fn reset_for_test() {
        let mut slot = instance_slot()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    fn enumerate(config: &DeviceConfig) -> Result<Self> {
        let host = Arc::new(ExecutionDevice::host(DeviceId(0)));
        let runtimes: Vec<Box<dyn ComputeRuntime>> = vec![Box::new(SoftwareRuntime)];

        let mut devices = vec![host.clone()];
        for (i, runtime) in runtimes.into_iter().enumerate() {
            let device = Arc::new(ExecutionDevice::compute(DeviceId(i as u32 + 1), runtime)?);
            devices.push(device);
        }

        let compute_candidates = || devices.iter().filter(|d| !d.is_host());

        let default_computation = if config.prefer_host {
            host.clone()
        } else {
            let hinted = config.device_hint.as_ref().and_then(|hint| {
                compute_candidates()
                    .find(|d| d.name().contains(hint.as_str()))
                    .cloned()
            });
            hinted
                .or_else(|| compute_candidates().next().cloned())
                .unwrap_or_else(|| host.clone())
        };

        let default_visualization = compute_candidates()
            .find(|d| d.supports_visualization())
            .cloned()
            .unwrap_or_else(|| host.clone());

        tracing::info!(
            "Enumerated {} devices; computation on {}, visualization on {}",
            devices.len(),
            default_computation.name(),
            default_visualization.name()
        );

        Ok(Self {
            devices,
            default_computation,
            default_visualization,
        })
    }

    fn host_only_fallback() -> Self {
        let host = Arc::new(ExecutionDevice::host(DeviceId(0)));
        tracing::warn!("Compute device setup failed; falling back to host only");
        Self {
            devices: vec![host.clone()],
            default_computation: host.clone(),
            default_visualization: host,
        }
    }

    /// All enumerated devices, host first.
    pub fn devices(&self) -> &[Arc<ExecutionDevice>] {
        &self.devices
    }

    /// The host device.
    pub fn host_device(&self) -> Arc<ExecutionDevice> {
        self.devices[0].clone()
    }

    /// Default device for computation, stable for the process lifetime.
    pub fn default_computation_device(&self) -> Arc<ExecutionDevice> {
        self.default_computation.clone()
    }

    /// Default device for visualization, stable for the process lifetime.
    pub fn default_visualization_device(&self) -> Arc<ExecutionDevice> {
        self.default_visualization.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests mutate the process-wide registry; the integration suite
    // exercises the same paths under #[serial]. Here we only touch
    // enumerate() directly to stay isolated.

    #[test]
    fn test_enumerate_defaults_to_compute_device() {
        let manager = DeviceManager::enumerate(&DeviceConfig::default()).unwrap();
        assert!(manager.devices().len() >= 2);
        assert!(!manager.default_computation_device().is_host());
        assert!(manager
            .default_visualization_device()
            .supports_visualization());
    }

    #[test]
    fn test_prefer_host_selects_host() {
        let config = DeviceConfig {
            prefer_host: true,
            device_hint: None,
        };
        let manager = DeviceManager::enumerate(&config).unwrap();
        assert!(manager.default_computation_device().is_host());
    }

    #[test]
    fn test_device_hint_matches_by_name() {
        let config = DeviceConfig {
            prefer_host: false,
            device_hint: Some("software".to_string()),
        };
        let manager = DeviceManager::enumerate(&config).unwrap();
        assert_eq!(manager.default_computation_device().name(), "software");
    }
}
