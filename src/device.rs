//! # Device Detection and Management
//!
//! Handles automatic detection and selection of compute devices (CPU/GPU) for ML inference.
//! Model loads go through [`load_with_fallback`]: the preferred device first,
//! then one retry on the CPU if the accelerated load fails.

use candle_core::Device;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached best available device to avoid repeated detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preferences for model inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Automatically select the best available device
    #[default]
    Auto,
    /// Force CPU usage
    Cpu,
    /// CUDA GPU (falls back to CPU if not available)
    Cuda,
    /// Metal GPU (falls back to CPU if not available)
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Device detection and selection utilities
pub struct DeviceManager;

impl DeviceManager {
    /// Get the best available device based on preference
    pub fn get_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::get_best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::get_cuda_device().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::get_metal_device().unwrap_or(Device::Cpu),
        }
    }

    /// Get the best available device (cached)
    pub fn get_best_device() -> Device {
        BEST_DEVICE.get_or_init(Self::detect_best_device).clone()
    }

    fn detect_best_device() -> Device {
        info!("Detecting best available compute device...");

        if let Some(cuda_device) = Self::get_cuda_device() {
            info!("Selected CUDA GPU for ML inference");
            return cuda_device;
        }

        if let Some(metal_device) = Self::get_metal_device() {
            info!("Selected Metal GPU for ML inference");
            return metal_device;
        }

        info!("Using CPU for ML inference (no GPU acceleration available)");
        Device::Cpu
    }

    fn get_cuda_device() -> Option<Device> {
        match Device::new_cuda(0) {
            Ok(device) => {
                debug!("CUDA device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("CUDA not available: {}", e);
                None
            }
        }
    }

    fn get_metal_device() -> Option<Device> {
        match Device::new_metal(0) {
            Ok(device) => {
                debug!("Metal device 0 available");
                Some(device)
            }
            Err(e) => {
                debug!("Metal not available: {}", e);
                None
            }
        }
    }

    pub fn is_cuda_available() -> bool {
        Self::get_cuda_device().is_some()
    }

    pub fn is_metal_available() -> bool {
        Self::get_metal_device().is_some()
    }

    pub fn is_gpu_available() -> bool {
        Self::is_cuda_available() || Self::is_metal_available()
    }

    /// Get device information for logging/debugging
    pub fn get_device_info(device: &Device) -> String {
        match device {
            Device::Cpu => "CPU".to_string(),
            Device::Cuda(_) => "CUDA GPU".to_string(),
            Device::Metal(_) => "Metal GPU (Apple Silicon)".to_string(),
        }
    }

    /// Get system device summary
    pub fn get_device_summary() -> DeviceSummary {
        DeviceSummary {
            cuda_available: Self::is_cuda_available(),
            metal_available: Self::is_metal_available(),
            current_device: Self::get_device_info(&Self::get_best_device()),
            gpu_available: Self::is_gpu_available(),
        }
    }
}

/// Device availability summary
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub cuda_available: bool,
    pub metal_available: bool,
    pub gpu_available: bool,
    pub current_device: String,
}

/// Try `load` on `preferred`; if that fails and `preferred` is not already
/// the baseline, retry exactly once on `baseline`.
///
/// ## Returns:
/// The loaded value, or the baseline error when both attempts fail. The
/// accelerated error is logged and attached as context.
pub fn fallback_once<D, T, F>(preferred: D, baseline: D, is_baseline: bool, mut load: F) -> anyhow::Result<T>
where
    D: std::fmt::Debug,
    F: FnMut(D) -> anyhow::Result<T>,
{
    if is_baseline {
        return load(baseline);
    }

    let preferred_name = format!("{:?}", preferred);
    match load(preferred) {
        Ok(value) => Ok(value),
        Err(accelerated_err) => {
            warn!(
                device = %preferred_name,
                error = %format!("{:#}", accelerated_err),
                "Accelerated load failed, retrying on CPU"
            );
            load(baseline).map_err(|cpu_err| {
                cpu_err.context(format!(
                    "CPU fallback failed after {} load error: {:#}",
                    preferred_name, accelerated_err
                ))
            })
        }
    }
}

/// Load a model on the device named by `preference`, falling back to the CPU once.
pub fn load_with_fallback<T, F>(preference: DevicePreference, load: F) -> anyhow::Result<T>
where
    F: FnMut(Device) -> anyhow::Result<T>,
{
    let device = DeviceManager::get_device(preference);
    let is_cpu = matches!(device, Device::Cpu);
    info!(device = %DeviceManager::get_device_info(&device), "Loading model");
    fallback_once(device, Device::Cpu, is_cpu, load)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("cpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("cuda".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("invalid".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_device_manager_cpu() {
        let device = DeviceManager::get_device(DevicePreference::Cpu);
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn test_fallback_retries_once_on_baseline() {
        let mut attempts = Vec::new();
        let result = fallback_once("gpu", "cpu", false, |d| {
            attempts.push(d);
            if d == "gpu" {
                anyhow::bail!("no kernel image");
            }
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, vec!["gpu", "cpu"]);
    }

    #[test]
    fn test_fallback_propagates_baseline_error() {
        let mut attempts = 0;
        let result: anyhow::Result<()> = fallback_once("gpu", "cpu", false, |_| {
            attempts += 1;
            anyhow::bail!("weights corrupt")
        });
        let message = format!("{:#}", result.unwrap_err());
        assert_eq!(attempts, 2);
        assert!(message.contains("weights corrupt"));
        assert!(message.contains("CPU fallback failed"));
    }

    #[test]
    fn test_no_retry_when_already_on_baseline() {
        let mut attempts = 0;
        let result: anyhow::Result<()> = fallback_once("cpu", "cpu", true, |_| {
            attempts += 1;
            anyhow::bail!("out of memory")
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
