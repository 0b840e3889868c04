//! Compute device selection

use crate::error::{Result, ZellieError};
use candle_core::Device;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEVICE_ENV_VAR: &str = "ZELLIE_DEVICE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl FromStr for DevicePreference {
    type Err = ZellieError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            other => Err(ZellieError::InvalidArgument(format!(
                "Unknown device '{}'. Supported: auto, cpu, cuda, metal",
                other
            ))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Cuda => "cuda",
            DevicePreference::Metal => "metal",
        };
        f.write_str(name)
    }
}

/// Get the best available device for inference (GPU if available, CPU fallback)
pub fn best_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA GPU for inference");
            return device;
        }
    }

    if cfg!(target_os = "macos") {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("Using Metal GPU for inference");
                return device;
            }
            Err(e) => warn!("Metal GPU initialization failed: {}", e),
        }
    }

    info!("No GPU available, using CPU");
    Device::Cpu
}

/// Resolve a device, letting `ZELLIE_DEVICE` override the configured preference
pub fn select_device(preference: DevicePreference) -> Result<Device> {
    let preference = match std::env::var(DEVICE_ENV_VAR) {
        Ok(value) => match value.parse::<DevicePreference>() {
            Ok(pref) => {
                info!("Device forced to '{}' from {}", pref, DEVICE_ENV_VAR);
                pref
            }
            Err(_) => {
                warn!("Unknown device '{}' in {}, using configured preference", value, DEVICE_ENV_VAR);
                preference
            }
        },
        Err(_) => preference,
    };

    match preference {
        DevicePreference::Auto => Ok(best_device()),
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0).map_err(|e| {
                    ZellieError::ModelLoad(format!("Failed to initialize CUDA: {}", e))
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(ZellieError::ModelLoad("CUDA support not compiled in".to_string()))
            }
        }
        DevicePreference::Metal => {
            #[cfg(feature = "metal")]
            {
                Device::new_metal(0).map_err(|e| {
                    ZellieError::ModelLoad(format!("Failed to initialize Metal: {}", e))
                })
            }
            #[cfg(not(feature = "metal"))]
            {
                Err(ZellieError::ModelLoad("Metal support not compiled in".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preference() {
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!(" auto ".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert!("tpu".parse::<DevicePreference>().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for pref in [DevicePreference::Auto, DevicePreference::Cpu, DevicePreference::Cuda, DevicePreference::Metal] {
            assert_eq!(pref.to_string().parse::<DevicePreference>().unwrap(), pref);
        }
    }

    #[test]
    fn test_cpu_always_available() {
        if std::env::var(DEVICE_ENV_VAR).is_err() {
            assert!(select_device(DevicePreference::Cpu).unwrap().is_cpu());
        }
    }
}
