use std::fmt;
use std::str::FromStr;

use candle_core::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionDevice {
    Cuda,
    Metal,
    Cpu,
}

impl ExecutionDevice {
    /// Opens the candle device for this target (ordinal 0 for GPUs).
    pub fn to_candle(self) -> candle_core::Result<Device> {
        match self {
            Self::Cuda => Device::new_cuda(0),
            Self::Metal => Device::new_metal(0),
            Self::Cpu => Ok(Device::Cpu),
        }
    }
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cuda => "cuda",
            Self::Metal => "metal",
            Self::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            "cpu" => Ok(Self::Cpu),
            other => Err(format!(
                "unknown device '{}', expected cuda, metal or cpu",
                other
            )),
        }
    }
}

pub trait CapabilityProbe {
    fn cuda_available(&self) -> bool;
    fn metal_available(&self) -> bool;
}

/// Asks candle what this build and this host can actually run.
pub struct HostProbe;

impl CapabilityProbe for HostProbe {
    fn cuda_available(&self) -> bool {
        candle_core::utils::cuda_is_available() && Device::new_cuda(0).is_ok()
    }

    fn metal_available(&self) -> bool {
        candle_core::utils::metal_is_available() && Device::new_metal(0).is_ok()
    }
}

fn is_available(probe: &impl CapabilityProbe, device: ExecutionDevice) -> bool {
    match device {
        ExecutionDevice::Cuda => probe.cuda_available(),
        ExecutionDevice::Metal => probe.metal_available(),
        ExecutionDevice::Cpu => true,
    }
}

/// CUDA, then Metal, then CPU. An available `preference` wins over the
/// fixed order; an unavailable one is ignored.
pub fn select_device(
    probe: &impl CapabilityProbe,
    preference: Option<ExecutionDevice>,
) -> ExecutionDevice {
    if let Some(wanted) = preference {
        if is_available(probe, wanted) {
            tracing::info!(device = %wanted, "Using requested device for inference.");
            return wanted;
        }
        tracing::warn!(
            device = %wanted,
            "Requested device is not available, falling back to automatic selection."
        );
    }

    if probe.cuda_available() {
        tracing::info!("GPU is available. Using GPU for inference.");
        ExecutionDevice::Cuda
    } else if probe.metal_available() {
        tracing::info!("Metal is available. Using Metal for inference.");
        ExecutionDevice::Metal
    } else {
        tracing::info!("GPU not available. Using CPU for inference.");
        ExecutionDevice::Cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe {
        cuda: bool,
        metal: bool,
    }

    impl CapabilityProbe for FakeProbe {
        fn cuda_available(&self) -> bool {
            self.cuda
        }

        fn metal_available(&self) -> bool {
            self.metal
        }
    }

    #[test]
    fn falls_back_to_cpu_without_gpu() {
        let probe = FakeProbe {
            cuda: false,
            metal: false,
        };
        assert_eq!(select_device(&probe, None), ExecutionDevice::Cpu);
    }

    #[test]
    fn cuda_has_priority_over_metal() {
        let both = FakeProbe {
            cuda: true,
            metal: true,
        };
        assert_eq!(select_device(&both, None), ExecutionDevice::Cuda);

        let metal_only = FakeProbe {
            cuda: false,
            metal: true,
        };
        assert_eq!(select_device(&metal_only, None), ExecutionDevice::Metal);
    }

    #[test]
    fn preference_is_honoured_only_when_available() {
        let probe = FakeProbe {
            cuda: true,
            metal: false,
        };
        assert_eq!(
            select_device(&probe, Some(ExecutionDevice::Cpu)),
            ExecutionDevice::Cpu
        );
        assert_eq!(
            select_device(&probe, Some(ExecutionDevice::Metal)),
            ExecutionDevice::Cuda
        );
    }

    #[test]
    fn parses_device_names() {
        assert_eq!("CUDA".parse::<ExecutionDevice>(), Ok(ExecutionDevice::Cuda));
        assert_eq!(" Metal ".parse::<ExecutionDevice>(), Ok(ExecutionDevice::Metal));
        assert_eq!("cpu".parse::<ExecutionDevice>(), Ok(ExecutionDevice::Cpu));
        assert!("tpu".parse::<ExecutionDevice>().is_err());
        assert!("gpu".parse::<ExecutionDevice>().is_err());
        assert!("mps".parse::<ExecutionDevice>().is_err());
        assert_eq!(ExecutionDevice::Metal.to_string(), "metal");
    }

    #[test]
    fn cpu_device_always_opens() {
        assert!(ExecutionDevice::Cpu.to_candle().is_ok());
    }
}
