use std::process::{Command, Stdio};
use tracing::info;

/// GPU policy resolved from the `USE_GPU` environment variable.
/// Unset or unrecognized values fall back to auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuMode {
    Auto,
    ForceOn,
    ForceOff,
}

impl GpuMode {
    pub fn from_env() -> Self {
        match std::env::var("USE_GPU") {
            Ok(v) => Self::parse(&v),
            Err(_) => GpuMode::Auto,
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => GpuMode::ForceOn,
            "0" | "false" | "no" | "off" => GpuMode::ForceOff,
            _ => GpuMode::Auto,
        }
    }

    /// Decide whether to request GPU passthrough. Forced modes never
    /// probe the host; auto mode asks `nvidia-smi`.
    pub fn resolve(self) -> bool {
        match self {
            GpuMode::ForceOn => {
                info!("GPU forced on via USE_GPU");
                true
            }
            GpuMode::ForceOff => {
                info!("GPU forced off via USE_GPU");
                false
            }
            GpuMode::Auto => {
                let found = gpu_available();
                if found {
                    info!("NVIDIA GPU detected, enabling GPU passthrough");
                } else {
                    info!("no NVIDIA GPU detected, running on CPU");
                }
                found
            }
        }
    }
}

/// Probe for a usable NVIDIA GPU. A missing binary or a non-zero exit
/// both mean "no GPU"; this never fails the pipeline.
pub fn gpu_available() -> bool {
    Command::new("nvidia-smi")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_truthy_and_falsy_spellings() {
        assert_eq!(GpuMode::parse("1"), GpuMode::ForceOn);
        assert_eq!(GpuMode::parse("TRUE"), GpuMode::ForceOn);
        assert_eq!(GpuMode::parse(" yes "), GpuMode::ForceOn);
        assert_eq!(GpuMode::parse("0"), GpuMode::ForceOff);
        assert_eq!(GpuMode::parse("off"), GpuMode::ForceOff);
        assert_eq!(GpuMode::parse("maybe"), GpuMode::Auto);
        assert_eq!(GpuMode::parse(""), GpuMode::Auto);
    }
}
