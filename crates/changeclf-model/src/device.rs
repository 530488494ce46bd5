//! Compute device resolution.
//!
//! `auto` walks CUDA, then Metal, then CPU, using only the backends compiled
//! in (`cuda` / `metal` features). Naming an accelerator explicitly makes its
//! absence an error instead of a silent CPU run.

use candle_core::Device;
use changeclf_core::{ChangeClfError, DeviceKind, Result};

/// Resolve `kind` to a concrete device.
pub fn select_device(kind: DeviceKind) -> Result<Device> {
    let device = match kind {
        DeviceKind::Cpu => Device::Cpu,
        DeviceKind::Cuda => Device::new_cuda(0)
            .map_err(|e| ChangeClfError::Config(format!("CUDA device unavailable: {e}")))?,
        DeviceKind::Metal => Device::new_metal(0)
            .map_err(|e| ChangeClfError::Config(format!("Metal device unavailable: {e}")))?,
        DeviceKind::Auto => first_available(),
    };
    tracing::info!(device = ?device, "Selected compute device");
    Ok(device)
}

fn first_available() -> Device {
    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!(error = %e, "CUDA compiled in but no GPU available, falling back"),
        }
    }
    if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!(error = %e, "Metal compiled in but no device available, falling back"),
        }
    }
    Device::Cpu
}
