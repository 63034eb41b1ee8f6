use candle_core::Device;
use once_cell::sync::Lazy;
use tracing::{info, warn};

/// Compute device for the Q-networks. `TUTOR_DEVICE=cpu` skips the CUDA probe.
pub static DEVICE: Lazy<Device> = Lazy::new(|| {
    if std::env::var("TUTOR_DEVICE").is_ok_and(|v| v.eq_ignore_ascii_case("cpu")) {
        return Device::Cpu;
    }
    match Device::new_cuda(0) {
        Ok(device) => {
            info!("initialised CUDA device 0");
            device
        }
        Err(err) => {
            warn!(error = %err, "CUDA unavailable, falling back to CPU");
            Device::Cpu
        }
    }
});
