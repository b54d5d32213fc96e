//! Shared helpers for the training programs under `examples/`.

use candle::{Device, Result, Tensor};

/// Where the computation runs.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Context {
    #[default]
    Cpu,
    Cuda,
}

pub fn device(context: Context, device_id: usize) -> Result<Device> {
    match context {
        Context::Cpu => Ok(Device::Cpu),
        Context::Cuda => Device::new_cuda(device_id),
    }
}

/// Log everything at `info` unless `RUST_LOG` says otherwise.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 1.0 for every non-padding id, 0.0 for padding (id 0).
pub fn mask(ids: &Tensor) -> Result<Tensor> {
    ids.ne(0u32)?.to_dtype(candle::DType::F32)
}
