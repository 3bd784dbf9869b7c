//! Backend selection
//!
//! The compute backend is fixed at compile time: CUDA when the `cuda` feature
//! is enabled, NdArray on the CPU otherwise. The device is resolved once at
//! start-up and passed explicitly to everything that allocates tensors.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// Autodiff wrapper used for fine-tuning
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device the run is pinned to
pub type Device = <DefaultBackend as Backend>::Device;

/// Resolve the compute device for this build
pub fn default_device() -> Device {
    Device::default()
}

/// Human-readable backend name for banners and run parameters
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_is_known() {
        let name = backend_name();
        assert!(name.contains("CPU") || name.contains("GPU"));
    }
}
