//! Backend selection for the executables.
//!
//! The library itself is generic over [`Backend`]; the binaries pick a concrete
//! backend through cargo features (`ndarray` by default).

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;

pub type Element = f32;

/// Recorder used for every weight and optimizer file of a model artifact.
pub type RecorderTy = NamedMpkFileRecorder<FullPrecisionSettings>;

#[cfg(feature = "cuda")]
pub type MainBackend = burn::backend::Cuda<Element, i32>;
#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, i32>;
#[cfg(all(
    any(feature = "tch-cpu", feature = "tch-gpu"),
    not(any(feature = "cuda", feature = "wgpu"))
))]
pub type MainBackend = burn::backend::libtorch::LibTorch<Element>;
#[cfg(not(any(
    feature = "cuda",
    feature = "wgpu",
    feature = "tch-cpu",
    feature = "tch-gpu"
)))]
pub type MainBackend = burn::backend::NdArray<Element, i32>;

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;

pub trait MainDevice: Backend {
    fn main_device() -> <Self as Backend>::Device {
        Default::default()
    }
}

#[cfg(not(feature = "tch-gpu"))]
impl MainDevice for MainBackend {}
#[cfg(all(feature = "tch-gpu", not(target_os = "macos")))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Cuda(0)
    }
}
#[cfg(all(feature = "tch-gpu", target_os = "macos"))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Mps
    }
}

impl MainDevice for MainAutoBackend {
    fn main_device() -> <Self as Backend>::Device {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device()
    }
}

/// Sizes the global worker pool used by the numeric backend.
///
/// `0` keeps the backend default. The pool can be configured only once per
/// process and must be set before the first tensor operation, so this runs at
/// the very start of `main`.
pub fn forward_thread_count(num_threads: usize) -> crate::Result<()> {
    if num_threads == 0 {
        log::info!("running with the default number of threads");
        return Ok(());
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;
    log::info!("running with nthreads = {num_threads}");
    Ok(())
}
