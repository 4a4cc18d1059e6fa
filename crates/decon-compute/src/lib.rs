//! # decon-compute
//!
//! Orchestration of GPU-accelerated Richardson-Lucy deconvolution.
//!
//! The native library does the numerics; this crate owns the protocol
//! around it:
//!
//! - [`otf`] - OTF size prediction, PSF capping under a byte budget, and
//!   OTF provisioning with scoped temp-file cleanup
//! - [`session`] - the device/session lifecycle; one session per volume
//!   shape, exclusive by construction, cleaned up by RAII
//! - [`batch`] - deconvolution of heterogeneous input streams with
//!   session reuse across contiguous same-shape runs
//! - [`transform`] - stateless deskew/affine/rotate wrappers
//! - [`camcor`] - camera residual artifact correction
//!
//! # Concurrency
//!
//! Single-threaded by design. The native device context is global per
//! process; every call blocks until the GPU finishes, and nothing here
//! may be driven from two threads at once.

#![warn(missing_docs)]

pub mod batch;
pub mod camcor;
pub mod error;
pub mod otf;
pub mod session;
pub mod transform;

pub use batch::{decon_batch, BatchConfig, DeconResults};
pub use camcor::{camcor, camcor_init, quick_camcor};
pub use error::{ComputeError, ComputeResult};
pub use otf::{
    cap_psf_size, make_otf, predict_otf_size, predict_otf_size_of, resolve_otf, CapOptions,
    CappedPsf, OtfConfig, PsfSource, ResolvedOtf, DEFAULT_MAX_OTF_SIZE,
};
pub use session::{
    Background, DeconOptions, DeconOutput, DeconSession, GpuDevice, SessionConfig,
};
pub use transform::{affine_gpu, default_deskew_width, deskew_gpu, rotate_gpu, PadValue};
