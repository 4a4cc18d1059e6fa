//! # decon-ffi
//!
//! The native backend boundary of decon-rs.
//!
//! The GPU work - FFT-based Richardson-Lucy iteration, affine/deskew
//! resampling, camera correction, OTF generation - lives in two native
//! shared libraries. This crate owns everything about talking to them:
//!
//! - [`NativeBackend`] - the trait every consumer programs against
//! - [`CudaDeconLib`] - the production binding ([`libloading`], eager
//!   symbol resolution, typed errors)
//! - [`NativeVersion`] - load-time capability negotiation for the ABI
//!   break at 0.6 (skewed-decon flag)
//! - `MockBackend` (feature `mock`) - call-count double for lifecycle tests
//!
//! Nothing here manages session lifecycles; that discipline lives in
//! `decon-compute`, which drives this trait.

#![warn(missing_docs)]

pub mod cudadecon;
pub mod error;
pub mod backend;
pub mod version;

#[cfg(feature = "mock")]
pub mod mock;

pub use cudadecon::{CudaDeconLib, LoadOptions, LIBRARY_ENV, RADIALFT_ENV};
pub use error::{FfiError, FfiResult};
pub use backend::{
    DeconInitRequest, DeconRunRequest, DeskewRequest, NativeBackend, OtfGenRequest,
};
pub use version::{NativeVersion, VERSION_ENV};

#[cfg(feature = "mock")]
pub use mock::{MockBackend, MockState};
