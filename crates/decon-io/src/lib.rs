//! # decon-io
//!
//! Volume I/O for GPU deconvolution pipelines.
//!
//! - [`tiff`] - multi-page grayscale TIFF stacks (u16 raw data, f32
//!   results and OTF files)
//! - [`detect`] - the OTF-vs-PSF classification heuristic
//! - [`stream`] - normalization of heterogeneous inputs (arrays, files,
//!   directories, nested lists) into one lazy volume sequence

#![warn(missing_docs)]

pub mod detect;
pub mod error;
pub mod stream;
pub mod tiff;

pub use detect::{path_is_otf, volume_is_otf};
pub use error::{IoError, IoResult};
pub use stream::{VolumeSource, VolumeStream, DEFAULT_PATTERN};
