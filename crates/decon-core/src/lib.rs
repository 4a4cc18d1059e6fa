//! # decon-core
//!
//! Core types for GPU-accelerated volumetric deconvolution pipelines.
//!
//! This crate provides the foundational types used throughout decon-rs:
//!
//! - [`VolumeShape`] - (Z, Y, X) dimension triple, the session identity key
//! - [`Volume`], [`AnyVolume`] - contiguous Z-major volume buffers
//! - [`Voxel`] - element trait covering the formats that cross the FFI
//!   boundary (u8, u16, f32)
//! - [`AffineMatrix`] - row-major f64 square matrix for compound geometric
//!   transforms
//!
//! ## Crate Structure
//!
//! This crate is the foundation of decon-rs and has no internal
//! dependencies. All other decon-rs crates depend on `decon-core`:
//!
//! ```text
//! decon-core (this crate)
//!    ^
//!    |
//!    +-- decon-io (TIFF stacks, input streams)
//!    +-- decon-ffi (native backend boundary)
//!    +-- decon-compute (sessions, batching, transforms)
//!    +-- decon-cli
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel` - rayon-parallel bulk voxel conversion (enabled by default)

#![warn(missing_docs)]

pub mod error;
pub mod matrix;
pub mod shape;
pub mod volume;

pub use error::{CoreError, CoreResult};
pub use matrix::AffineMatrix;
pub use shape::VolumeShape;
pub use volume::{AnyVolume, Volume, Voxel, VoxelFormat};
