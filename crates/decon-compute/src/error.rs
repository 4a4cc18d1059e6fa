//! Orchestration error types.
//!
//! [`ComputeError`] aggregates the lower layers (`decon-core`, `decon-io`,
//! `decon-ffi`) via `#[from]` and adds the failure modes owned by this
//! crate: parameter validation, input classification, the capper's
//! internal invariant, and the session shape contract. Validation errors
//! are raised before any native call or temp-file allocation.

use decon_core::VolumeShape;
use thiserror::Error;

/// Result type for orchestration operations.
pub type ComputeResult<T> = std::result::Result<T, ComputeError>;

/// Errors that can occur while orchestrating the GPU pipeline.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Volume/shape level failure.
    #[error(transparent)]
    Core(#[from] decon_core::CoreError),

    /// Stack I/O or input stream failure.
    #[error(transparent)]
    Io(#[from] decon_io::IoError),

    /// The native backend failed to load or returned a non-zero status.
    #[error(transparent)]
    Native(#[from] decon_ffi::FfiError),

    /// An input is neither a valid path nor a usable volume.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// What was wrong.
        reason: String,
    },

    /// An input form this pipeline deliberately does not accept.
    #[error("unsupported input: {reason}")]
    UnsupportedInput {
        /// What was handed in.
        reason: String,
    },

    /// A parameter combination violates its invariant.
    #[error("invalid parameters: {reason}")]
    InvalidParameters {
        /// The violated invariant.
        reason: String,
    },

    /// A transform matrix does not match the volume rank.
    #[error("dimension mismatch: {reason}")]
    DimensionMismatch {
        /// What disagreed.
        reason: String,
    },

    /// A volume handed to an open session differs from the session shape.
    ///
    /// Sessions are bound to one shape for their whole lifetime; close
    /// and reopen for a different shape.
    #[error("volume shape {got} does not match session shape {expected}")]
    ShapeMismatch {
        /// Shape the session was opened with.
        expected: VolumeShape,
        /// Shape of the offending volume.
        got: VolumeShape,
    },

    /// The input stream yielded no volumes at all.
    #[error("input yielded no volumes")]
    EmptyInput,

    /// The PSF capper failed its own post-condition.
    ///
    /// This signals a defect in the budget math, not a user error; it
    /// should not occur for well-formed PSFs.
    #[error(
        "PSF capping failed: crop {shape} predicts {predicted} bytes, budget is {budget}"
    )]
    CapFailure {
        /// Shape of the crop that broke the budget.
        shape: VolumeShape,
        /// Predicted OTF size of that crop.
        predicted: usize,
        /// The budget it had to satisfy.
        budget: usize,
    },
}

impl ComputeError {
    /// Creates a [`ComputeError::InvalidInput`] error.
    #[inline]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Creates a [`ComputeError::UnsupportedInput`] error.
    #[inline]
    pub fn unsupported_input(reason: impl Into<String>) -> Self {
        Self::UnsupportedInput {
            reason: reason.into(),
        }
    }

    /// Creates a [`ComputeError::InvalidParameters`] error.
    #[inline]
    pub fn invalid_parameters(reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            reason: reason.into(),
        }
    }

    /// Creates a [`ComputeError::DimensionMismatch`] error.
    #[inline]
    pub fn dimension_mismatch(reason: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            reason: reason.into(),
        }
    }
}
