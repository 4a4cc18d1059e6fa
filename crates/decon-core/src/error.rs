//! Error types for decon-core operations.
//!
//! The [`CoreError`] enum covers the failure modes of volume construction,
//! indexing, and format conversion. Higher layers (`decon-io`,
//! `decon-compute`) wrap these into their own error types via `#[from]`.

use crate::VolumeShape;
use thiserror::Error;

/// Result type alias using [`CoreError`] as the error type.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while building or manipulating volumes.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A volume shape has a zero dimension.
    ///
    /// Every axis of a [`VolumeShape`] must be at least 1; a degenerate
    /// shape cannot hold data and must be rejected before it reaches the
    /// native layer.
    #[error("invalid volume shape {shape}: every dimension must be positive")]
    InvalidShape {
        /// The offending shape.
        shape: VolumeShape,
    },

    /// A buffer length does not match the voxel count of its shape.
    #[error("buffer of {got} elements does not match shape {shape} ({expected} voxels)")]
    LengthMismatch {
        /// Declared shape.
        shape: VolumeShape,
        /// Voxel count the shape requires.
        expected: usize,
        /// Elements actually provided.
        got: usize,
    },

    /// Two operands disagree in rank or extent.
    #[error("dimension mismatch: {reason}")]
    DimensionMismatch {
        /// What disagreed.
        reason: String,
    },
}

impl CoreError {
    /// Creates an [`CoreError::InvalidShape`] error.
    #[inline]
    pub fn invalid_shape(shape: VolumeShape) -> Self {
        Self::InvalidShape { shape }
    }

    /// Creates a [`CoreError::LengthMismatch`] error.
    #[inline]
    pub fn length_mismatch(shape: VolumeShape, got: usize) -> Self {
        Self::LengthMismatch {
            shape,
            expected: shape.len(),
            got,
        }
    }

    /// Creates a [`CoreError::DimensionMismatch`] error.
    #[inline]
    pub fn dimension_mismatch(reason: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_shape_message_names_dimensions() {
        let err = CoreError::invalid_shape(VolumeShape::new(0, 4, 4));
        assert!(err.to_string().contains("0x4x4"));
    }

    #[test]
    fn length_mismatch_reports_counts() {
        let err = CoreError::length_mismatch(VolumeShape::new(2, 3, 4), 7);
        let msg = err.to_string();
        assert!(msg.contains("24"));
        assert!(msg.contains("7"));
    }
}
