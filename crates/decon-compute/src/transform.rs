//! Stateless GPU geometric transforms: deskew, affine, rotate.
//!
//! These are per-call wrappers with no session: each call validates,
//! converts, runs one native kernel, and returns. They share the device
//! with nothing - the deconvolution state machine is not involved.
//!
//! # Example
//!
//! ```rust,ignore
//! use decon_compute::transform::{deskew_gpu, PadValue};
//!
//! let deskewed = deskew_gpu(&backend, &stack, 0.1, 0.3, 31.5, 0, 0, PadValue::Value(98.0))?;
//! ```

use crate::{ComputeError, ComputeResult};
use decon_core::{AffineMatrix, Volume, VolumeShape, Voxel};
use decon_ffi::{DeskewRequest, NativeBackend};
use tracing::debug;

/// Rank of the volumes this pipeline transforms; affine matrices must be
/// one larger (homogeneous coordinates).
const VOLUME_NDIM: usize = 3;

/// Padding policy for regions a deskew exposes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PadValue {
    /// Use the median of the last Z plane of the input volume.
    #[default]
    Auto,
    /// Pad with a fixed value.
    Value(f32),
}

impl From<f32> for PadValue {
    fn from(v: f32) -> Self {
        PadValue::Value(v)
    }
}

/// Default deskewed width: the input width plus the X range swept by the
/// Z travel projected onto the detection plane.
pub fn default_deskew_width(shape: VolumeShape, dzdata: f32, dxdata: f32, angle: f32) -> u32 {
    let swept = (shape.nz as f64 * dzdata as f64
        * (angle as f64).to_radians().cos().abs()
        / dxdata as f64)
        .floor() as u32;
    shape.nx + swept
}

/// Deskews a stage-scanned volume on the GPU.
///
/// `width == 0` derives the output width from the deskew geometry;
/// [`PadValue::Auto`] resolves to the median of the input's last Z plane
/// before any conversion. The kernel works in f32; the result is
/// converted back to the input voxel type.
pub fn deskew_gpu<O: NativeBackend, T: Voxel>(
    backend: &O,
    volume: &Volume<T>,
    dxdata: f32,
    dzdata: f32,
    angle: f32,
    width: u32,
    shift: i32,
    pad: PadValue,
) -> ComputeResult<Volume<T>> {
    let pad_val = match pad {
        PadValue::Auto => volume.median_of_last_plane(),
        PadValue::Value(v) => v,
    };

    let shape = volume.shape();
    let out_width = if width == 0 {
        default_deskew_width(shape, dzdata, dxdata, angle)
    } else {
        width
    };
    let out_shape = VolumeShape::new(shape.nz, shape.ny, out_width);
    debug!(%shape, %out_shape, angle, "deskew");

    let raw: Volume<f32> = volume.convert();
    let mut result = vec![0.0f32; out_shape.len()];
    backend.deskew(DeskewRequest {
        raw: raw.as_slice(),
        shape,
        dz: dzdata,
        dx: dxdata,
        angle,
        result: &mut result,
        out_width,
        shift,
        pad_val,
    })?;

    Ok(Volume::<f32>::from_vec(out_shape, result)?.convert())
}

/// Applies a 4x4 affine transformation to a volume on the GPU.
///
/// With `voxel_size` `(dz, dy, dx)` the matrix is interpreted in world
/// coordinates: the native layer maps intrinsic coordinates to sample
/// space, transforms, and maps back (and takes the sizes in reversed
/// `(dx, dy, dz)` order). Without it the transform acts directly on
/// intrinsic coordinates.
///
/// The output shape always equals the input shape (general non-cropping
/// transform); the result is f32. Fails with
/// [`ComputeError::DimensionMismatch`] unless the matrix rank is
/// `volume rank + 1`.
pub fn affine_gpu<O: NativeBackend, T: Voxel>(
    backend: &O,
    volume: &Volume<T>,
    matrix: &AffineMatrix,
    voxel_size: Option<[f64; 3]>,
) -> ComputeResult<Volume<f32>> {
    if matrix.n() != VOLUME_NDIM + 1 {
        return Err(ComputeError::dimension_mismatch(format!(
            "{rank}x{rank} transform matrix used on a {VOLUME_NDIM}-dimensional volume",
            rank = matrix.n(),
        )));
    }

    let shape = volume.shape();
    let raw: Volume<f32> = volume.convert();
    let mut result = vec![0.0f32; shape.len()];
    let flat = matrix.to_f32_row_major();

    match voxel_size {
        Some([dz, dy, dx]) => backend.affine_transform_referenced(
            raw.as_slice(),
            shape,
            [dx as f32, dy as f32, dz as f32],
            &mut result,
            &flat,
        )?,
        None => backend.affine_transform(raw.as_slice(), shape, &mut result, &flat)?,
    }

    Ok(Volume::from_vec(shape, result)?)
}

/// Rotates a volume about the Y axis on the GPU.
///
/// Composes translate-to-center, Z resampling by `dx / (deg2rad(angle)
/// * dz)`, rotation by `angle` degrees (negated for `reverse`), and the
/// inverse translation. The composition is accumulated in f64 and cast
/// to f32 once, inside [`affine_gpu`].
pub fn rotate_gpu<O: NativeBackend, T: Voxel>(
    backend: &O,
    volume: &Volume<T>,
    dzdata: f32,
    dxdata: f32,
    angle: f32,
    reverse: bool,
) -> ComputeResult<Volume<f32>> {
    let angle = angle as f64;
    let xz_ratio = dxdata as f64 / (angle.to_radians() * dzdata as f64);
    let theta = if reverse {
        -angle.to_radians()
    } else {
        angle.to_radians()
    };

    let shape = volume.shape();
    let (nx, ny, nz) = (shape.nx as f64, shape.ny as f64, shape.nz as f64);

    let to_origin = AffineMatrix::translation(nx / 2.0, ny / 2.0, nz / 2.0);
    let resample_z = AffineMatrix::scale_z(xz_ratio);
    let rotate = AffineMatrix::rotation_y(theta);
    let from_origin = AffineMatrix::translation(-nx / 2.0, -ny / 2.0, -nz / 2.0);

    let compound = AffineMatrix::identity(4)
        .mul(&to_origin)
        .mul(&resample_z)
        .mul(&rotate)
        .mul(&from_origin);

    affine_gpu(backend, volume, &compound, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use decon_ffi::MockBackend;

    fn ramp_u16(shape: VolumeShape) -> Volume<u16> {
        let data: Vec<u16> = (0..shape.len()).map(|i| i as u16).collect();
        Volume::from_vec(shape, data).unwrap()
    }

    #[test]
    fn default_width_follows_geometry() {
        let shape = VolumeShape::new(10, 4, 64);
        // 10 planes * 0.3 um / 0.1 um * cos(31.5 deg) = 25.5 -> 25 extra
        assert_eq!(default_deskew_width(shape, 0.3, 0.1, 31.5), 64 + 25);
        // 90 degrees sweeps nothing
        assert_eq!(default_deskew_width(shape, 0.3, 0.1, 90.0), 64);
    }

    #[test]
    fn deskew_pads_and_preserves_dtype() {
        let backend = MockBackend::new();
        let shape = VolumeShape::new(4, 4, 8);
        let volume = ramp_u16(shape);

        let out = deskew_gpu(&backend, &volume, 0.1, 0.3, 31.5, 0, 0, 98.0.into()).unwrap();
        assert_eq!(out.shape().nz, shape.nz);
        assert!(out.shape().nx > shape.nx);
        // original data survives in the row prefix, pad value in the tail
        assert_eq!(out.get(0, 0, 0), volume.get(0, 0, 0));
        assert_eq!(out.get(0, 0, out.shape().nx - 1), 98);
        assert_eq!(backend.state().pad_vals, vec![98.0]);
    }

    #[test]
    fn deskew_auto_pad_uses_last_plane_median() {
        let backend = MockBackend::new();
        let shape = VolumeShape::new(2, 2, 2);
        let mut data = vec![0u16; shape.len()];
        data[4..].copy_from_slice(&[10, 10, 20, 20]);
        let volume = Volume::from_vec(shape, data).unwrap();

        deskew_gpu(&backend, &volume, 0.1, 0.3, 31.5, 0, 0, PadValue::Auto).unwrap();
        assert_eq!(backend.state().pad_vals, vec![15.0]);
    }

    #[test]
    fn deskew_honors_explicit_width() {
        let backend = MockBackend::new();
        let shape = VolumeShape::new(4, 4, 8);
        let out =
            deskew_gpu(&backend, &ramp_u16(shape), 0.1, 0.3, 31.5, 20, 0, 0.0.into()).unwrap();
        assert_eq!(out.shape().nx, 20);
    }

    #[test]
    fn affine_identity_round_trips() {
        let backend = MockBackend::new();
        let shape = VolumeShape::new(3, 4, 5);
        let volume = ramp_u16(shape);

        let out = affine_gpu(&backend, &volume, &AffineMatrix::identity(4), None).unwrap();
        assert_eq!(out.shape(), shape);
        for (i, v) in out.as_slice().iter().enumerate() {
            assert_eq!(*v, i as f32);
        }
    }

    #[test]
    fn affine_rejects_wrong_rank_matrices() {
        let backend = MockBackend::new();
        let volume = ramp_u16(VolumeShape::new(3, 4, 5));

        for rank in [3, 5] {
            let err = affine_gpu(&backend, &volume, &AffineMatrix::identity(rank), None)
                .unwrap_err();
            assert!(matches!(err, ComputeError::DimensionMismatch { .. }));
        }
        assert_eq!(backend.state().affines, 0);
    }

    #[test]
    fn affine_passes_voxel_size_reversed() {
        let backend = MockBackend::new();
        let volume = ramp_u16(VolumeShape::new(3, 4, 5));

        affine_gpu(
            &backend,
            &volume,
            &AffineMatrix::identity(4),
            Some([0.5, 0.2, 0.1]), // (dz, dy, dx)
        )
        .unwrap();
        let state = backend.state();
        assert_eq!(state.affines_referenced, 1);
        assert_eq!(state.last_voxel, Some([0.1, 0.2, 0.5]));
    }

    #[test]
    fn rotate_delegates_to_affine() {
        let backend = MockBackend::new();
        let volume = ramp_u16(VolumeShape::new(4, 4, 4));
        let out = rotate_gpu(&backend, &volume, 0.5, 0.1, 31.5, false).unwrap();
        assert_eq!(out.shape(), volume.shape());
        assert_eq!(backend.state().affines, 1);
    }

    #[test]
    fn rotate_compound_fixes_the_volume_center() {
        let shape = VolumeShape::new(8, 6, 10);
        let (nx, ny, nz) = (shape.nx as f64, shape.ny as f64, shape.nz as f64);
        let theta = 31.5f64.to_radians();
        let xz = 0.1 / (theta * 0.5);
        let m = AffineMatrix::identity(4)
            .mul(&AffineMatrix::translation(nx / 2.0, ny / 2.0, nz / 2.0))
            .mul(&AffineMatrix::scale_z(xz))
            .mul(&AffineMatrix::rotation_y(theta))
            .mul(&AffineMatrix::translation(-nx / 2.0, -ny / 2.0, -nz / 2.0));

        let center = [nx / 2.0, ny / 2.0, nz / 2.0, 1.0];
        for row in 0..4 {
            let mapped: f64 = (0..4).map(|col| m.get(row, col) * center[col]).sum();
            approx::assert_relative_eq!(mapped, center[row], epsilon = 1e-9);
        }
    }
}
