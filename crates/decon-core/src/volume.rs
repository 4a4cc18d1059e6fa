//! 3D volume buffer types.
//!
//! [`Volume`] is a contiguous, Z-major stack of planes with a typed element,
//! the only array layout the native layer accepts. [`AnyVolume`] carries the
//! two element types that occur on disk (u16 camera data, f32 intermediate
//! results) through code paths that cannot be generic.
//!
//! # Layout
//!
//! Voxel (z, y, x) lives at linear offset `(z * ny + y) * nx + x`. All
//! buffers handed to the native layer are exactly `nz * ny * nx` elements,
//! enforced at construction.

use crate::{CoreError, CoreResult, VolumeShape};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Element format tag for a [`Volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoxelFormat {
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit unsigned integer (native raw-data format).
    U16,
    /// 32-bit float (native result format).
    F32,
}

/// Element type of a [`Volume`].
///
/// Conversions saturate: `from_f32` clamps to the integer range and maps
/// NaN to zero, matching the `as` cast semantics used throughout.
pub trait Voxel: Copy + PartialOrd + Send + Sync + 'static {
    /// Format tag for runtime dispatch.
    const FORMAT: VoxelFormat;

    /// Widens this element to f32.
    fn to_f32(self) -> f32;

    /// Narrows an f32 to this element type (saturating).
    fn from_f32(v: f32) -> Self;
}

impl Voxel for u8 {
    const FORMAT: VoxelFormat = VoxelFormat::U8;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v as u8
    }
}

impl Voxel for u16 {
    const FORMAT: VoxelFormat = VoxelFormat::U16;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v as u16
    }
}

impl Voxel for f32 {
    const FORMAT: VoxelFormat = VoxelFormat::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

/// A contiguous 3D volume with typed elements.
///
/// # Example
///
/// ```rust
/// use decon_core::{Volume, VolumeShape};
///
/// let shape = VolumeShape::new(2, 3, 4);
/// let vol = Volume::<u16>::from_vec(shape, vec![0; shape.len()]).unwrap();
/// assert_eq!(vol.shape().nz, 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T: Voxel> {
    shape: VolumeShape,
    data: Vec<T>,
}

impl<T: Voxel> Volume<T> {
    /// Creates a volume from a shape and a matching buffer.
    ///
    /// Fails with [`CoreError::InvalidShape`] for degenerate shapes and
    /// [`CoreError::LengthMismatch`] when the buffer length disagrees with
    /// the voxel count.
    pub fn from_vec(shape: VolumeShape, data: Vec<T>) -> CoreResult<Self> {
        shape.validate()?;
        if data.len() != shape.len() {
            return Err(CoreError::length_mismatch(shape, data.len()));
        }
        Ok(Self { shape, data })
    }

    /// Creates a volume filled with a single value.
    pub fn filled(shape: VolumeShape, value: T) -> CoreResult<Self> {
        shape.validate()?;
        Ok(Self {
            shape,
            data: vec![value; shape.len()],
        })
    }

    /// The shape of this volume.
    #[inline]
    pub fn shape(&self) -> VolumeShape {
        self.shape
    }

    /// Element format tag.
    #[inline]
    pub fn format(&self) -> VoxelFormat {
        T::FORMAT
    }

    /// Voxel at (z, y, x).
    #[inline]
    pub fn get(&self, z: u32, y: u32, x: u32) -> T {
        self.data[self.shape.index(z, y, x)]
    }

    /// Entire buffer in Z-major order.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable buffer in Z-major order.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consumes the volume, returning its buffer.
    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// One Z plane as a slice.
    pub fn plane(&self, z: u32) -> &[T] {
        let len = self.shape.plane_len();
        let start = z as usize * len;
        &self.data[start..start + len]
    }

    /// Median intensity of the last Z plane.
    ///
    /// Used to resolve the `auto` background and pad-value sentinels: the
    /// last plane of a stack is assumed to carry mostly camera offset.
    /// Even-length planes average the two middle samples.
    pub fn median_of_last_plane(&self) -> f32 {
        let mut plane: Vec<f32> = self
            .plane(self.shape.nz - 1)
            .iter()
            .map(|v| v.to_f32())
            .collect();
        plane.sort_unstable_by(f32::total_cmp);
        let n = plane.len();
        if n % 2 == 1 {
            plane[n / 2]
        } else {
            (plane[n / 2 - 1] + plane[n / 2]) / 2.0
        }
    }

    /// Coordinates of the maximum voxel, first in scan order on ties.
    pub fn peak_index(&self) -> (u32, u32, u32) {
        let mut best = 0usize;
        for (i, v) in self.data.iter().enumerate() {
            if v.partial_cmp(&self.data[best]) == Some(std::cmp::Ordering::Greater) {
                best = i;
            }
        }
        self.shape.coords(best)
    }

    /// Symmetric crop around `center` with the given full extents per axis.
    ///
    /// Each axis keeps `[max(0, c - extent/2), min(dim, c + extent/2))`,
    /// so the crop clips at the volume edges and never indexes out of
    /// bounds. Fails with [`CoreError::InvalidShape`] if clipping collapses
    /// an axis to zero.
    pub fn crop_around(
        &self,
        center: (u32, u32, u32),
        extents: (u32, u32, u32),
    ) -> CoreResult<Volume<T>> {
        let (nz, ny, nx) = (self.shape.nz, self.shape.ny, self.shape.nx);
        let bounds = |c: u32, extent: u32, dim: u32| -> (u32, u32) {
            let lo = c.saturating_sub(extent / 2);
            let hi = (c + extent / 2).min(dim);
            (lo, hi)
        };
        let (z0, z1) = bounds(center.0, extents.0, nz);
        let (y0, y1) = bounds(center.1, extents.1, ny);
        let (x0, x1) = bounds(center.2, extents.2, nx);

        let out_shape = VolumeShape::new(
            z1.saturating_sub(z0),
            y1.saturating_sub(y0),
            x1.saturating_sub(x0),
        );
        out_shape.validate()?;

        let mut data = Vec::with_capacity(out_shape.len());
        for z in z0..z1 {
            for y in y0..y1 {
                let row = self.shape.index(z, y, x0);
                data.extend_from_slice(&self.data[row..row + out_shape.nx as usize]);
            }
        }
        Volume::from_vec(out_shape, data)
    }

    /// Converts every element to another voxel type.
    pub fn convert<U: Voxel>(&self) -> Volume<U> {
        #[cfg(feature = "parallel")]
        let data: Vec<U> = self
            .data
            .par_iter()
            .map(|v| U::from_f32(v.to_f32()))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let data: Vec<U> = self.data.iter().map(|v| U::from_f32(v.to_f32())).collect();

        Volume {
            shape: self.shape,
            data,
        }
    }
}

/// A volume whose element type is decided at runtime.
///
/// Disk stacks arrive as either u16 (raw camera frames) or f32
/// (intermediate results, OTFs); this enum carries both through the
/// non-generic orchestration paths.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyVolume {
    /// 16-bit unsigned stack.
    U16(Volume<u16>),
    /// 32-bit float stack.
    F32(Volume<f32>),
}

impl AnyVolume {
    /// The shape of the underlying volume.
    pub fn shape(&self) -> VolumeShape {
        match self {
            AnyVolume::U16(v) => v.shape(),
            AnyVolume::F32(v) => v.shape(),
        }
    }

    /// Element format of the underlying volume.
    pub fn format(&self) -> VoxelFormat {
        match self {
            AnyVolume::U16(_) => VoxelFormat::U16,
            AnyVolume::F32(_) => VoxelFormat::F32,
        }
    }

    /// Converts into the u16 representation the decon kernel requires.
    pub fn into_u16(self) -> Volume<u16> {
        match self {
            AnyVolume::U16(v) => v,
            AnyVolume::F32(v) => v.convert(),
        }
    }

    /// Converts into the f32 representation the transform kernels require.
    pub fn into_f32(self) -> Volume<f32> {
        match self {
            AnyVolume::U16(v) => v.convert(),
            AnyVolume::F32(v) => v,
        }
    }

    /// Median intensity of the last Z plane.
    pub fn median_of_last_plane(&self) -> f32 {
        match self {
            AnyVolume::U16(v) => v.median_of_last_plane(),
            AnyVolume::F32(v) => v.median_of_last_plane(),
        }
    }

    /// Coordinates of the maximum voxel, first in scan order on ties.
    pub fn peak_index(&self) -> (u32, u32, u32) {
        match self {
            AnyVolume::U16(v) => v.peak_index(),
            AnyVolume::F32(v) => v.peak_index(),
        }
    }
}

impl From<Volume<u16>> for AnyVolume {
    fn from(v: Volume<u16>) -> Self {
        AnyVolume::U16(v)
    }
}

impl From<Volume<f32>> for AnyVolume {
    fn from(v: Volume<f32>) -> Self {
        AnyVolume::F32(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_u16(shape: VolumeShape) -> Volume<u16> {
        let data: Vec<u16> = (0..shape.len()).map(|i| i as u16).collect();
        Volume::from_vec(shape, data).unwrap()
    }

    #[test]
    fn from_vec_checks_length() {
        let shape = VolumeShape::new(2, 2, 2);
        assert!(Volume::<u16>::from_vec(shape, vec![0; 7]).is_err());
        assert!(Volume::<u16>::from_vec(shape, vec![0; 8]).is_ok());
    }

    #[test]
    fn get_follows_scan_order() {
        let vol = ramp_u16(VolumeShape::new(2, 3, 4));
        assert_eq!(vol.get(0, 0, 0), 0);
        assert_eq!(vol.get(0, 1, 0), 4);
        assert_eq!(vol.get(1, 0, 0), 12);
        assert_eq!(vol.get(1, 2, 3), 23);
    }

    #[test]
    fn median_of_last_plane_averages_even_counts() {
        // last plane holds 12..24, median = (17 + 18) / 2
        let vol = ramp_u16(VolumeShape::new(2, 3, 4));
        assert_eq!(vol.median_of_last_plane(), 17.5);
    }

    #[test]
    fn peak_index_prefers_first_on_ties() {
        let shape = VolumeShape::new(2, 2, 2);
        let mut data = vec![0u16; shape.len()];
        data[3] = 9;
        data[5] = 9;
        let vol = Volume::from_vec(shape, data).unwrap();
        assert_eq!(vol.peak_index(), (0, 1, 1));
    }

    #[test]
    fn crop_around_clips_at_edges() {
        let vol = ramp_u16(VolumeShape::new(4, 6, 6));
        // center near the corner; lower bounds clip to 0
        let crop = vol.crop_around((0, 1, 1), (4, 4, 4)).unwrap();
        assert_eq!(crop.shape(), VolumeShape::new(2, 3, 3));
        assert_eq!(crop.get(0, 0, 0), vol.get(0, 0, 0));
    }

    #[test]
    fn crop_around_interior_is_symmetric() {
        let vol = ramp_u16(VolumeShape::new(8, 8, 8));
        let crop = vol.crop_around((4, 4, 4), (4, 4, 4)).unwrap();
        assert_eq!(crop.shape(), VolumeShape::new(4, 4, 4));
        assert_eq!(crop.get(0, 0, 0), vol.get(2, 2, 2));
    }

    #[test]
    fn convert_saturates() {
        let shape = VolumeShape::new(1, 1, 2);
        let vol = Volume::<f32>::from_vec(shape, vec![-5.0, 70000.0]).unwrap();
        let u: Volume<u16> = vol.convert();
        assert_eq!(u.as_slice(), &[0, u16::MAX]);
    }

    #[test]
    fn any_volume_round_trip() {
        let vol = ramp_u16(VolumeShape::new(2, 2, 2));
        let any: AnyVolume = vol.clone().into();
        assert_eq!(any.format(), VoxelFormat::U16);
        assert_eq!(any.clone().into_f32().get(1, 1, 1), 7.0);
        assert_eq!(any.into_u16(), vol);
    }
}
