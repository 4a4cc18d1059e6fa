//! OTF-vs-PSF classification.
//!
//! An OTF file is a single-page float32 TIFF holding the radially averaged
//! transfer function; a PSF is a multi-page intensity stack. Nothing in the
//! file tags which is which, so classification is a heuristic: the OTF's
//! complex samples are stored as interleaved real pairs and the second X
//! column (the imaginary part of the kr=0 sample) is always zero.
//!
//! The heuristic can misclassify adversarial inputs - a genuine single-plane
//! f32 image whose second column happens to be all zero reads as an OTF.
//! It is kept exactly as specified and isolated here so it stays
//! independently testable; callers that know what they hold should not ask.

use crate::{tiff, IoResult};
use decon_core::AnyVolume;
use std::path::Path;

/// Returns true if an in-memory volume looks like a radially averaged OTF.
///
/// The test requires: f32 samples, a single Z plane, at least two X
/// columns, and a second X column that is entirely zero.
pub fn volume_is_otf(volume: &AnyVolume) -> bool {
    let AnyVolume::F32(v) = volume else {
        return false;
    };
    let shape = v.shape();
    if shape.nz != 1 || shape.nx < 2 {
        return false;
    }
    (0..shape.ny).all(|y| v.get(0, y, 1) == 0.0)
}

/// Returns true if the file at `path` looks like a radially averaged OTF.
///
/// Single-page f32 TIFFs are loaded and put through the same column test as
/// [`volume_is_otf`]; anything else (multi-page, integer samples) is a PSF.
pub fn path_is_otf<P: AsRef<Path>>(path: P) -> IoResult<bool> {
    let path = path.as_ref();
    let dims = tiff::read_dims(path)?;
    if dims.nz != 1 {
        return Ok(false);
    }
    let volume = tiff::read_volume(path)?;
    Ok(volume_is_otf(&volume))
}

#[cfg(test)]
mod tests {
    use super::*;
    use decon_core::{Volume, VolumeShape};

    fn otf_like(ny: u32, nx: u32) -> AnyVolume {
        let shape = VolumeShape::new(1, ny, nx);
        let data: Vec<f32> = (0..shape.len())
            .map(|i| if i % nx as usize == 1 { 0.0 } else { 1.0 })
            .collect();
        AnyVolume::F32(Volume::from_vec(shape, data).unwrap())
    }

    #[test]
    fn flat_otf_layout_is_detected() {
        assert!(volume_is_otf(&otf_like(16, 10)));
    }

    #[test]
    fn nonzero_second_column_is_a_psf() {
        let shape = VolumeShape::new(1, 4, 4);
        let vol = AnyVolume::F32(Volume::filled(shape, 0.5).unwrap());
        assert!(!volume_is_otf(&vol));
    }

    #[test]
    fn integer_volumes_are_never_otfs() {
        let shape = VolumeShape::new(1, 4, 4);
        let vol = AnyVolume::U16(Volume::filled(shape, 0).unwrap());
        assert!(!volume_is_otf(&vol));
    }

    #[test]
    fn multi_plane_volumes_are_never_otfs() {
        let shape = VolumeShape::new(3, 4, 4);
        let data = vec![0.0f32; shape.len()];
        let vol = AnyVolume::F32(Volume::from_vec(shape, data).unwrap());
        assert!(!volume_is_otf(&vol));
    }

    #[test]
    fn file_round_trip_preserves_classification() {
        let dir = tempfile::tempdir().unwrap();

        let otf_path = dir.path().join("otf.tif");
        tiff::write_volume(&otf_path, &otf_like(8, 12)).unwrap();
        assert!(path_is_otf(&otf_path).unwrap());

        let psf_path = dir.path().join("psf.tif");
        let shape = VolumeShape::new(4, 8, 8);
        let psf = AnyVolume::U16(Volume::filled(shape, 7).unwrap());
        tiff::write_volume(&psf_path, &psf).unwrap();
        assert!(!path_is_otf(&psf_path).unwrap());
    }
}
