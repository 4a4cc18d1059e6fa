//! OTF preparation: size estimation, PSF capping, provisioning.
//!
//! The deconvolution kernel consumes a radially averaged OTF file whose
//! transfer size is bounded (large OTFs overrun the device-side constant
//! budget). This module owns the host-side half of that contract:
//!
//! - [`predict_otf_size`] - exact serialized size an OTF would have, from
//!   the PSF geometry alone
//! - [`cap_psf_size`] - crop an oversized PSF around its peak until the
//!   predicted OTF fits a byte budget
//! - [`CappedPsf`] / [`ResolvedOtf`] - scoped resources that materialize
//!   the capped PSF / generated OTF as temp files and guarantee their
//!   removal on every exit path
//!
//! # Example
//!
//! ```rust,ignore
//! use decon_compute::otf::{resolve_otf, OtfConfig, PsfSource};
//!
//! let otf = resolve_otf(&backend, &PsfSource::from(psf_path), &OtfConfig::default())?;
//! run_sessions(otf.path())?;
//! // temp OTF deleted when `otf` drops
//! ```

use crate::{ComputeError, ComputeResult};
use decon_core::{AnyVolume, Volume, VolumeShape, Voxel};
use decon_ffi::{NativeBackend, OtfGenRequest};
use decon_io::{detect, tiff};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

/// Fixed serialized header overhead of an OTF file, in bytes.
const OTF_HEADER_BYTES: usize = 251;

/// Default OTF byte budget; deconvolution may fail beyond this.
pub const DEFAULT_MAX_OTF_SIZE: usize = 60000;

/// A PSF (or pre-made OTF) input: an on-disk stack or an in-memory volume.
#[derive(Debug, Clone)]
pub enum PsfSource {
    /// Path to a PSF stack or OTF file.
    Path(PathBuf),
    /// In-memory PSF volume.
    Volume(AnyVolume),
}

impl From<PathBuf> for PsfSource {
    fn from(p: PathBuf) -> Self {
        PsfSource::Path(p)
    }
}

impl From<&Path> for PsfSource {
    fn from(p: &Path) -> Self {
        PsfSource::Path(p.to_path_buf())
    }
}

impl From<AnyVolume> for PsfSource {
    fn from(v: AnyVolume) -> Self {
        PsfSource::Volume(v)
    }
}

impl From<Volume<u16>> for PsfSource {
    fn from(v: Volume<u16>) -> Self {
        PsfSource::Volume(v.into())
    }
}

impl From<Volume<f32>> for PsfSource {
    fn from(v: Volume<f32>) -> Self {
        PsfSource::Volume(v.into())
    }
}

/// Serialized size of the OTF a PSF of this shape would produce.
///
/// The radially averaged OTF keeps full Z resolution but only the
/// non-redundant half of X (real-FFT symmetry), one 4-byte pair per
/// complex sample, plus a fixed header. Pure and deterministic;
/// monotonic non-decreasing in both Z and X.
pub fn predict_otf_size(shape: VolumeShape) -> usize {
    let samples = shape.nz as usize * 2 * (shape.nx as usize / 2 + 1);
    OTF_HEADER_BYTES + samples * 4
}

/// [`predict_otf_size`] for a source whose geometry may live on disk.
///
/// File sources read only the TIFF header. Fails with
/// [`ComputeError::InvalidInput`] when the path names no file.
pub fn predict_otf_size_of(source: &PsfSource) -> ComputeResult<usize> {
    match source {
        PsfSource::Volume(v) => Ok(predict_otf_size(v.shape())),
        PsfSource::Path(p) if p.is_file() => Ok(predict_otf_size(tiff::read_dims(p)?)),
        PsfSource::Path(p) => Err(ComputeError::invalid_input(format!(
            "PSF must be an existing file or a volume, got path {}",
            p.display()
        ))),
    }
}

/// Bounds for [`cap_psf_size`].
#[derive(Debug, Clone)]
pub struct CapOptions {
    /// OTF byte budget; `None` disables capping entirely.
    pub max_bytes: Option<usize>,
    /// Smallest XY budget considered before trading Z for XY instead.
    pub min_xy: u32,
    /// Reserved Z floor; the current budget math never applies it.
    pub min_nz: u32,
}

impl Default for CapOptions {
    fn default() -> Self {
        Self {
            max_bytes: Some(DEFAULT_MAX_OTF_SIZE),
            min_xy: 200,
            min_nz: 20,
        }
    }
}

impl CapOptions {
    /// Options with the given budget and default floors.
    pub fn with_budget(max_bytes: Option<usize>) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }
}

/// Crops a PSF so its OTF stays within a byte budget.
///
/// Within-budget inputs are returned unchanged. Oversized inputs are
/// cropped symmetrically about the intensity peak (first maximum in scan
/// order): the Z extent is the largest symmetric window that stays inside
/// the stack; if the XY budget implied by that window falls below
/// `min_xy`, the Z window is recomputed for a `min_xy`-wide crop instead.
/// The crop clips at the volume edges and never indexes negatively.
///
/// Post-condition: `predict_otf_size` of the result is within budget,
/// otherwise [`ComputeError::CapFailure`] - an internal defect, not a
/// user error.
pub fn cap_psf_size<T: Voxel>(
    psf: &Volume<T>,
    options: &CapOptions,
) -> ComputeResult<Volume<T>> {
    let Some(max_bytes) = options.max_bytes else {
        return Ok(psf.clone());
    };
    if predict_otf_size(psf.shape()) <= max_bytes {
        return Ok(psf.clone());
    }

    let shape = psf.shape();
    let (zc, yc, xc) = psf.peak_index();

    // largest symmetric Z window around the peak that stays in bounds
    let half_nz = shape.nz / 2;
    let mut out_nz = 2 * (half_nz - zc.abs_diff(half_nz));

    // widest X the budget allows at that Z window; if it dips below the
    // XY floor, trade Z for XY instead
    let out_nx = if out_nz == 0 {
        0
    } else {
        (max_bytes / (out_nz as usize * 4)).saturating_sub(2) as u32
    };
    if out_nx < options.min_xy {
        out_nz = (max_bytes / ((1 + options.min_xy as usize / 2) * 8)) as u32;
    }

    let cropped = psf.crop_around((zc, yc, xc), (out_nz, out_nz, out_nz))?;

    let predicted = predict_otf_size(cropped.shape());
    if predicted > max_bytes {
        return Err(ComputeError::CapFailure {
            shape: cropped.shape(),
            predicted,
            budget: max_bytes,
        });
    }
    debug!(from = %shape, to = %cropped.shape(), predicted, "capped PSF");
    Ok(cropped)
}

fn cap_any(psf: &AnyVolume, options: &CapOptions) -> ComputeResult<AnyVolume> {
    Ok(match psf {
        AnyVolume::U16(v) => AnyVolume::U16(cap_psf_size(v, options)?),
        AnyVolume::F32(v) => AnyVolume::F32(cap_psf_size(v, options)?),
    })
}

fn temp_tif() -> ComputeResult<TempPath> {
    let file = tempfile::Builder::new()
        .prefix("decon-")
        .suffix(".tif")
        .tempfile()
        .map_err(decon_io::IoError::from)?;
    Ok(file.into_temp_path())
}

/// Scoped provider of a PSF path guaranteed to satisfy an OTF byte budget.
///
/// Within-budget file inputs are borrowed as-is; everything else is
/// capped and written to a temp file that is removed when this value
/// drops - on success, error, and panic alike.
pub struct CappedPsf {
    path: PathBuf,
    _temp: Option<TempPath>,
}

impl CappedPsf {
    /// Prepares a budget-satisfying PSF path from any source.
    pub fn prepare(source: &PsfSource, max_bytes: Option<usize>) -> ComputeResult<Self> {
        let options = CapOptions::with_budget(max_bytes);

        let volume = match source {
            PsfSource::Path(p) if p.is_file() => {
                if predict_otf_size_of(source)? <= max_bytes.unwrap_or(usize::MAX) {
                    return Ok(Self {
                        path: p.clone(),
                        _temp: None,
                    });
                }
                tiff::read_volume(p)?
            }
            PsfSource::Path(p) => {
                return Err(ComputeError::invalid_input(format!(
                    "PSF must be an existing file or a volume, got path {}",
                    p.display()
                )));
            }
            PsfSource::Volume(v) => v.clone(),
        };

        let capped = cap_any(&volume, &options)?;
        let temp = temp_tif()?;
        tiff::write_volume(&temp, &capped)?;
        Ok(Self {
            path: temp.to_path_buf(),
            _temp: Some(temp),
        })
    }

    /// The budget-satisfying PSF file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parameters for OTF generation.
#[derive(Debug, Clone)]
pub struct OtfConfig {
    /// PSF Z-step size in microns.
    pub dzpsf: f32,
    /// PSF XY pixel size in microns.
    pub dxpsf: f32,
    /// Emission wavelength in nanometers.
    pub wavelength_nm: u32,
    /// Numerical aperture.
    pub na: f32,
    /// Refractive index of the immersion medium.
    pub nimm: f32,
    /// Background to subtract; `None` lets the backend autodetect.
    pub background: Option<f32>,
    /// Zero pixels outside this radial limit (0 = derive from NA/NIMM).
    pub krmax: u32,
    /// Extrapolate kr=1..=this pixel to fix the kr=0 origin value.
    pub fixorigin: u32,
    /// Clean up outside the OTF support.
    pub cleanup: bool,
    /// OTF byte budget applied to the PSF; `None` disables capping.
    pub max_otf_size: Option<usize>,
}

impl Default for OtfConfig {
    fn default() -> Self {
        Self {
            dzpsf: 0.1,
            dxpsf: 0.1,
            wavelength_nm: 520,
            na: 1.25,
            nimm: 1.3,
            background: None,
            krmax: 0,
            fixorigin: 10,
            cleanup: false,
            max_otf_size: Some(DEFAULT_MAX_OTF_SIZE),
        }
    }
}

/// Generates a radially averaged OTF file at `out_path` from a PSF.
///
/// The PSF is capped under `config.max_otf_size` first; any temp file
/// that capping creates is removed before this returns.
pub fn make_otf<O: NativeBackend>(
    backend: &O,
    psf: &PsfSource,
    out_path: &Path,
    config: &OtfConfig,
) -> ComputeResult<()> {
    let capped = CappedPsf::prepare(psf, config.max_otf_size)?;
    backend.otf_generate(&OtfGenRequest {
        psf_path: capped.path(),
        out_path,
        wavelength_nm: config.wavelength_nm,
        dzpsf: config.dzpsf,
        fixorigin: config.fixorigin,
        background: config.background,
        na: config.na,
        nimm: config.nimm,
        dxpsf: config.dxpsf,
        krmax: config.krmax,
        cleanup: config.cleanup,
    })?;
    debug!(otf = %out_path.display(), "generated OTF");
    Ok(())
}

/// A ready-to-use OTF path, with scoped cleanup of anything temporary.
#[derive(Debug)]
pub struct ResolvedOtf {
    path: PathBuf,
    _temp: Option<TempPath>,
}

impl ResolvedOtf {
    /// The OTF file to hand to session init.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Normalizes a PSF-or-OTF input into the path of a usable OTF file.
///
/// - a path classified as an OTF is borrowed directly;
/// - an in-memory volume classified as an OTF is rejected with
///   [`ComputeError::UnsupportedInput`] (numeric OTF arrays are not
///   supported);
/// - anything else is treated as a PSF: materialized to a temp file when
///   in-memory, capped, and run through the OTF generation backend into a
///   temp path that lives exactly as long as the returned value.
pub fn resolve_otf<O: NativeBackend>(
    backend: &O,
    source: &PsfSource,
    config: &OtfConfig,
) -> ComputeResult<ResolvedOtf> {
    match source {
        PsfSource::Path(p) => {
            if !p.is_file() {
                return Err(ComputeError::invalid_input(format!(
                    "PSF/OTF path does not exist: {}",
                    p.display()
                )));
            }
            if detect::path_is_otf(p)? {
                return Ok(ResolvedOtf {
                    path: p.clone(),
                    _temp: None,
                });
            }
        }
        PsfSource::Volume(v) => {
            if detect::volume_is_otf(v) {
                return Err(ComputeError::unsupported_input(
                    "OTFs can only be provided as files, not in-memory arrays",
                ));
            }
        }
    }

    let temp = temp_tif()?;
    make_otf(backend, source, &temp, config)?;
    Ok(ResolvedOtf {
        path: temp.to_path_buf(),
        _temp: Some(temp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use decon_ffi::MockBackend;

    /// PSF with a single hot voxel at `peak`.
    fn peaked_psf(shape: VolumeShape, peak: (u32, u32, u32)) -> Volume<u16> {
        let mut data = vec![10u16; shape.len()];
        data[shape.index(peak.0, peak.1, peak.2)] = 4000;
        Volume::from_vec(shape, data).unwrap()
    }

    #[test]
    fn predict_matches_formula() {
        let shape = VolumeShape::new(64, 128, 128);
        assert_eq!(predict_otf_size(shape), 251 + 64 * 2 * 65 * 4);
    }

    #[test]
    fn predict_is_monotonic_in_z_and_x() {
        let base = predict_otf_size(VolumeShape::new(32, 64, 64));
        assert!(predict_otf_size(VolumeShape::new(33, 64, 64)) >= base);
        assert!(predict_otf_size(VolumeShape::new(32, 64, 66)) >= base);
        // Y never contributes
        assert_eq!(predict_otf_size(VolumeShape::new(32, 999, 64)), base);
    }

    #[test]
    fn predict_of_dangling_path_is_invalid_input() {
        let source = PsfSource::Path(PathBuf::from("/no/such/psf.tif"));
        let err = predict_otf_size_of(&source).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidInput { .. }));
    }

    #[test]
    fn cap_is_identity_within_budget() {
        let psf = peaked_psf(VolumeShape::new(8, 16, 16), (4, 8, 8));
        let capped = cap_psf_size(&psf, &CapOptions::default()).unwrap();
        assert_eq!(capped, psf);
    }

    #[test]
    fn cap_is_identity_when_unbounded() {
        let psf = peaked_psf(VolumeShape::new(128, 512, 512), (64, 256, 256));
        let capped = cap_psf_size(&psf, &CapOptions::with_budget(None)).unwrap();
        assert_eq!(capped, psf);
    }

    #[test]
    fn cap_result_satisfies_budget() {
        let budget = 20_000;
        let psf = peaked_psf(VolumeShape::new(64, 256, 256), (32, 128, 128));
        assert!(predict_otf_size(psf.shape()) > budget);

        let options = CapOptions::with_budget(Some(budget));
        let capped = cap_psf_size(&psf, &options).unwrap();
        assert!(predict_otf_size(capped.shape()) <= budget);
    }

    #[test]
    fn cap_handles_edge_peaks() {
        // peak on the first plane collapses the symmetric Z window; the
        // min_xy fallback must take over instead of dividing by zero
        let budget = 20_000;
        let psf = peaked_psf(VolumeShape::new(64, 256, 256), (0, 128, 128));
        let capped = cap_psf_size(&psf, &CapOptions::with_budget(Some(budget))).unwrap();
        assert!(predict_otf_size(capped.shape()) <= budget);
    }

    #[test]
    fn cap_crops_around_the_peak() {
        let psf = peaked_psf(VolumeShape::new(64, 256, 256), (32, 100, 140));
        let capped = cap_psf_size(&psf, &CapOptions::with_budget(Some(20_000))).unwrap();
        // the hot voxel survives the crop
        let peak = capped.peak_index();
        assert_eq!(capped.get(peak.0, peak.1, peak.2), 4000);
    }

    #[test]
    fn capped_psf_borrows_small_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psf.tif");
        let psf = peaked_psf(VolumeShape::new(8, 16, 16), (4, 8, 8));
        tiff::write_volume(&path, &AnyVolume::U16(psf)).unwrap();

        let capped = CappedPsf::prepare(&PsfSource::from(path.as_path()), Some(60_000)).unwrap();
        assert_eq!(capped.path(), path);
    }

    #[test]
    fn capped_psf_temp_is_removed_on_drop() {
        let psf = peaked_psf(VolumeShape::new(64, 256, 256), (32, 128, 128));
        let capped = CappedPsf::prepare(&PsfSource::from(psf), Some(20_000)).unwrap();
        let temp_path = capped.path().to_path_buf();
        assert!(temp_path.is_file());
        drop(capped);
        assert!(!temp_path.exists());
    }

    #[test]
    fn resolve_borrows_otf_files_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otf.tif");
        let shape = VolumeShape::new(1, 8, 10);
        let data: Vec<f32> = (0..shape.len())
            .map(|i| if i % 10 == 1 { 0.0 } else { 1.0 })
            .collect();
        let otf = AnyVolume::F32(Volume::from_vec(shape, data).unwrap());
        tiff::write_volume(&path, &otf).unwrap();

        let backend = MockBackend::new();
        let resolved =
            resolve_otf(&backend, &PsfSource::from(path.as_path()), &OtfConfig::default())
                .unwrap();
        assert_eq!(resolved.path(), path);
        assert_eq!(backend.state().otf_gens, 0);
    }

    #[test]
    fn resolve_rejects_in_memory_otfs() {
        let shape = VolumeShape::new(1, 8, 10);
        let data: Vec<f32> = (0..shape.len())
            .map(|i| if i % 10 == 1 { 0.0 } else { 1.0 })
            .collect();
        let otf = AnyVolume::F32(Volume::from_vec(shape, data).unwrap());

        let backend = MockBackend::new();
        let err = resolve_otf(&backend, &PsfSource::from(otf), &OtfConfig::default())
            .unwrap_err();
        assert!(matches!(err, ComputeError::UnsupportedInput { .. }));
        assert_eq!(backend.state().otf_gens, 0);
    }

    #[test]
    fn resolve_generates_and_cleans_up_for_psfs() {
        let psf = peaked_psf(VolumeShape::new(8, 16, 16), (4, 8, 8));
        let backend = MockBackend::new();

        let temp_path;
        {
            let resolved =
                resolve_otf(&backend, &PsfSource::from(psf), &OtfConfig::default()).unwrap();
            temp_path = resolved.path().to_path_buf();
            assert!(temp_path.is_file());
        }
        assert_eq!(backend.state().otf_gens, 1);
        assert!(!temp_path.exists());
    }
}
