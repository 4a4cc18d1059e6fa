//! The native backend interface.
//!
//! [`NativeBackend`] is the seam between the orchestration layer and the
//! GPU library: every native entry point the pipeline consumes appears
//! here once, with owned-slice arguments instead of raw pointers. The
//! production implementation is [`crate::CudaDeconLib`]; tests substitute
//! an instrumentation double (see the `mock` feature).
//!
//! The backend holds *global* device state: one OTF, one FFT plan, one set
//! of buffers per process. Callers own the discipline of strictly
//! sequential init / run* / cleanup cycles; the orchestration crate makes
//! that discipline a compile-time property.

use crate::FfiResult;
use decon_core::VolumeShape;
use std::path::Path;

/// Arguments to the OTF generation backend.
///
/// Produces a radially averaged OTF file from a PSF stack on disk.
#[derive(Debug, Clone)]
pub struct OtfGenRequest<'a> {
    /// PSF stack to transform.
    pub psf_path: &'a Path,
    /// Destination for the OTF file.
    pub out_path: &'a Path,
    /// Emission wavelength in nanometers.
    pub wavelength_nm: u32,
    /// PSF Z-step size in microns.
    pub dzpsf: f32,
    /// Extrapolate kr=1..=this pixel to fix the kr=0 origin value.
    pub fixorigin: u32,
    /// Background to subtract; `None` lets the backend autodetect.
    pub background: Option<f32>,
    /// Numerical aperture.
    pub na: f32,
    /// Refractive index of the immersion medium.
    pub nimm: f32,
    /// PSF XY pixel size in microns.
    pub dxpsf: f32,
    /// Zero pixels outside this radial limit (0 = derive from NA/NIMM).
    pub krmax: u32,
    /// Clean up outside the OTF support.
    pub cleanup: bool,
}

/// Arguments to the deconvolution init backend.
///
/// Establishes device state (FFT plan, interpolated OTF, deskew geometry)
/// for one input shape; the post-deskew output shape is computed and
/// cached native-side, readable through [`NativeBackend::output_dims`].
#[derive(Debug, Clone)]
pub struct DeconInitRequest<'a> {
    /// Raw input shape.
    pub shape: VolumeShape,
    /// Data XY pixel size in microns.
    pub dxdata: f32,
    /// Data Z-step size in microns.
    pub dzdata: f32,
    /// OTF XY pixel size in microns.
    pub dxpsf: f32,
    /// OTF Z-step size in microns.
    pub dzpsf: f32,
    /// Deskew angle in degrees; 0 disables deskewing.
    pub deskew: f32,
    /// Rotation angle in degrees applied after deconvolution; 0 disables.
    pub rotate: f32,
    /// Output width override; 0 lets the backend derive it from deskewing.
    pub width: u32,
    /// Deconvolve in skewed space (requires a >= 0.6 library).
    pub skewed_decon: bool,
    /// OTF file for this session.
    pub otf_path: &'a Path,
}

/// Arguments to one deconvolution run.
///
/// `raw` is sized to the init shape; `result` (and `deskewed`, when
/// present) are sized to the backend's output dims.
pub struct DeconRunRequest<'a> {
    /// Raw u16 input volume, Z-major contiguous.
    pub raw: &'a [u16],
    /// Shape of `raw`; must equal the shape passed at init.
    pub shape: VolumeShape,
    /// Receives the deconvolution result.
    pub result: &'a mut [f32],
    /// Receives the deskewed intermediate, if requested.
    pub deskewed: Option<&'a mut [f32]>,
    /// Background to subtract (already resolved from any `auto` sentinel).
    pub background: f32,
    /// Rescale the result to the input intensity range.
    pub rescale: bool,
    /// Richardson-Lucy iteration count.
    pub n_iters: u32,
    /// Extra X shift of the deskewed output (positive shifts left).
    pub shift: i32,
    /// Edge-softening width in pixels.
    pub napodize: u32,
    /// Top/bottom sections blended to damp axial ringing.
    pub nz_blend: u32,
    /// Padding value used while deskewing.
    pub pad_val: f32,
    /// Duplicate a reversed stack before decon to damp axial ringing.
    pub dup_rev_z: bool,
    /// Deconvolve in skewed space (requires a >= 0.6 library).
    pub skewed_decon: bool,
}

/// Arguments to the standalone deskew backend.
pub struct DeskewRequest<'a> {
    /// f32 input volume, Z-major contiguous.
    pub raw: &'a [f32],
    /// Shape of `raw`.
    pub shape: VolumeShape,
    /// Z-step size in microns.
    pub dz: f32,
    /// XY pixel size in microns.
    pub dx: f32,
    /// Deskew angle in degrees.
    pub angle: f32,
    /// Receives the deskewed volume, (nz, ny, out_width).
    pub result: &'a mut [f32],
    /// Output width in pixels.
    pub out_width: u32,
    /// Extra X shift.
    pub shift: i32,
    /// Padding value for exposed regions.
    pub pad_val: f32,
}

/// Every native entry point the pipeline consumes.
///
/// All buffers are contiguous, exactly typed, and exactly sized to their
/// declared shapes; the caller guarantees that before the call. All calls
/// block until the device finishes.
pub trait NativeBackend {
    /// Generates a radially averaged OTF file from a PSF stack.
    fn otf_generate(&self, req: &OtfGenRequest<'_>) -> FfiResult<()>;

    /// Establishes device state for one input shape and OTF.
    fn decon_init(&self, req: &DeconInitRequest<'_>) -> FfiResult<()>;

    /// Post-deskew output dims cached by the last [`NativeBackend::decon_init`].
    fn output_dims(&self) -> FfiResult<VolumeShape>;

    /// Runs one Richardson-Lucy deconvolution against the current state.
    fn decon_run(&self, req: DeconRunRequest<'_>) -> FfiResult<()>;

    /// Releases device buffers and the FFT plan.
    fn decon_cleanup(&self);

    /// Deskews a stage-scanned volume.
    fn deskew(&self, req: DeskewRequest<'_>) -> FfiResult<()>;

    /// Applies a 4x4 affine resampling in intrinsic coordinates.
    fn affine_transform(
        &self,
        raw: &[f32],
        shape: VolumeShape,
        result: &mut [f32],
        matrix: &[f32],
    ) -> FfiResult<()>;

    /// Applies a 4x4 affine resampling in world coordinates.
    ///
    /// `voxel` is (dx, dy, dz) - note the reversed order relative to the
    /// (Z, Y, X) shape convention; this is what the native layer expects.
    fn affine_transform_referenced(
        &self,
        raw: &[f32],
        shape: VolumeShape,
        voxel: [f32; 3],
        result: &mut [f32],
        matrix: &[f32],
    ) -> FfiResult<()>;

    /// Uploads per-pixel camera correction parameters for one stack shape.
    fn camcor_init(&self, shape: VolumeShape, params: &[f32]) -> FfiResult<()>;

    /// Corrects residual camera artifacts in a u16 stack.
    fn camcor(&self, raw: &[u16], shape: VolumeShape, result: &mut [u16]) -> FfiResult<()>;

    /// True if the loaded library takes the skewed-decon flag.
    fn supports_skewed_decon(&self) -> bool {
        false
    }
}
