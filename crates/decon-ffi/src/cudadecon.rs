//! Runtime binding of the native GPU libraries.
//!
//! Two shared libraries back the backend: the deconvolution/transform
//! kernels (`cudadecon`) and the OTF generator (`radialft`). Both are
//! loaded at runtime; every required symbol is resolved eagerly during
//! [`CudaDeconLib::load`], so a broken installation surfaces at first use
//! with a typed error instead of a mid-pipeline crash.
//!
//! The ABI changed at 0.6: `decon_init` and `decon_run` grew a trailing
//! skewed-decon flag. The variant is chosen once at load time from the
//! negotiated [`NativeVersion`].

use crate::{
    DeconInitRequest, DeconRunRequest, DeskewRequest, FfiError, FfiResult, NativeBackend,
    NativeVersion, OtfGenRequest,
};
use decon_core::VolumeShape;
use libloading::Library;
use std::ffi::{c_char, c_int, CString};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the kernel library location.
pub const LIBRARY_ENV: &str = "DECON_LIBRARY_PATH";

/// Environment variable overriding the OTF generator library location.
pub const RADIALFT_ENV: &str = "DECON_RADIALFT_PATH";

const DECON_LIBRARY: &str = "cudadecon";
const RADIALFT_LIBRARY: &str = "radialft";

/// Where and what to load.
///
/// Explicit paths win over environment overrides, which win over the
/// platform default filenames. An absent version selects the conservative
/// pre-0.6 argument lists.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Path to the kernel library (default: platform name for `cudadecon`).
    pub library: Option<PathBuf>,
    /// Path to the OTF generator (default: platform name for `radialft`).
    pub radialft: Option<PathBuf>,
    /// Native ABI version; `None` consults [`crate::version::VERSION_ENV`].
    pub version: Option<NativeVersion>,
}

type OtfGenerateFn = unsafe extern "C" fn(
    *const c_char, // psf_path
    *const c_char, // out_path
    c_int,         // wavelength (nm)
    f32,           // dz
    c_int,         // fixorigin
    bool,          // has_user_background
    f32,           // background
    f32,           // NA
    f32,           // NIMM
    f32,           // dx
    c_int,         // krmax
    bool,          // cleanup_flag
) -> c_int;

type DeconInitLegacyFn = unsafe extern "C" fn(
    c_int, // nx
    c_int, // ny
    c_int, // nz
    f32,   // dx_data
    f32,   // dz_data
    f32,   // dx_psf
    f32,   // dz_psf
    f32,   // deskew_angle
    f32,   // rotate_angle
    c_int, // output_width
    *const c_char,
) -> c_int;

type DeconInitSkewedFn = unsafe extern "C" fn(
    c_int,
    c_int,
    c_int,
    f32,
    f32,
    f32,
    f32,
    f32,
    f32,
    c_int,
    bool, // skewed_flag
    *const c_char,
) -> c_int;

type OutputDimsFn = unsafe extern "C" fn(*mut c_int, *mut c_int, *mut c_int);

type DeconRunLegacyFn = unsafe extern "C" fn(
    *const u16, // raw
    c_int,      // nx
    c_int,      // ny
    c_int,      // nz
    *mut f32,   // result
    *mut f32,   // deskewed or dummy
    f32,        // background
    bool,       // rescale
    bool,       // save_deskewed
    c_int,      // n_iters
    c_int,      // shift
    c_int,      // napodize
    c_int,      // nz_blend
    f32,        // pad_val
    bool,       // dup_rev_z
) -> c_int;

type DeconRunSkewedFn = unsafe extern "C" fn(
    *const u16,
    c_int,
    c_int,
    c_int,
    *mut f32,
    *mut f32,
    f32,
    bool,
    bool,
    c_int,
    c_int,
    c_int,
    c_int,
    f32,
    bool,
    bool, // skewed_flag
) -> c_int;

type DeconCleanupFn = unsafe extern "C" fn();

type DeskewFn = unsafe extern "C" fn(
    *const f32,
    c_int, // nx
    c_int, // ny
    c_int, // nz
    f32,   // dz
    f32,   // dx
    f32,   // angle
    *mut f32,
    c_int, // out_width
    c_int, // shift
    f32,   // pad_val
) -> c_int;

type AffineFn =
    unsafe extern "C" fn(*const f32, c_int, c_int, c_int, *mut f32, *const f32) -> c_int;

type AffineReferencedFn = unsafe extern "C" fn(
    *const f32,
    c_int,
    c_int,
    c_int,
    f32, // dx
    f32, // dy
    f32, // dz
    *mut f32,
    *const f32,
) -> c_int;

type CamcorInitFn = unsafe extern "C" fn(c_int, c_int, c_int, *const f32) -> c_int;

type CamcorFn =
    unsafe extern "C" fn(*const u16, c_int, c_int, c_int, *mut u16) -> c_int;

#[derive(Debug)]
enum InitVariant {
    Legacy(DeconInitLegacyFn),
    Skewed(DeconInitSkewedFn),
}

#[derive(Debug)]
enum RunVariant {
    Legacy(DeconRunLegacyFn),
    Skewed(DeconRunSkewedFn),
}

/// The production [`NativeBackend`]: both native libraries, loaded and
/// symbol-checked.
#[derive(Debug)]
pub struct CudaDeconLib {
    version: NativeVersion,
    otf_generate: OtfGenerateFn,
    decon_init: InitVariant,
    output_dims: OutputDimsFn,
    decon_run: RunVariant,
    decon_cleanup: DeconCleanupFn,
    deskew: DeskewFn,
    affine: AffineFn,
    affine_referenced: AffineReferencedFn,
    camcor_init: CamcorInitFn,
    camcor: CamcorFn,
    // The fn pointers above stay valid exactly as long as these handles;
    // they are dropped together with the struct.
    _kernels: Library,
    _radialft: Library,
}

impl CudaDeconLib {
    /// Loads both native libraries and resolves every required symbol.
    pub fn load(options: &LoadOptions) -> FfiResult<Self> {
        let version = options
            .version
            .or_else(NativeVersion::from_env)
            .unwrap_or_default();

        let kernels_path = resolve_path(options.library.clone(), LIBRARY_ENV, DECON_LIBRARY);
        let radialft_path =
            resolve_path(options.radialft.clone(), RADIALFT_ENV, RADIALFT_LIBRARY);

        let kernels = open_library(&kernels_path)?;
        let radialft = open_library(&radialft_path)?;

        let kernels_name = kernels_path.display().to_string();
        let radialft_name = radialft_path.display().to_string();

        let decon_init = if version.supports_skewed_decon() {
            InitVariant::Skewed(resolve(&kernels, &kernels_name, "decon_init")?)
        } else {
            InitVariant::Legacy(resolve(&kernels, &kernels_name, "decon_init")?)
        };
        let decon_run = if version.supports_skewed_decon() {
            RunVariant::Skewed(resolve(&kernels, &kernels_name, "decon_run")?)
        } else {
            RunVariant::Legacy(resolve(&kernels, &kernels_name, "decon_run")?)
        };

        let lib = Self {
            version,
            otf_generate: resolve(&radialft, &radialft_name, "otf_generate")?,
            decon_init,
            output_dims: resolve(&kernels, &kernels_name, "decon_get_output_dims")?,
            decon_run,
            decon_cleanup: resolve(&kernels, &kernels_name, "decon_cleanup")?,
            deskew: resolve(&kernels, &kernels_name, "deskew")?,
            affine: resolve(&kernels, &kernels_name, "affine_transform")?,
            affine_referenced: resolve(
                &kernels,
                &kernels_name,
                "affine_transform_referenced",
            )?,
            camcor_init: resolve(&kernels, &kernels_name, "camera_correct_init")?,
            camcor: resolve(&kernels, &kernels_name, "camera_correct")?,
            _kernels: kernels,
            _radialft: radialft,
        };
        debug!(%version, kernels = %kernels_name, radialft = %radialft_name, "native libraries loaded");
        Ok(lib)
    }

    /// The negotiated native ABI version.
    #[inline]
    pub fn version(&self) -> NativeVersion {
        self.version
    }
}

fn resolve_path(explicit: Option<PathBuf>, env: &str, name: &str) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(env).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(libloading::library_filename(name)))
}

fn open_library(path: &Path) -> FfiResult<Library> {
    // Loading runs arbitrary library initializers; that is the point of
    // binding a native backend.
    unsafe { Library::new(path) }.map_err(|e| FfiError::LibraryLoad {
        name: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn resolve<T: Copy>(lib: &Library, lib_name: &str, symbol: &str) -> FfiResult<T> {
    let sym = unsafe { lib.get::<T>(symbol.as_bytes()) }.map_err(|_| {
        FfiError::MissingSymbol {
            symbol: symbol.to_string(),
            library: lib_name.to_string(),
        }
    })?;
    Ok(*sym)
}

fn path_to_cstring(path: &Path) -> FfiResult<CString> {
    CString::new(path.to_string_lossy().as_bytes()).map_err(|_| FfiError::InvalidPath {
        path: path.to_path_buf(),
    })
}

impl NativeBackend for CudaDeconLib {
    fn otf_generate(&self, req: &OtfGenRequest<'_>) -> FfiResult<()> {
        let psf = path_to_cstring(req.psf_path)?;
        let out = path_to_cstring(req.out_path)?;
        let status = unsafe {
            (self.otf_generate)(
                psf.as_ptr(),
                out.as_ptr(),
                req.wavelength_nm as c_int,
                req.dzpsf,
                req.fixorigin as c_int,
                req.background.is_some(),
                req.background.unwrap_or(0.0),
                req.na,
                req.nimm,
                req.dxpsf,
                req.krmax as c_int,
                req.cleanup,
            )
        };
        FfiError::check("otf_generate", status)
    }

    fn decon_init(&self, req: &DeconInitRequest<'_>) -> FfiResult<()> {
        let otf = path_to_cstring(req.otf_path)?;
        let (nx, ny, nz) = (
            req.shape.nx as c_int,
            req.shape.ny as c_int,
            req.shape.nz as c_int,
        );
        let status = match self.decon_init {
            InitVariant::Legacy(f) => unsafe {
                // pre-0.6 libraries have no skewed-space mode; the flag is
                // negotiated away at load time
                f(
                    nx,
                    ny,
                    nz,
                    req.dxdata,
                    req.dzdata,
                    req.dxpsf,
                    req.dzpsf,
                    req.deskew,
                    req.rotate,
                    req.width as c_int,
                    otf.as_ptr(),
                )
            },
            InitVariant::Skewed(f) => unsafe {
                f(
                    nx,
                    ny,
                    nz,
                    req.dxdata,
                    req.dzdata,
                    req.dxpsf,
                    req.dzpsf,
                    req.deskew,
                    req.rotate,
                    req.width as c_int,
                    req.skewed_decon,
                    otf.as_ptr(),
                )
            },
        };
        FfiError::check("decon_init", status)
    }

    fn output_dims(&self) -> FfiResult<VolumeShape> {
        let (mut nx, mut ny, mut nz) = (0 as c_int, 0 as c_int, 0 as c_int);
        unsafe { (self.output_dims)(&mut nx, &mut ny, &mut nz) };
        Ok(VolumeShape::new(nz as u32, ny as u32, nx as u32))
    }

    fn decon_run(&self, req: DeconRunRequest<'_>) -> FfiResult<()> {
        debug_assert_eq!(req.raw.len(), req.shape.len());
        let (nx, ny, nz) = (
            req.shape.nx as c_int,
            req.shape.ny as c_int,
            req.shape.nz as c_int,
        );
        // the legacy ABI dereferences the deskew target unconditionally
        let mut dummy = [0.0f32; 1];
        let save_deskewed = req.deskewed.is_some();
        let deskewed_ptr = match req.deskewed {
            Some(buf) => buf.as_mut_ptr(),
            None => dummy.as_mut_ptr(),
        };
        let status = match self.decon_run {
            RunVariant::Legacy(f) => unsafe {
                f(
                    req.raw.as_ptr(),
                    nx,
                    ny,
                    nz,
                    req.result.as_mut_ptr(),
                    deskewed_ptr,
                    req.background,
                    req.rescale,
                    save_deskewed,
                    req.n_iters as c_int,
                    req.shift as c_int,
                    req.napodize as c_int,
                    req.nz_blend as c_int,
                    req.pad_val,
                    req.dup_rev_z,
                )
            },
            RunVariant::Skewed(f) => unsafe {
                f(
                    req.raw.as_ptr(),
                    nx,
                    ny,
                    nz,
                    req.result.as_mut_ptr(),
                    deskewed_ptr,
                    req.background,
                    req.rescale,
                    save_deskewed,
                    req.n_iters as c_int,
                    req.shift as c_int,
                    req.napodize as c_int,
                    req.nz_blend as c_int,
                    req.pad_val,
                    req.dup_rev_z,
                    req.skewed_decon,
                )
            },
        };
        FfiError::check("decon_run", status)
    }

    fn decon_cleanup(&self) {
        unsafe { (self.decon_cleanup)() }
    }

    fn deskew(&self, req: DeskewRequest<'_>) -> FfiResult<()> {
        debug_assert_eq!(req.raw.len(), req.shape.len());
        let status = unsafe {
            (self.deskew)(
                req.raw.as_ptr(),
                req.shape.nx as c_int,
                req.shape.ny as c_int,
                req.shape.nz as c_int,
                req.dz,
                req.dx,
                req.angle,
                req.result.as_mut_ptr(),
                req.out_width as c_int,
                req.shift as c_int,
                req.pad_val,
            )
        };
        FfiError::check("deskew", status)
    }

    fn affine_transform(
        &self,
        raw: &[f32],
        shape: VolumeShape,
        result: &mut [f32],
        matrix: &[f32],
    ) -> FfiResult<()> {
        debug_assert_eq!(raw.len(), shape.len());
        debug_assert_eq!(matrix.len(), 16);
        let status = unsafe {
            (self.affine)(
                raw.as_ptr(),
                shape.nx as c_int,
                shape.ny as c_int,
                shape.nz as c_int,
                result.as_mut_ptr(),
                matrix.as_ptr(),
            )
        };
        FfiError::check("affine_transform", status)
    }

    fn affine_transform_referenced(
        &self,
        raw: &[f32],
        shape: VolumeShape,
        voxel: [f32; 3],
        result: &mut [f32],
        matrix: &[f32],
    ) -> FfiResult<()> {
        debug_assert_eq!(raw.len(), shape.len());
        debug_assert_eq!(matrix.len(), 16);
        let [dx, dy, dz] = voxel;
        let status = unsafe {
            (self.affine_referenced)(
                raw.as_ptr(),
                shape.nx as c_int,
                shape.ny as c_int,
                shape.nz as c_int,
                dx,
                dy,
                dz,
                result.as_mut_ptr(),
                matrix.as_ptr(),
            )
        };
        FfiError::check("affine_transform_referenced", status)
    }

    fn camcor_init(&self, shape: VolumeShape, params: &[f32]) -> FfiResult<()> {
        let status = unsafe {
            (self.camcor_init)(
                shape.nx as c_int,
                shape.ny as c_int,
                shape.nz as c_int,
                params.as_ptr(),
            )
        };
        FfiError::check("camera_correct_init", status)
    }

    fn camcor(&self, raw: &[u16], shape: VolumeShape, result: &mut [u16]) -> FfiResult<()> {
        debug_assert_eq!(raw.len(), shape.len());
        debug_assert_eq!(result.len(), shape.len());
        let status = unsafe {
            (self.camcor)(
                raw.as_ptr(),
                shape.nx as c_int,
                shape.ny as c_int,
                shape.nz as c_int,
                result.as_mut_ptr(),
            )
        };
        FfiError::check("camera_correct", status)
    }

    fn supports_skewed_decon(&self) -> bool {
        self.version.supports_skewed_decon()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_surfaces_as_load_error() {
        let options = LoadOptions {
            library: Some(PathBuf::from("/nonexistent/libcudadecon.so")),
            radialft: Some(PathBuf::from("/nonexistent/libradialft.so")),
            version: None,
        };
        let err = CudaDeconLib::load(&options).unwrap_err();
        assert!(matches!(err, FfiError::LibraryLoad { .. }));
    }

    #[test]
    fn explicit_path_wins_over_default() {
        let explicit = resolve_path(Some(PathBuf::from("/opt/libx.so")), "UNSET_ENV_", "x");
        assert_eq!(explicit, PathBuf::from("/opt/libx.so"));

        let fallback = resolve_path(None, "UNSET_ENV_", "x");
        assert_eq!(
            fallback,
            PathBuf::from(libloading::library_filename("x"))
        );
    }
}
