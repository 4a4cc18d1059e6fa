//! GPU deconvolution session lifecycle.
//!
//! The native library keeps its deconvolution state (interpolated OTF,
//! FFT plan, device buffers) in process-global storage: at most one
//! session may exist at a time, and it is bound to exactly one input
//! shape. This module turns that contract into types:
//!
//! - [`GpuDevice`] owns the backend and is the only way to open a session;
//! - [`DeconSession`] holds an exclusive borrow of the device, so opening
//!   a second session while one is live is a *compile error*, not a
//!   runtime check;
//! - dropping a session always runs the native cleanup, on success,
//!   error, and panic paths alike.
//!
//! # Example
//!
//! ```rust,ignore
//! use decon_compute::session::{DeconOptions, GpuDevice, SessionConfig};
//!
//! let mut device = GpuDevice::new(CudaDeconLib::load(&Default::default())?);
//! let session = device.open_session(stack.shape(), otf.path(), &SessionConfig::default())?;
//! let out = session.decon(stack, &DeconOptions::default())?;
//! drop(session); // device state released; device can open the next shape
//! ```

use crate::{ComputeError, ComputeResult};
use decon_core::{AnyVolume, Volume, VolumeShape};
use decon_ffi::{DeconInitRequest, DeconRunRequest, NativeBackend};
use std::path::Path;
use tracing::debug;

/// Background subtraction policy for a deconvolution run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Background {
    /// Use the median of the last Z plane of the input volume.
    Auto,
    /// Subtract a fixed value.
    Value(f32),
}

impl Default for Background {
    fn default() -> Self {
        Background::Value(80.0)
    }
}

impl From<f32> for Background {
    fn from(v: f32) -> Self {
        Background::Value(v)
    }
}

/// Geometry and calibration fixed for the lifetime of one session.
///
/// These feed the native init call, which builds the FFT plan and deskew
/// geometry for one input shape.
#[derive(Debug, Clone)]
pub struct SessionConfig {
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
    /// Output width override; 0 derives it from the deskew geometry.
    pub width: u32,
    /// Deconvolve in skewed space (requires a >= 0.6 native library).
    pub skewed_decon: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dxdata: 0.1,
            dzdata: 0.5,
            dxpsf: 0.1,
            dzpsf: 0.1,
            deskew: 0.0,
            rotate: 0.0,
            width: 0,
            skewed_decon: false,
        }
    }
}

/// Per-run deconvolution options.
#[derive(Debug, Clone)]
pub struct DeconOptions {
    /// Background subtraction policy.
    pub background: Background,
    /// Richardson-Lucy iteration count.
    pub n_iters: u32,
    /// Extra X shift of the deskewed output (positive shifts left).
    pub shift: i32,
    /// Also return the deskewed raw intermediate.
    ///
    /// Requires a nonzero deskew angle in the session config.
    pub save_deskewed: bool,
    /// Edge-softening width in pixels.
    pub napodize: u32,
    /// Top/bottom sections blended to damp axial ringing.
    pub nz_blend: u32,
    /// Padding value used while deskewing.
    pub pad_val: f32,
    /// Duplicate a reversed stack before decon to damp axial ringing.
    pub dup_rev_z: bool,
}

impl Default for DeconOptions {
    fn default() -> Self {
        Self {
            background: Background::default(),
            n_iters: 10,
            shift: 0,
            save_deskewed: false,
            napodize: 15,
            nz_blend: 0,
            pad_val: 0.0,
            dup_rev_z: false,
        }
    }
}

/// Result of one deconvolution run.
#[derive(Debug, Clone)]
pub struct DeconOutput {
    /// The deconvolved volume, at the session's output shape.
    pub decon: Volume<f32>,
    /// The deskewed raw intermediate, when requested.
    pub deskewed: Option<Volume<f32>>,
}

/// Owner of the process-global native device state.
///
/// Exactly one of these should exist per process; every session borrows
/// it exclusively for its lifetime.
#[derive(Debug)]
pub struct GpuDevice<O: NativeBackend> {
    backend: O,
}

impl<O: NativeBackend> GpuDevice<O> {
    /// Wraps a loaded backend.
    pub fn new(backend: O) -> Self {
        Self { backend }
    }

    /// Shared access to the backend for the stateless entry points
    /// (transforms, OTF generation, camera correction).
    pub fn backend(&self) -> &O {
        &self.backend
    }

    /// Unwraps the device, returning the backend.
    pub fn into_backend(self) -> O {
        self.backend
    }

    /// Initializes device state for one shape and OTF, yielding the
    /// session that owns it.
    ///
    /// The shape is validated before anything touches the native layer:
    /// a zero dimension fails with `InvalidShape`. While the returned
    /// session is alive this device is exclusively borrowed, so a second
    /// `open_session` does not compile.
    pub fn open_session<'d>(
        &'d mut self,
        shape: VolumeShape,
        otf_path: &Path,
        config: &SessionConfig,
    ) -> ComputeResult<DeconSession<'d, O>> {
        shape.validate()?;
        self.backend.decon_init(&DeconInitRequest {
            shape,
            dxdata: config.dxdata,
            dzdata: config.dzdata,
            dxpsf: config.dxpsf,
            dzpsf: config.dzpsf,
            deskew: config.deskew,
            rotate: config.rotate,
            width: config.width,
            skewed_decon: config.skewed_decon,
            otf_path,
        })?;
        let out_shape = self.backend.output_dims()?;
        debug!(%shape, %out_shape, "session opened");
        Ok(DeconSession {
            device: self,
            in_shape: shape,
            out_shape,
            config: config.clone(),
        })
    }
}

/// An initialized deconvolution session over one (shape, OTF) pair.
///
/// Runs any number of [`DeconSession::decon`] calls against the same
/// input shape, then releases the device state when dropped.
#[derive(Debug)]
pub struct DeconSession<'d, O: NativeBackend> {
    device: &'d GpuDevice<O>,
    in_shape: VolumeShape,
    out_shape: VolumeShape,
    config: SessionConfig,
}

impl<O: NativeBackend> DeconSession<'_, O> {
    /// The input shape this session was opened with.
    #[inline]
    pub fn in_shape(&self) -> VolumeShape {
        self.in_shape
    }

    /// The post-deskew output shape computed by the native init.
    ///
    /// Results of [`DeconSession::decon`] have this shape; callers
    /// pre-sizing their own buffers should use it.
    #[inline]
    pub fn out_shape(&self) -> VolumeShape {
        self.out_shape
    }

    /// Runs one Richardson-Lucy deconvolution.
    ///
    /// The volume's shape must equal [`DeconSession::in_shape`]; there is
    /// no intra-session shape change - close and reopen instead. Input is
    /// converted to the native u16 format if it is not already, and an
    /// `auto` background resolves to the median of the converted volume's
    /// last Z plane. With `save_deskewed` the deskewed raw intermediate
    /// is returned alongside the result; that requires the session to
    /// have been opened with a nonzero deskew angle.
    pub fn decon(
        &self,
        volume: impl Into<AnyVolume>,
        options: &DeconOptions,
    ) -> ComputeResult<DeconOutput> {
        if options.save_deskewed && self.config.deskew == 0.0 {
            return Err(ComputeError::invalid_parameters(
                "save_deskewed requires a nonzero deskew angle",
            ));
        }
        let volume = volume.into();
        if volume.shape() != self.in_shape {
            return Err(ComputeError::ShapeMismatch {
                expected: self.in_shape,
                got: volume.shape(),
            });
        }

        let raw: Volume<u16> = volume.into_u16();
        let background = match options.background {
            Background::Auto => raw.median_of_last_plane(),
            Background::Value(v) => v,
        };

        let mut result = vec![0.0f32; self.out_shape.len()];
        let mut deskewed = options
            .save_deskewed
            .then(|| vec![0.0f32; self.out_shape.len()]);

        self.device.backend.decon_run(DeconRunRequest {
            raw: raw.as_slice(),
            shape: self.in_shape,
            result: &mut result,
            deskewed: deskewed.as_deref_mut(),
            background,
            rescale: false,
            n_iters: options.n_iters,
            shift: options.shift,
            napodize: options.napodize,
            nz_blend: options.nz_blend,
            pad_val: options.pad_val,
            dup_rev_z: options.dup_rev_z,
            skewed_decon: self.config.skewed_decon,
        })?;

        Ok(DeconOutput {
            decon: Volume::from_vec(self.out_shape, result)?,
            deskewed: deskewed
                .map(|buf| Volume::from_vec(self.out_shape, buf))
                .transpose()?,
        })
    }
}

impl<O: NativeBackend> Drop for DeconSession<'_, O> {
    fn drop(&mut self) {
        self.device.backend.decon_cleanup();
        debug!(shape = %self.in_shape, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decon_ffi::MockBackend;
    use std::path::PathBuf;

    fn stack(shape: VolumeShape, fill: u16) -> Volume<u16> {
        Volume::filled(shape, fill).unwrap()
    }

    fn otf() -> PathBuf {
        PathBuf::from("otf.tif")
    }

    #[test]
    fn zero_dimension_shapes_are_rejected_before_init() {
        let mut device = GpuDevice::new(MockBackend::new());
        for shape in [
            VolumeShape::new(0, 8, 8),
            VolumeShape::new(8, 0, 8),
            VolumeShape::new(8, 8, 0),
            VolumeShape::new(0, 0, 0),
        ] {
            let err = device
                .open_session(shape, &otf(), &SessionConfig::default())
                .unwrap_err();
            assert!(matches!(
                err,
                ComputeError::Core(decon_core::CoreError::InvalidShape { .. })
            ));
        }
        assert_eq!(device.backend().state().inits, 0);
    }

    #[test]
    fn session_runs_and_cleans_up_once() {
        let mut device = GpuDevice::new(MockBackend::new());
        let shape = VolumeShape::new(4, 8, 8);
        {
            let session = device
                .open_session(shape, &otf(), &SessionConfig::default())
                .unwrap();
            assert_eq!(session.out_shape(), shape);
            session.decon(stack(shape, 100), &DeconOptions::default()).unwrap();
            session.decon(stack(shape, 200), &DeconOptions::default()).unwrap();
        }
        let state = device.backend().state();
        assert_eq!(state.inits, 1);
        assert_eq!(state.runs, 2);
        assert_eq!(state.cleanups, 1);
        assert!(!state.open);
    }

    #[test]
    fn cleanup_runs_even_when_decon_errors() {
        let mut device = GpuDevice::new(MockBackend::new());
        let shape = VolumeShape::new(4, 8, 8);
        {
            let session = device
                .open_session(shape, &otf(), &SessionConfig::default())
                .unwrap();
            let err = session
                .decon(stack(VolumeShape::new(4, 8, 9), 1), &DeconOptions::default())
                .unwrap_err();
            assert!(matches!(err, ComputeError::ShapeMismatch { .. }));
        }
        let state = device.backend().state();
        assert_eq!(state.cleanups, 1);
        assert_eq!(state.runs, 0);
    }

    #[test]
    fn save_deskewed_without_deskew_fails_before_native_call() {
        let mut device = GpuDevice::new(MockBackend::new());
        let shape = VolumeShape::new(4, 8, 8);
        let session = device
            .open_session(shape, &otf(), &SessionConfig::default())
            .unwrap();
        let options = DeconOptions {
            save_deskewed: true,
            ..DeconOptions::default()
        };
        let err = session.decon(stack(shape, 1), &options).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidParameters { .. }));
        assert_eq!(session.device.backend.state().runs, 0);
    }

    #[test]
    fn save_deskewed_returns_both_volumes() {
        let mut device = GpuDevice::new(MockBackend::new());
        let shape = VolumeShape::new(4, 8, 8);
        let config = SessionConfig {
            deskew: 31.5,
            ..SessionConfig::default()
        };
        let session = device.open_session(shape, &otf(), &config).unwrap();
        let out_shape = session.out_shape();
        assert!(out_shape.nx > shape.nx);

        let options = DeconOptions {
            save_deskewed: true,
            pad_val: 98.0,
            ..DeconOptions::default()
        };
        let out = session.decon(stack(shape, 1), &options).unwrap();
        assert_eq!(out.decon.shape(), out_shape);
        let deskewed = out.deskewed.expect("deskewed intermediate requested");
        assert_eq!(deskewed.shape(), out_shape);
        assert_eq!(deskewed.get(0, 0, 0), 98.0);
    }

    #[test]
    fn auto_background_uses_last_plane_median() {
        let mut device = GpuDevice::new(MockBackend::new());
        let shape = VolumeShape::new(2, 2, 2);
        let mut data = vec![5u16; shape.len()];
        // last plane: [20, 20, 30, 30] -> median 25
        data[4..].copy_from_slice(&[20, 20, 30, 30]);
        let volume = Volume::from_vec(shape, data).unwrap();

        let session = device
            .open_session(shape, &otf(), &SessionConfig::default())
            .unwrap();
        let options = DeconOptions {
            background: Background::Auto,
            ..DeconOptions::default()
        };
        session.decon(volume, &options).unwrap();
        assert_eq!(session.device.backend.state().backgrounds, vec![25.0]);
    }

    #[test]
    fn fixed_background_passes_through() {
        let mut device = GpuDevice::new(MockBackend::new());
        let shape = VolumeShape::new(2, 2, 2);
        let session = device
            .open_session(shape, &otf(), &SessionConfig::default())
            .unwrap();
        let options = DeconOptions {
            background: 98.0.into(),
            ..DeconOptions::default()
        };
        session.decon(stack(shape, 1), &options).unwrap();
        assert_eq!(session.device.backend.state().backgrounds, vec![98.0]);
    }

    #[test]
    fn f32_input_is_converted_to_u16() {
        let mut device = GpuDevice::new(MockBackend::new());
        let shape = VolumeShape::new(2, 2, 2);
        let volume = Volume::<f32>::filled(shape, 123.4).unwrap();
        let session = device
            .open_session(shape, &otf(), &SessionConfig::default())
            .unwrap();
        // conversion happens before the run; the mock asserts the shape
        session.decon(volume, &DeconOptions::default()).unwrap();
        assert_eq!(session.device.backend.state().runs, 1);
    }
}
