//! Call-count instrumentation double for the native backend.
//!
//! [`MockBackend`] stands in for the GPU libraries in lifecycle tests: it
//! records every call, enforces the init/run/cleanup ordering contract
//! with assertions (so an interleaved or leaked session fails the test
//! that caused it), and produces deterministic stand-in results - each run
//! stamps its 1-based sequence number into the result buffer so callers
//! can assert output ordering.
//!
//! Only compiled with the `mock` feature; never part of a production
//! dependency graph.

use crate::{
    DeconInitRequest, DeconRunRequest, DeskewRequest, FfiResult, NativeBackend,
    NativeVersion, OtfGenRequest,
};
use decon_core::VolumeShape;
use std::cell::RefCell;
use std::path::PathBuf;

/// Everything the mock observed, readable mid-test.
#[derive(Debug, Default, Clone)]
pub struct MockState {
    /// Number of `decon_init` calls.
    pub inits: u32,
    /// Number of `decon_cleanup` calls.
    pub cleanups: u32,
    /// Number of `decon_run` calls.
    pub runs: u32,
    /// Number of `otf_generate` calls.
    pub otf_gens: u32,
    /// Number of `deskew` calls.
    pub deskews: u32,
    /// Number of `affine_transform` calls.
    pub affines: u32,
    /// Number of `affine_transform_referenced` calls.
    pub affines_referenced: u32,
    /// Number of `camcor_init` calls.
    pub camcor_inits: u32,
    /// Number of `camcor` calls.
    pub camcors: u32,
    /// True between an init and its cleanup.
    pub open: bool,
    /// Shape of the currently initialized session, if any.
    pub init_shape: Option<VolumeShape>,
    /// Output shape computed by the last init.
    pub out_shape: Option<VolumeShape>,
    /// Every shape ever passed to `decon_init`, in order.
    pub shapes_inited: Vec<VolumeShape>,
    /// Background value of every run, in order.
    pub backgrounds: Vec<f32>,
    /// Pad value of every standalone deskew, in order.
    pub pad_vals: Vec<f32>,
    /// Voxel size of the last referenced affine call (dx, dy, dz).
    pub last_voxel: Option<[f32; 3]>,
    /// OTF output paths generated, in order.
    pub otf_outputs: Vec<PathBuf>,
}

/// Instrumented stand-in for [`crate::CudaDeconLib`].
#[derive(Debug, Default)]
pub struct MockBackend {
    version: NativeVersion,
    state: RefCell<MockState>,
}

impl MockBackend {
    /// A mock reporting the default (pre-0.6) version.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock reporting the given native version.
    pub fn with_version(version: NativeVersion) -> Self {
        Self {
            version,
            state: RefCell::default(),
        }
    }

    /// Snapshot of everything observed so far.
    pub fn state(&self) -> MockState {
        self.state.borrow().clone()
    }

    fn out_shape_for(req: &DeconInitRequest<'_>) -> VolumeShape {
        let shape = req.shape;
        let nx = if req.width > 0 {
            req.width
        } else if req.deskew != 0.0 {
            // same widening the real deskew geometry performs
            let widen = (shape.nz as f64
                * req.dzdata as f64
                * (req.deskew as f64).to_radians().cos().abs()
                / req.dxdata as f64)
                .floor() as u32;
            shape.nx + widen
        } else {
            shape.nx
        };
        VolumeShape::new(shape.nz, shape.ny, nx)
    }
}

impl NativeBackend for MockBackend {
    fn otf_generate(&self, req: &OtfGenRequest<'_>) -> FfiResult<()> {
        // materialize a stub so the output path exists like the real thing
        std::fs::write(req.out_path, b"stub-otf").expect("mock otf write");
        let mut state = self.state.borrow_mut();
        state.otf_gens += 1;
        state.otf_outputs.push(req.out_path.to_path_buf());
        Ok(())
    }

    fn decon_init(&self, req: &DeconInitRequest<'_>) -> FfiResult<()> {
        let mut state = self.state.borrow_mut();
        assert!(
            !state.open,
            "decon_init while a session is already initialized"
        );
        state.open = true;
        state.inits += 1;
        state.init_shape = Some(req.shape);
        state.out_shape = Some(Self::out_shape_for(req));
        state.shapes_inited.push(req.shape);
        Ok(())
    }

    fn output_dims(&self) -> FfiResult<VolumeShape> {
        let state = self.state.borrow();
        assert!(state.open, "output_dims without an initialized session");
        Ok(state.out_shape.expect("out shape set at init"))
    }

    fn decon_run(&self, req: DeconRunRequest<'_>) -> FfiResult<()> {
        let mut state = self.state.borrow_mut();
        assert!(state.open, "decon_run without an initialized session");
        assert_eq!(
            Some(req.shape),
            state.init_shape,
            "decon_run shape differs from the initialized shape"
        );
        state.runs += 1;
        state.backgrounds.push(req.background);
        req.result.fill(state.runs as f32);
        if let Some(deskewed) = req.deskewed {
            deskewed.fill(req.pad_val);
        }
        Ok(())
    }

    fn decon_cleanup(&self) {
        let mut state = self.state.borrow_mut();
        assert!(state.open, "decon_cleanup without an initialized session");
        state.open = false;
        state.init_shape = None;
        state.out_shape = None;
        state.cleanups += 1;
    }

    fn deskew(&self, req: DeskewRequest<'_>) -> FfiResult<()> {
        let mut state = self.state.borrow_mut();
        state.deskews += 1;
        state.pad_vals.push(req.pad_val);
        // copy each row into the widened output, pad the exposed tail
        let (nz, ny, nx) = (
            req.shape.nz as usize,
            req.shape.ny as usize,
            req.shape.nx as usize,
        );
        let out_w = req.out_width as usize;
        let keep = nx.min(out_w);
        for z in 0..nz {
            for y in 0..ny {
                let src = (z * ny + y) * nx;
                let dst = (z * ny + y) * out_w;
                req.result[dst..dst + keep].copy_from_slice(&req.raw[src..src + keep]);
                req.result[dst + keep..dst + out_w].fill(req.pad_val);
            }
        }
        Ok(())
    }

    fn affine_transform(
        &self,
        raw: &[f32],
        _shape: VolumeShape,
        result: &mut [f32],
        matrix: &[f32],
    ) -> FfiResult<()> {
        let mut state = self.state.borrow_mut();
        state.affines += 1;
        if is_identity_4x4(matrix) {
            result.copy_from_slice(raw);
        } else {
            result.fill(0.0);
        }
        Ok(())
    }

    fn affine_transform_referenced(
        &self,
        raw: &[f32],
        _shape: VolumeShape,
        voxel: [f32; 3],
        result: &mut [f32],
        matrix: &[f32],
    ) -> FfiResult<()> {
        let mut state = self.state.borrow_mut();
        state.affines_referenced += 1;
        state.last_voxel = Some(voxel);
        if is_identity_4x4(matrix) {
            result.copy_from_slice(raw);
        } else {
            result.fill(0.0);
        }
        Ok(())
    }

    fn camcor_init(&self, _shape: VolumeShape, _params: &[f32]) -> FfiResult<()> {
        self.state.borrow_mut().camcor_inits += 1;
        Ok(())
    }

    fn camcor(&self, raw: &[u16], _shape: VolumeShape, result: &mut [u16]) -> FfiResult<()> {
        self.state.borrow_mut().camcors += 1;
        result.copy_from_slice(raw);
        Ok(())
    }

    fn supports_skewed_decon(&self) -> bool {
        self.version.supports_skewed_decon()
    }
}

fn is_identity_4x4(matrix: &[f32]) -> bool {
    matrix.len() == 16
        && matrix.iter().enumerate().all(|(i, &v)| {
            let expected = if i % 5 == 0 { 1.0 } else { 0.0 };
            v == expected
        })
}
