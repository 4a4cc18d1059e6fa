//! Camera residual artifact correction.
//!
//! sCMOS cameras in fast synchronous-readout modes leave residual charge
//! from the previous exposure; the native kernel removes it using
//! per-pixel calibration parameters. Host-side this is a two-step
//! protocol: upload the parameter volume once per stack shape, then
//! correct any number of stacks of that shape.

use crate::ComputeResult;
use decon_core::{Volume, VolumeShape, Voxel};
use decon_ffi::NativeBackend;

/// Uploads per-pixel camera calibration parameters for one stack shape.
///
/// `shape` is the (Z, Y, X) geometry of the concatenated stacks of a
/// single timepoint. Parameters are converted to f32 if needed.
pub fn camcor_init<O: NativeBackend, T: Voxel>(
    backend: &O,
    shape: VolumeShape,
    params: &Volume<T>,
) -> ComputeResult<()> {
    shape.validate()?;
    let params: Volume<f32> = params.convert();
    backend.camcor_init(shape, params.as_slice())?;
    Ok(())
}

/// Corrects residual camera artifacts in one stack.
///
/// The kernel consumes and produces u16; other input formats are
/// converted first. Requires a prior [`camcor_init`] for this shape.
pub fn camcor<O: NativeBackend, T: Voxel>(
    backend: &O,
    stack: &Volume<T>,
) -> ComputeResult<Volume<u16>> {
    let shape = stack.shape();
    let raw: Volume<u16> = stack.convert();
    let mut result = vec![0u16; shape.len()];
    backend.camcor(raw.as_slice(), shape, &mut result)?;
    Ok(Volume::from_vec(shape, result)?)
}

/// Initializes and corrects a single stack in one call.
pub fn quick_camcor<O: NativeBackend, T: Voxel, U: Voxel>(
    backend: &O,
    stack: &Volume<T>,
    params: &Volume<U>,
) -> ComputeResult<Volume<u16>> {
    camcor_init(backend, stack.shape(), params)?;
    camcor(backend, stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use decon_ffi::MockBackend;

    #[test]
    fn quick_camcor_initializes_then_corrects() {
        let backend = MockBackend::new();
        let shape = VolumeShape::new(2, 4, 4);
        let stack = Volume::<u16>::filled(shape, 7).unwrap();
        let params = Volume::<f32>::filled(shape, 0.5).unwrap();

        let out = quick_camcor(&backend, &stack, &params).unwrap();
        assert_eq!(out, stack);

        let state = backend.state();
        assert_eq!(state.camcor_inits, 1);
        assert_eq!(state.camcors, 1);
    }

    #[test]
    fn camcor_converts_input_to_u16() {
        let backend = MockBackend::new();
        let shape = VolumeShape::new(2, 2, 2);
        let stack = Volume::<f32>::filled(shape, 300.7).unwrap();
        camcor_init(&backend, shape, &Volume::<f32>::filled(shape, 1.0).unwrap()).unwrap();

        let out = camcor(&backend, &stack).unwrap();
        assert_eq!(out.get(0, 0, 0), 300);
    }
}
