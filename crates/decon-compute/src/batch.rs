//! Batch deconvolution over heterogeneous inputs.
//!
//! [`decon_batch`] is the convenience entry point mirroring how the
//! pipeline is actually used: point it at an array, a file, a directory,
//! or a list of any of those, give it a PSF or OTF, and it deconvolves
//! everything with as little GPU re-initialization as possible.
//!
//! Session init is expensive (OTF upload + FFT plan), so contiguous
//! same-shape runs share one session. The first shape change closes the
//! shared session and every remaining volume gets its own
//! open/decon/close cycle - batching requires contiguous equal shapes by
//! design, and no second grouping pass is attempted.

use crate::otf::{resolve_otf, OtfConfig, PsfSource};
use crate::session::{DeconOptions, DeconOutput, GpuDevice, SessionConfig};
use crate::{ComputeError, ComputeResult};
use decon_core::AnyVolume;
use decon_ffi::NativeBackend;
use decon_io::{VolumeSource, VolumeStream, DEFAULT_PATTERN};
use tracing::{debug, info};

/// Everything a batch run needs besides the inputs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Per-session geometry and calibration.
    pub session: SessionConfig,
    /// Per-run deconvolution options.
    pub options: DeconOptions,
    /// OTF generation parameters (applied when the PSF is not an OTF).
    pub otf: OtfConfig,
    /// Filename pattern applied to directory inputs.
    pub pattern: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            options: DeconOptions::default(),
            otf: OtfConfig::default(),
            pattern: DEFAULT_PATTERN.to_string(),
        }
    }
}

/// Results of a batch run: scalar in, scalar out.
#[derive(Debug)]
pub enum DeconResults {
    /// Exactly one volume was processed.
    Single(DeconOutput),
    /// Two or more volumes, in flattened input order.
    Many(Vec<DeconOutput>),
}

impl DeconResults {
    /// Number of results.
    pub fn len(&self) -> usize {
        match self {
            DeconResults::Single(_) => 1,
            DeconResults::Many(v) => v.len(),
        }
    }

    /// Always false; an empty batch fails with
    /// [`ComputeError::EmptyInput`] instead.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Flattens into a vector regardless of arity.
    pub fn into_vec(self) -> Vec<DeconOutput> {
        match self {
            DeconResults::Single(out) => vec![out],
            DeconResults::Many(v) => v,
        }
    }
}

/// Deconvolves every volume produced by `source` with one PSF/OTF.
///
/// The OTF is resolved once up front (temporary artifacts live for the
/// whole run and are removed on exit). Contiguous volumes of equal shape
/// share one session; after the first mismatch each remaining volume is
/// processed in its own session. Fails with
/// [`ComputeError::EmptyInput`] when the source yields nothing and
/// propagates `NoMatchingFiles` from directory expansion. Parameter
/// invariants are checked before the OTF is resolved or any native call
/// is made.
pub fn decon_batch<O: NativeBackend>(
    device: &mut GpuDevice<O>,
    source: impl Into<VolumeSource>,
    psf: impl Into<PsfSource>,
    config: &BatchConfig,
) -> ComputeResult<DeconResults> {
    if config.options.save_deskewed && config.session.deskew == 0.0 {
        return Err(ComputeError::invalid_parameters(
            "save_deskewed requires a nonzero deskew angle",
        ));
    }

    let psf = psf.into();
    let otf = resolve_otf(device.backend(), &psf, &config.otf)?;
    let mut stream = VolumeStream::new(source.into(), &config.pattern)?;

    let Some(first) = stream.next() else {
        return Err(ComputeError::EmptyInput);
    };
    let first = first?;
    let shape = first.shape();

    let mut out: Vec<DeconOutput> = Vec::new();
    let mut leftover: Option<AnyVolume> = None;

    // assume every volume shares the first shape; one session serves the
    // whole contiguous run
    {
        let session = device.open_session(shape, otf.path(), &config.session)?;
        out.push(session.decon(first, &config.options)?);
        for item in stream.by_ref() {
            let volume = item?;
            if volume.shape() == shape {
                out.push(session.decon(volume, &config.options)?);
            } else {
                debug!(expected = %shape, got = %volume.shape(), "shape changed; leaving batched mode");
                leftover = Some(volume);
                break;
            }
        }
    }

    // a shape mismatch leaves volumes behind; process them one session each
    if let Some(volume) = leftover {
        for item in std::iter::once(Ok(volume)).chain(stream) {
            let volume = item?;
            let session = device.open_session(volume.shape(), otf.path(), &config.session)?;
            out.push(session.decon(volume, &config.options)?);
        }
    }

    info!(count = out.len(), "batch deconvolution finished");
    Ok(match out.len() {
        1 => match out.pop() {
            Some(single) => DeconResults::Single(single),
            None => return Err(ComputeError::EmptyInput),
        },
        _ => DeconResults::Many(out),
    })
}
