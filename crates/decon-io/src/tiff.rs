//! TIFF stack support.
//!
//! Volumes travel on disk as multi-page grayscale TIFF files, one page per
//! Z plane. Raw camera stacks are 16-bit; intermediate results and OTF
//! files are 32-bit float.
//!
//! # Example
//!
//! ```rust,ignore
//! use decon_io::tiff;
//!
//! let stack = tiff::read_volume("cell_560nm.tif")?;
//! println!("loaded {}", stack.shape());
//! tiff::write_volume("out.tif", &stack)?;
//! ```

use crate::{IoError, IoResult};
use decon_core::{AnyVolume, Volume, VolumeShape};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

enum StackData {
    U16(Vec<u16>),
    F32(Vec<f32>),
}

/// Reads a grayscale TIFF stack into a volume.
///
/// All pages must share one size and one sample format. 8-bit pages are
/// widened to u16 so they can feed the native kernels directly.
pub fn read_volume<P: AsRef<Path>>(path: P) -> IoResult<AnyVolume> {
    use tiff::decoder::{Decoder, DecodingResult};
    use tiff::ColorType;

    let path = path.as_ref();
    let file = File::open(path)?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| IoError::decode(path, e))?;

    let (nx, ny) = decoder.dimensions().map_err(|e| IoError::decode(path, e))?;
    let mut data: Option<StackData> = None;
    let mut pages = 0usize;

    loop {
        let (w, h) = decoder.dimensions().map_err(|e| IoError::decode(path, e))?;
        if (w, h) != (nx, ny) {
            return Err(IoError::InconsistentStack {
                path: path.to_path_buf(),
                page: pages,
                got: format!("{}x{}", w, h),
                expected: format!("{}x{}", nx, ny),
            });
        }

        let color = decoder.colortype().map_err(|e| IoError::decode(path, e))?;
        let page = decoder.read_image().map_err(|e| IoError::decode(path, e))?;
        match (color, page) {
            (ColorType::Gray(8), DecodingResult::U8(buf)) => {
                let buf: Vec<u16> = buf.iter().map(|&v| v as u16).collect();
                append_u16(path, &mut data, buf)?;
            }
            (ColorType::Gray(16), DecodingResult::U16(buf)) => {
                append_u16(path, &mut data, buf)?;
            }
            (ColorType::Gray(32), DecodingResult::F32(buf)) => match &mut data {
                None => data = Some(StackData::F32(buf)),
                Some(StackData::F32(acc)) => acc.extend_from_slice(&buf),
                Some(StackData::U16(_)) => {
                    return Err(IoError::unsupported(path, "mixed u16/f32 pages"));
                }
            },
            (ct, _) => {
                return Err(IoError::unsupported(
                    path,
                    format!("color type {:?}; expected grayscale 8/16-bit or f32", ct),
                ));
            }
        }
        pages += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(|e| IoError::decode(path, e))?;
    }

    let shape = VolumeShape::new(pages as u32, ny, nx);
    match data {
        Some(StackData::U16(buf)) => Ok(AnyVolume::U16(Volume::from_vec(shape, buf)?)),
        Some(StackData::F32(buf)) => Ok(AnyVolume::F32(Volume::from_vec(shape, buf)?)),
        None => Err(IoError::unsupported(path, "no pages")),
    }
}

fn append_u16(path: &Path, data: &mut Option<StackData>, buf: Vec<u16>) -> IoResult<()> {
    match data {
        None => *data = Some(StackData::U16(buf)),
        Some(StackData::U16(acc)) => acc.extend_from_slice(&buf),
        Some(StackData::F32(_)) => {
            return Err(IoError::unsupported(path, "mixed u16/f32 pages"));
        }
    }
    Ok(())
}

/// Reads the (Z, Y, X) geometry of a stack without decoding pixel data.
///
/// Pages are counted by walking the IFD chain; pixel payloads stay on disk.
pub fn read_dims<P: AsRef<Path>>(path: P) -> IoResult<VolumeShape> {
    use tiff::decoder::Decoder;

    let path = path.as_ref();
    let file = File::open(path)?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| IoError::decode(path, e))?;

    let (nx, ny) = decoder.dimensions().map_err(|e| IoError::decode(path, e))?;
    let mut pages = 1u32;
    while decoder.more_images() {
        decoder.next_image().map_err(|e| IoError::decode(path, e))?;
        pages += 1;
    }
    Ok(VolumeShape::new(pages, ny, nx))
}

/// Writes a volume as a multi-page grayscale TIFF, one page per Z plane.
pub fn write_volume<P: AsRef<Path>>(path: P, volume: &AnyVolume) -> IoResult<()> {
    use tiff::encoder::{colortype, TiffEncoder};

    let path = path.as_ref();
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(file).map_err(|e| IoError::encode(path, e))?;

    let shape = volume.shape();
    match volume {
        AnyVolume::U16(v) => {
            for z in 0..shape.nz {
                encoder
                    .write_image::<colortype::Gray16>(shape.nx, shape.ny, v.plane(z))
                    .map_err(|e| IoError::encode(path, e))?;
            }
        }
        AnyVolume::F32(v) => {
            for z in 0..shape.nz {
                encoder
                    .write_image::<colortype::Gray32Float>(shape.nx, shape.ny, v.plane(z))
                    .map_err(|e| IoError::encode(path, e))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_volume(shape: VolumeShape) -> AnyVolume {
        let data: Vec<u16> = (0..shape.len()).map(|i| (i % 4096) as u16).collect();
        AnyVolume::U16(Volume::from_vec(shape, data).unwrap())
    }

    #[test]
    fn u16_stack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let vol = ramp_volume(VolumeShape::new(5, 8, 16));

        write_volume(&path, &vol).unwrap();
        let loaded = read_volume(&path).unwrap();
        assert_eq!(loaded, vol);
    }

    #[test]
    fn f32_stack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack_f32.tif");
        let shape = VolumeShape::new(3, 4, 4);
        let data: Vec<f32> = (0..shape.len()).map(|i| i as f32 * 0.25).collect();
        let vol = AnyVolume::F32(Volume::from_vec(shape, data).unwrap());

        write_volume(&path, &vol).unwrap();
        let loaded = read_volume(&path).unwrap();
        assert_eq!(loaded, vol);
    }

    #[test]
    fn read_dims_counts_pages_without_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dims.tif");
        let shape = VolumeShape::new(7, 6, 10);
        write_volume(&path, &ramp_volume(shape)).unwrap();

        assert_eq!(read_dims(&path).unwrap(), shape);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_volume("/definitely/not/here.tif").unwrap_err();
        assert!(matches!(err, IoError::Io(_)));
    }
}
