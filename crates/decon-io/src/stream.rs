//! Heterogeneous input normalization.
//!
//! The batch driver accepts a single volume, a file, a directory, or an
//! arbitrarily nested list of those. [`VolumeStream`] flattens any of them
//! into one lazy sequence of volumes: paths are collected up front (so a
//! bad directory fails before any GPU work), pixel data is read only when
//! the stream is polled. The stream is finite and single-traversal.
//!
//! # Example
//!
//! ```rust,ignore
//! use decon_io::stream::{VolumeSource, VolumeStream, DEFAULT_PATTERN};
//!
//! let source = VolumeSource::List(vec![
//!     "cells/".into(),
//!     "extra_stack.tif".into(),
//! ]);
//! for volume in VolumeStream::new(source, DEFAULT_PATTERN)? {
//!     process(volume?);
//! }
//! ```

use crate::{tiff, IoError, IoResult};
use decon_core::AnyVolume;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filename pattern applied to directory inputs when none is given.
pub const DEFAULT_PATTERN: &str = "*.tif";

/// One input to the batch driver, possibly nesting further inputs.
#[derive(Debug, Clone)]
pub enum VolumeSource {
    /// An in-memory volume.
    Volume(AnyVolume),
    /// A stack file, or a directory of stack files.
    Path(PathBuf),
    /// A list of sources, flattened recursively in order.
    List(Vec<VolumeSource>),
}

impl From<AnyVolume> for VolumeSource {
    fn from(v: AnyVolume) -> Self {
        VolumeSource::Volume(v)
    }
}

impl From<PathBuf> for VolumeSource {
    fn from(p: PathBuf) -> Self {
        VolumeSource::Path(p)
    }
}

impl From<&Path> for VolumeSource {
    fn from(p: &Path) -> Self {
        VolumeSource::Path(p.to_path_buf())
    }
}

impl From<&str> for VolumeSource {
    fn from(p: &str) -> Self {
        VolumeSource::Path(PathBuf::from(p))
    }
}

impl From<Vec<VolumeSource>> for VolumeSource {
    fn from(items: Vec<VolumeSource>) -> Self {
        VolumeSource::List(items)
    }
}

#[derive(Debug)]
enum Entry {
    Mem(AnyVolume),
    File(PathBuf),
}

/// Lazy, flattened sequence of volumes from a [`VolumeSource`].
#[derive(Debug)]
pub struct VolumeStream {
    entries: VecDeque<Entry>,
}

impl VolumeStream {
    /// Flattens a source into a stream.
    ///
    /// Directories expand immediately through `pattern` (matched against
    /// filenames, sorted for determinism) and fail with
    /// [`IoError::NoMatchingFiles`] when nothing matches; files are read
    /// lazily as the stream is polled.
    pub fn new(source: VolumeSource, pattern: &str) -> IoResult<Self> {
        let pattern_str = pattern;
        let pattern = glob::Pattern::new(pattern)?;
        let mut entries = VecDeque::new();
        flatten(source, &pattern, pattern_str, &mut entries)?;
        Ok(Self { entries })
    }

    /// Number of volumes not yet yielded.
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }
}

fn flatten(
    source: VolumeSource,
    pattern: &glob::Pattern,
    pattern_str: &str,
    out: &mut VecDeque<Entry>,
) -> IoResult<()> {
    match source {
        VolumeSource::Volume(v) => out.push_back(Entry::Mem(v)),
        VolumeSource::Path(path) => {
            if path.is_file() {
                out.push_back(Entry::File(path));
            } else if path.is_dir() {
                let mut files: Vec<PathBuf> = std::fs::read_dir(&path)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| {
                        p.is_file()
                            && p.file_name()
                                .and_then(|n| n.to_str())
                                .is_some_and(|n| pattern.matches(n))
                    })
                    .collect();
                if files.is_empty() {
                    return Err(IoError::NoMatchingFiles {
                        pattern: pattern_str.to_string(),
                        dir: path,
                    });
                }
                files.sort();
                debug!(dir = %path.display(), count = files.len(), "expanded directory");
                out.extend(files.into_iter().map(Entry::File));
            } else {
                return Err(IoError::NoSuchPath { path });
            }
        }
        VolumeSource::List(items) => {
            for item in items {
                flatten(item, pattern, pattern_str, out)?;
            }
        }
    }
    Ok(())
}

impl Iterator for VolumeStream {
    type Item = IoResult<AnyVolume>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.entries.pop_front()? {
            Entry::Mem(v) => Some(Ok(v)),
            Entry::File(path) => Some(tiff::read_volume(&path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decon_core::{Volume, VolumeShape};

    fn small_volume(fill: u16) -> AnyVolume {
        AnyVolume::U16(Volume::filled(VolumeShape::new(2, 2, 2), fill).unwrap())
    }

    #[test]
    fn single_volume_yields_once() {
        let mut stream =
            VolumeStream::new(small_volume(1).into(), DEFAULT_PATTERN).unwrap();
        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
    }

    #[test]
    fn nested_lists_flatten_in_order() {
        let source = VolumeSource::List(vec![
            small_volume(1).into(),
            VolumeSource::List(vec![small_volume(2).into(), small_volume(3).into()]),
        ]);
        let stream = VolumeStream::new(source, DEFAULT_PATTERN).unwrap();
        let fills: Vec<u16> = stream
            .map(|v| match v.unwrap() {
                AnyVolume::U16(v) => v.get(0, 0, 0),
                AnyVolume::F32(_) => unreachable!(),
            })
            .collect();
        assert_eq!(fills, vec![1, 2, 3]);
    }

    #[test]
    fn directory_expands_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_560nm.tif", "a_560nm.tif", "notes.txt"] {
            let path = dir.path().join(name);
            if name.ends_with(".tif") {
                tiff::write_volume(&path, &small_volume(9)).unwrap();
            } else {
                std::fs::write(&path, b"not a stack").unwrap();
            }
        }
        let stream = VolumeStream::new(dir.path().into(), "*.tif").unwrap();
        assert_eq!(stream.remaining(), 2);
    }

    #[test]
    fn empty_directory_match_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = VolumeStream::new(dir.path().into(), "*560nm*.tif").unwrap_err();
        assert!(matches!(err, IoError::NoMatchingFiles { .. }));
    }

    #[test]
    fn dangling_path_is_an_error() {
        let err =
            VolumeStream::new("/no/such/input.tif".into(), DEFAULT_PATTERN).unwrap_err();
        assert!(matches!(err, IoError::NoSuchPath { .. }));
    }

    #[test]
    fn empty_list_yields_nothing() {
        let stream =
            VolumeStream::new(VolumeSource::List(Vec::new()), DEFAULT_PATTERN).unwrap();
        assert_eq!(stream.remaining(), 0);
    }
}
