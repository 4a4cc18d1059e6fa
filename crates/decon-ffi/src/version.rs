//! Native library version and capability negotiation.
//!
//! The native ABI grew an extra `skewed_decon` flag in 0.6: the argument
//! lists of the init and run entry points differ on either side of that
//! release. The version is established once, when the library is loaded,
//! and selects the argument-list variant for the lifetime of the handle -
//! there are no per-call version conditionals.

use crate::{FfiError, FfiResult};
use std::fmt;
use std::str::FromStr;

/// Environment variable consulted for the native library version when
/// [`crate::LoadOptions`] does not carry one.
pub const VERSION_ENV: &str = "DECON_LIBRARY_VERSION";

/// An ordered `major.minor.patch` triple for the native library.
///
/// The default (0.0.0) selects the conservative pre-0.6 argument lists.
///
/// # Example
///
/// ```rust
/// use decon_ffi::NativeVersion;
///
/// let v: NativeVersion = "0.6.2".parse().unwrap();
/// assert!(v.supports_skewed_decon());
/// assert!(v > NativeVersion::new(0, 5, 9));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NativeVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl NativeVersion {
    /// Creates a version triple.
    #[inline]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// True if the init/run entry points take the skewed-decon flag.
    #[inline]
    pub fn supports_skewed_decon(&self) -> bool {
        *self >= Self::new(0, 6, 0)
    }

    /// Reads the version from [`VERSION_ENV`], if set and parseable.
    pub fn from_env() -> Option<Self> {
        std::env::var(VERSION_ENV).ok()?.parse().ok()
    }
}

impl FromStr for NativeVersion {
    type Err = FfiError;

    fn from_str(s: &str) -> FfiResult<Self> {
        let invalid = || FfiError::InvalidVersion {
            value: s.to_string(),
        };
        let mut parts = s.trim().split('.');
        let mut field = || -> FfiResult<u32> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse()
                .map_err(|_| invalid())
        };
        let major = field()?;
        let minor = field()?;
        let patch = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for NativeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_and_three_part_versions() {
        assert_eq!(
            "0.6".parse::<NativeVersion>().unwrap(),
            NativeVersion::new(0, 6, 0)
        );
        assert_eq!(
            "1.2.3".parse::<NativeVersion>().unwrap(),
            NativeVersion::new(1, 2, 3)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<NativeVersion>().is_err());
        assert!("0".parse::<NativeVersion>().is_err());
        assert!("a.b.c".parse::<NativeVersion>().is_err());
        assert!("1.2.3.4".parse::<NativeVersion>().is_err());
    }

    #[test]
    fn skewed_decon_gate_is_at_0_6() {
        assert!(!NativeVersion::new(0, 5, 9).supports_skewed_decon());
        assert!(NativeVersion::new(0, 6, 0).supports_skewed_decon());
        assert!(NativeVersion::new(1, 0, 0).supports_skewed_decon());
        assert!(!NativeVersion::default().supports_skewed_decon());
    }
}
