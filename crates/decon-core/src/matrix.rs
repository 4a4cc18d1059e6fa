//! Square affine transform matrices.
//!
//! [`AffineMatrix`] is a dynamically sized n×n matrix in **row-major** order
//! using **column vectors**, the layout the native resampling kernel reads.
//! A 3D volume takes a 4x4 matrix (homogeneous coordinates); the rank is
//! dynamic so callers can be rejected with a dimension-mismatch error
//! instead of being silently truncated.
//!
//! Elements are f64: compound transforms (rotation about Y composed with
//! translations and an anisotropic Z scale) are accumulated in double
//! precision and cast to f32 exactly once, at the FFI boundary.
//!
//! # Example
//!
//! ```rust
//! use decon_core::AffineMatrix;
//!
//! let t = AffineMatrix::translation(1.0, 2.0, 3.0);
//! let m = AffineMatrix::identity(4).mul(&t);
//! assert_eq!(m, t);
//! ```

use std::fmt;
use std::ops::Index;

/// A dynamically sized square matrix in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineMatrix {
    n: usize,
    data: Vec<f64>,
}

impl AffineMatrix {
    /// Identity matrix of rank `n`.
    pub fn identity(n: usize) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Self { n, data }
    }

    /// Creates a matrix from a rank and a row-major element buffer.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != n * n` (programmer error).
    pub fn from_row_major(n: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), n * n, "matrix buffer must hold n*n elements");
        Self { n, data }
    }

    /// Creates a 4x4 matrix from row arrays.
    pub fn from_rows_4(rows: [[f64; 4]; 4]) -> Self {
        Self {
            n: 4,
            data: rows.into_iter().flatten().collect(),
        }
    }

    /// 4x4 translation by (tx, ty, tz).
    pub fn translation(tx: f64, ty: f64, tz: f64) -> Self {
        Self::from_rows_4([
            [1.0, 0.0, 0.0, tx],
            [0.0, 1.0, 0.0, ty],
            [0.0, 0.0, 1.0, tz],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// 4x4 anisotropic scale of the Z axis.
    pub fn scale_z(sz: f64) -> Self {
        Self::from_rows_4([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, sz, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// 4x4 rotation about the Y axis by `theta` radians.
    pub fn rotation_y(theta: f64) -> Self {
        let (s, c) = theta.sin_cos();
        Self::from_rows_4([
            [c, 0.0, -s, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [s, 0.0, c, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Rank of the matrix (rows == columns).
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Element at (row, col).
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n + col]
    }

    /// Matrix product `self * rhs`.
    ///
    /// # Panics
    ///
    /// Panics if the operands disagree in rank (programmer error).
    pub fn mul(&self, rhs: &AffineMatrix) -> AffineMatrix {
        assert_eq!(self.n, rhs.n, "matrix rank mismatch in product");
        let n = self.n;
        let mut out = vec![0.0; n * n];
        for row in 0..n {
            for col in 0..n {
                let mut acc = 0.0;
                for k in 0..n {
                    acc += self.data[row * n + k] * rhs.data[k * n + col];
                }
                out[row * n + col] = acc;
            }
        }
        AffineMatrix { n, data: out }
    }

    /// Returns true if this is (exactly) the identity.
    pub fn is_identity(&self) -> bool {
        self.data.iter().enumerate().all(|(i, &v)| {
            let (row, col) = (i / self.n, i % self.n);
            v == if row == col { 1.0 } else { 0.0 }
        })
    }

    /// Row-major f32 buffer for the native call.
    ///
    /// This is the single f64 -> f32 narrowing point for the whole
    /// transform pipeline.
    pub fn to_f32_row_major(&self) -> Vec<f32> {
        self.data.iter().map(|&v| v as f32).collect()
    }
}

impl Index<(usize, usize)> for AffineMatrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        &self.data[row * self.n + col]
    }
}

impl fmt::Display for AffineMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.n {
            for col in 0..self.n {
                if col > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{:10.4}", self.get(row, col))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_times_anything_is_identity_op() {
        let t = AffineMatrix::translation(3.0, -1.0, 2.5);
        assert_eq!(AffineMatrix::identity(4).mul(&t), t);
        assert_eq!(t.mul(&AffineMatrix::identity(4)), t);
    }

    #[test]
    fn translation_composes_additively() {
        let a = AffineMatrix::translation(1.0, 2.0, 3.0);
        let b = AffineMatrix::translation(-1.0, -2.0, -3.0);
        assert!(a.mul(&b).is_identity());
    }

    #[test]
    fn rotation_y_round_trip() {
        let theta = 31.5f64.to_radians();
        let m = AffineMatrix::rotation_y(theta).mul(&AffineMatrix::rotation_y(-theta));
        for row in 0..4 {
            for col in 0..4 {
                let expected = if row == col { 1.0 } else { 0.0 };
                assert_relative_eq!(m.get(row, col), expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn product_accumulates_in_f64() {
        // a tiny Z scale survives composition with large translations when
        // accumulated in f64; the f32 cast happens only at export
        let big = 1.0e7;
        let m = AffineMatrix::translation(big, 0.0, 0.0)
            .mul(&AffineMatrix::scale_z(1.0 + 1.0e-9))
            .mul(&AffineMatrix::translation(-big, 0.0, 0.0));
        assert!(m.get(2, 2) > 1.0);
    }

    #[test]
    fn export_is_row_major() {
        let t = AffineMatrix::translation(5.0, 6.0, 7.0);
        let flat = t.to_f32_row_major();
        assert_eq!(flat[3], 5.0);
        assert_eq!(flat[7], 6.0);
        assert_eq!(flat[11], 7.0);
    }
}
