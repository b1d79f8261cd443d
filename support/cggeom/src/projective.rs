use cgmath::{prelude::*, Matrix2, Matrix3, Point2, Vector2, Vector3};

use super::Tolerance;

/// An extension trait for [`cgmath::Matrix3`] that treats it as a projective
/// transformation of the 2D plane.
///
/// A point `(x, y)` is lifted to `(x, y, 1)`, multiplied by the matrix, and
/// the result `(x', y', w')` is projected back to `(x' / w', y' / w')`. The
/// columns of the matrix are therefore the images of the unit `x` vector, the
/// unit `y` vector, and the origin, and the third row (the "w row") decides
/// where the horizon (`w' = 0`) lies.
///
/// `cgmath` is primarily built for 3D applications and does not provide
/// 2D-specific constructors for `Matrix3` (see [they gave up]), so they are
/// supplied here as well.
///
/// [they gave up]: https://github.com/rustgd/cgmath/pull/469#issuecomment-436041377
pub trait Matrix3ProjExt<S>: Sized {
    /// Create a homogeneous transformation matrix from a translation vector.
    fn from_translation(v: Vector2<S>) -> Self;
    /// Create a homogeneous transformation matrix from a scale value.
    fn from_scale_2d(value: S) -> Self;
    /// Create a homogeneous transformation matrix from a set of scale values.
    fn from_nonuniform_scale_2d(x: S, y: S) -> Self;

    /// Multiply `(p.x, p.y, 1)` by the matrix without dividing by `w`.
    fn transform_homogeneous(&self, p: Point2<S>) -> Vector3<S>;

    /// Transform `p` and project the result onto the `w = 1` plane. Returns
    /// `None` if the image lies on or behind the horizon, i.e., if
    /// `w <= S::PRECISION`.
    fn project_point(&self, p: Point2<S>) -> Option<Point2<S>>;

    /// The coefficients `(a, b, c)` such that `w' = a·x + b·y + c`.
    fn w_row(&self) -> Vector3<S>;

    /// Check if the perspective coefficients of the w row are not
    /// approximately zero.
    fn is_perspective(&self) -> bool;

    /// The upper-left 2×2 part, i.e., the images of the unit vectors before
    /// division by `w`.
    fn linear_2d(&self) -> Matrix2<S>;

    /// Check if the determinant's magnitude is above `S::PRECISION²`.
    fn is_invertible_2d(&self) -> bool;

    /// Compute the inverse.
    ///
    /// # Panics
    ///
    /// Panics if the matrix is singular. Call [`is_invertible_2d`] first.
    ///
    /// [`is_invertible_2d`]: Matrix3ProjExt::is_invertible_2d
    fn inverted(&self) -> Self;

    /// Scale the matrix so that the determinant becomes one, then negate it
    /// if needed to make the constant term of the w row positive (or, if that
    /// term is approximately zero, the first non-zero perspective
    /// coefficient). The negation turns the determinant into `-1`.
    ///
    /// `M` and `-M` represent the same transformation and normalize to the
    /// same matrix. A singular matrix is returned as it is.
    fn normalized_by_det(&self) -> Self;
}

impl<S: Tolerance> Matrix3ProjExt<S> for Matrix3<S> {
    #[inline]
    fn from_translation(v: Vector2<S>) -> Self {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        Self::new(
            S::one(), S::zero(), S::zero(),
            S::zero(), S::one(), S::zero(),
            v.x, v.y, S::one(),
        )
    }

    #[inline]
    fn from_scale_2d(value: S) -> Self {
        Self::from_nonuniform_scale_2d(value, value)
    }

    #[inline]
    fn from_nonuniform_scale_2d(x: S, y: S) -> Self {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        Self::new(
            x, S::zero(), S::zero(),
            S::zero(), y, S::zero(),
            S::zero(), S::zero(), S::one(),
        )
    }

    #[inline]
    fn transform_homogeneous(&self, p: Point2<S>) -> Vector3<S> {
        *self * Vector3::new(p.x, p.y, S::one())
    }

    #[inline]
    fn project_point(&self, p: Point2<S>) -> Option<Point2<S>> {
        let v = self.transform_homogeneous(p);
        if v.z > S::PRECISION {
            Some(Point2::new(v.x / v.z, v.y / v.z))
        } else {
            None
        }
    }

    #[inline]
    fn w_row(&self) -> Vector3<S> {
        self.row(2)
    }

    #[inline]
    fn is_perspective(&self) -> bool {
        let (a, b) = (self.x.z, self.y.z);
        a * a + b * b > S::PRECISION * S::PRECISION
    }

    #[inline]
    fn linear_2d(&self) -> Matrix2<S> {
        Matrix2::from_cols(self.x.truncate(), self.y.truncate())
    }

    #[inline]
    fn is_invertible_2d(&self) -> bool {
        self.determinant().abs() > S::PRECISION * S::PRECISION
    }

    fn inverted(&self) -> Self {
        debug_assert!(self.is_invertible_2d(), "{:?} is not invertible", self);
        self.invert().expect("matrix is not invertible")
    }

    fn normalized_by_det(&self) -> Self {
        let det = self.determinant();
        if det.abs() <= S::PRECISION * S::PRECISION {
            return *self;
        }
        let m = *self * det.cbrt().recip();

        let [a, b, c]: [S; 3] = m.w_row().into();
        let sign = if !c.approx_zero() {
            c
        } else if !a.approx_zero() {
            a
        } else {
            b
        };
        if sign < S::zero() {
            -m
        } else {
            m
        }
    }
}
