//! Sampling resolution of a projective mapping.
//!
//! The resolution a band needs is decided by the point of the band where the
//! mapping magnifies the most. For a projective mapping that point is found
//! on the segment between the two *focus points*, the images of the points
//! at infinity along the input axes under the inverse mapping.
use cggeom::prelude::*;
use cgmath::prelude::*;

use super::{Matrix, Matrix2, Point, Real, Vector, Vector3, PRECISION};

/// Segments longer than this are not searched.
const MAX_SEARCH_LEN: Real = 1e10;

/// Compute the axis-aligned sampling resolution matching a linear map.
///
/// `m` maps a one-pixel step on the input grid to a step in output units.
/// The result is the number of input pixels per output unit along each
/// output axis (the lengths of the columns of `m⁻¹`). Returns a zero vector
/// if `m` is singular.
pub fn affine_resolution(m: &Matrix2) -> Vector {
    let det = m.determinant();
    if det.abs() <= PRECISION * PRECISION {
        return Vector::zero();
    }
    let k = 1.0 / det.abs();
    Vector::new(
        m.y.y.hypot(m.x.y) * k,
        m.y.x.hypot(m.x.x) * k,
    )
}

/// Finds the sampling resolution of a projective mapping at a given depth.
///
/// The matrix given to [`ResolutionSolver::new`] maps input pixels to output
/// units, i.e., it's already scaled by the input's units-per-pixel. A depth
/// `w` passed to [`ResolutionSolver::solve`] selects the iso-line on which the
/// mapped homogeneous coordinate equals `1/w`.
#[derive(Debug, Clone)]
pub struct ResolutionSolver {
    matrix: Matrix,
    affine: bool,
    affine_resolution: Vector,
    focus_a: Point,
    focus_b: Point,
    /// The midpoint of the focus points, or the only existing one.
    focus_m: Point,
    /// Moves a point on the horizon to the iso-line `w' = 1` (divide by `w`
    /// for other iso-lines).
    fp_kw: Vector,
    /// The unit direction from `focus_a` to `focus_b`.
    dir: Vector,
    /// Half the distance between the focus points.
    len: Real,
}

impl ResolutionSolver {
    pub fn new(matrix: &Matrix) -> Self {
        let matrix = *matrix;

        let (a, b, c) = (matrix.x.z, matrix.y.z, matrix.z.z);
        let wsqr = a * a + b * b;
        let affine = wsqr <= PRECISION * PRECISION;

        let affine_resolution = if c.approx_zero() {
            Vector::zero()
        } else {
            affine_resolution(&(matrix.linear_2d() / c))
        };

        let mut this = Self {
            matrix,
            affine,
            affine_resolution,
            focus_a: Point::origin(),
            focus_b: Point::origin(),
            focus_m: Point::origin(),
            fp_kw: Vector::zero(),
            dir: Vector::zero(),
            len: 0.0,
        };

        if affine {
            return this;
        }

        let back = if matrix.is_invertible_2d() {
            Some(matrix.inverted())
        } else {
            None
        };
        let focus = |col: Vector3| {
            if col.z.approx_zero() {
                None
            } else {
                Some(Point::from_vec(col.truncate() / col.z))
            }
        };
        let focus_a = back.and_then(|m| focus(m.x));
        let focus_b = back.and_then(|m| focus(m.y));
        debug_assert!(
            focus_a.is_some() || focus_b.is_some(),
            "{:?} has no focus points",
            matrix
        );

        match (focus_a, focus_b) {
            (Some(fa), Some(fb)) => {
                let dist = fb - fa;
                this.focus_a = fa;
                this.focus_b = fb;
                this.focus_m = fa + dist * 0.5;
                this.len = dist.magnitude() * 0.5;
                if !this.len.approx_zero() {
                    this.dir = dist / (2.0 * this.len);
                }
            }
            (Some(f), None) | (None, Some(f)) => {
                this.focus_a = focus_a.unwrap_or_else(Point::origin);
                this.focus_b = focus_b.unwrap_or_else(Point::origin);
                this.focus_m = f;
            }
            (None, None) => {}
        }

        this.fp_kw = Vector::new(a, b) / wsqr;

        this
    }

    /// The un-normalized magnification objective at `point`. Larger is
    /// "less magnified".
    fn ratio_for_point(&self, point: Point, w: Real) -> Real {
        let m = &self.matrix;
        let v = m.transform_homogeneous(point);
        let ox = Vector::new(m.x.x - m.x.z * v.x * w, m.y.x - m.y.z * v.x * w);
        let oy = Vector::new(m.x.y - m.x.z * v.y * w, m.y.y - m.y.z * v.y * w);
        -ox.magnitude() - oy.magnitude()
    }

    fn resolution_for_point(&self, point: Point, w: Real) -> Vector {
        let m = &self.matrix;
        let v = m.transform_homogeneous(point);
        let d = Matrix2::from_cols(
            Vector::new(
                (m.x.x - m.x.z * v.x * w) * w,
                (m.x.y - m.x.z * v.y * w) * w,
            ),
            Vector::new(
                (m.y.x - m.y.z * v.x * w) * w,
                (m.y.y - m.y.z * v.y * w) * w,
            ),
        );
        affine_resolution(&d)
    }

    /// Bracket search for the maximum of `ratio_for_point` along
    /// `point + dir·l`, `0 ≤ l ≤ max_l`, assuming it's unimodal there.
    ///
    /// Returns `(l, ratio)`. The bracket is halved until it's at most one
    /// unit wide.
    fn find_max(&self, point: Point, dir: Vector, max_l: Real, w: Real) -> (Real, Real) {
        if max_l <= 1.0 || max_l >= MAX_SEARCH_LEN {
            return (0.0, self.ratio_for_point(point, w));
        }

        let (mut l0, mut l1) = (0.0, max_l);
        let mut ll0 = (l0 + l1) * 0.5;
        let mut vv0 = self.ratio_for_point(point + dir * ll0, w);

        while l1 - l0 > 1.0 {
            let (ll1, vv1);
            if ll0 - l0 < l1 - ll0 {
                ll1 = (ll0 + l1) * 0.5;
                vv1 = self.ratio_for_point(point + dir * ll1, w);
            } else {
                ll1 = ll0;
                vv1 = vv0;
                ll0 = (l0 + ll0) * 0.5;
                vv0 = self.ratio_for_point(point + dir * ll0, w);
            }

            if vv0 > vv1 {
                l1 = ll1;
            } else {
                l0 = ll0;
                ll0 = ll1;
                vv0 = vv1;
            }
        }

        (ll0, vv0)
    }

    /// Compute the resolution at depth `w`.
    ///
    /// Returns a zero vector if `w` is below `PRECISION`; the caller should
    /// skip whatever it was about to render.
    pub fn solve(&self, w: Real) -> Vector {
        if self.affine {
            return self.affine_resolution;
        }
        if w < PRECISION {
            return Vector::zero();
        }

        let offset_w = self.fp_kw / w;
        let center = if self.len <= 1.0 {
            self.focus_m + offset_w
        } else {
            let (la, ra) = self.find_max(self.focus_a + offset_w, self.dir, self.len, w);
            let (lb, rb) = self.find_max(self.focus_b + offset_w, -self.dir, self.len, w);
            if ra > rb {
                self.focus_a + offset_w + self.dir * la
            } else {
                self.focus_b + offset_w - self.dir * lb
            }
        };

        self.resolution_for_point(center, w)
    }
}
