//! Closed set of plane transformations.
use cggeom::prelude::*;
use cgmath::prelude::*;

use super::{
    bounds::{transform_bounds, Bounds},
    Matrix, Matrix2, Point, PRECISION,
};

/// A transformation of the plane.
///
/// Use [`Transformation::from_matrix`] to get the most specific variant for
/// a matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transformation {
    Identity,
    /// The w row of the matrix is `(0, 0, 1)`.
    Affine(Matrix),
    Projective(Matrix),
}

impl Default for Transformation {
    fn default() -> Self {
        Transformation::Identity
    }
}

fn approx_eq(m1: &Matrix, m2: &Matrix) -> bool {
    let d = *m1 - *m2;
    [d.x, d.y, d.z]
        .iter()
        .all(|col| col.x.approx_zero() && col.y.approx_zero() && col.z.approx_zero())
}

impl Transformation {
    /// Classify `m`. Matrices differing from the identity by less than
    /// `PRECISION` in every element become `Identity`; a perspective-free
    /// matrix is rescaled so that its w row becomes `(0, 0, 1)`.
    pub fn from_matrix(m: Matrix) -> Self {
        if m.is_perspective() {
            return Transformation::Projective(m);
        }
        let c = m.z.z;
        if c.approx_zero() {
            // Everything is on the horizon
            return Transformation::Projective(m);
        }
        let m = m * (1.0 / c);
        if approx_eq(&m, &Matrix::identity()) {
            Transformation::Identity
        } else {
            Transformation::Affine(m)
        }
    }

    pub fn matrix(&self) -> Matrix {
        match self {
            Transformation::Identity => Matrix::identity(),
            Transformation::Affine(m) | Transformation::Projective(m) => *m,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Transformation::Identity
    }

    /// Map a point. Returns `None` if it lands on or behind the horizon.
    pub fn transform(&self, p: Point) -> Option<Point> {
        match self {
            Transformation::Identity => Some(p),
            Transformation::Affine(m) => Some(Point::from_vec(m.transform_homogeneous(p).truncate())),
            Transformation::Projective(m) => m.project_point(p),
        }
    }

    /// The Jacobian of [`Transformation::transform`] at `p`. Its columns are
    /// the derivatives along the input axes.
    pub fn derivative(&self, p: Point) -> Option<Matrix2> {
        match self {
            Transformation::Identity => Some(Matrix2::identity()),
            Transformation::Affine(m) => Some(m.linear_2d()),
            Transformation::Projective(m) => {
                let v = m.transform_homogeneous(p);
                if v.z <= PRECISION {
                    return None;
                }
                let k = 1.0 / v.z;
                let (fx, fy) = (v.x * k, v.y * k);
                let (a, b) = (m.x.z, m.y.z);
                Some(Matrix2::new(
                    (m.x.x - fx * a) * k,
                    (m.x.y - fy * a) * k,
                    (m.y.x - fx * b) * k,
                    (m.y.y - fy * b) * k,
                ))
            }
        }
    }

    pub fn transform_bounds(&self, bounds: &Bounds) -> Bounds {
        match self {
            Transformation::Identity => *bounds,
            Transformation::Affine(m) | Transformation::Projective(m) => {
                transform_bounds(m, bounds)
            }
        }
    }

    /// Returns `None` if the matrix is singular.
    pub fn inverted(&self) -> Option<Self> {
        match self {
            Transformation::Identity => Some(Transformation::Identity),
            Transformation::Affine(m) | Transformation::Projective(m) => {
                if m.is_invertible_2d() {
                    Some(Self::from_matrix(m.inverted()))
                } else {
                    None
                }
            }
        }
    }

    /// Compose two transformations. `inner` is applied first.
    pub fn merge(outer: &Self, inner: &Self) -> Self {
        match (outer, inner) {
            (Transformation::Identity, x) | (x, Transformation::Identity) => *x,
            (Transformation::Affine(m1), Transformation::Affine(m2)) => {
                Transformation::Affine(*m1 * *m2)
            }
            (o, i) => Self::from_matrix((o.matrix() * i.matrix()).normalized_by_det()),
        }
    }
}
