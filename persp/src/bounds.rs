//! Rectangles paired with a sampling resolution, and their transformation.
use cggeom::prelude::*;
use cgmath::{prelude::*, Vector2};

use super::{
    clip::truncate_line,
    resolution::{affine_resolution, ResolutionSolver},
    Matrix, Matrix2, Point, Real, Rect, Vector, PRECISION,
};

/// A rectangle together with the sampling resolution (pixels per unit along
/// each axis) it should be rendered at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub rect: Rect,
    pub resolution: Vector,
}

impl Default for Bounds {
    /// The empty bounds. Not valid.
    fn default() -> Self {
        Self {
            rect: Rect::zero(),
            resolution: Vector::zero(),
        }
    }
}

impl Bounds {
    pub fn new(rect: Rect, resolution: Vector) -> Self {
        Self { rect, resolution }
    }

    /// Check that the rectangle is valid and the resolution is positive on
    /// both axes.
    pub fn is_valid(&self) -> bool {
        self.rect.is_valid()
            && self.resolution.x.approx_gt(0.0)
            && self.resolution.y.approx_gt(0.0)
    }

    fn corners(&self) -> [Point; 4] {
        let Rect { min, max } = self.rect;
        [
            Point::new(min.x, min.y),
            Point::new(min.x, max.y),
            Point::new(max.x, min.y),
            Point::new(max.x, max.y),
        ]
    }
}

/// [`Bounds`] converted to a whole number of pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteBounds {
    pub rect: Rect,
    pub size: Vector2<i32>,
}

impl Default for DiscreteBounds {
    fn default() -> Self {
        Self {
            rect: Rect::zero(),
            size: Vector2::new(0, 0),
        }
    }
}

impl DiscreteBounds {
    pub fn is_valid(&self) -> bool {
        self.rect.is_valid() && self.size.x > 0 && self.size.y > 0
    }
}

/// Choose a surface size for rendering `bounds`.
///
/// Each axis gets `ceil(extent · resolution)` pixels, and the rectangle is
/// extended so that a pixel is exactly `1 / resolution` units wide. An axis
/// needing more than `max_size` pixels is clamped to `max_size` and keeps its
/// rectangle, lowering the effective resolution.
pub fn make_discrete_bounds(bounds: &Bounds, max_size: i32) -> DiscreteBounds {
    if !bounds.is_valid() || max_size <= 0 {
        return DiscreteBounds::default();
    }

    let extent = bounds.rect.size();
    let axis = |extent: Real, resolution: Real| -> (i32, Real) {
        let pixels = (extent * resolution).approx_ceil();
        if !(pixels >= 1.0) {
            (0, extent)
        } else if pixels > max_size as Real {
            (max_size, extent)
        } else {
            (pixels as i32, pixels / resolution)
        }
    };
    let (size_x, extent_x) = axis(extent.x, bounds.resolution.x);
    let (size_y, extent_y) = axis(extent.y, bounds.resolution.y);

    let min = bounds.rect.min;
    DiscreteBounds {
        rect: Rect::new(min, min + Vector::new(extent_x, extent_y)),
        size: Vector2::new(size_x, size_y),
    }
}

/// Map `bounds` through an affine `matrix` (whose w row must be `(0, 0, 1)`).
///
/// The output resolution is the one the output needs to preserve every input
/// pixel.
pub fn transform_bounds_affine(matrix: &Matrix, bounds: &Bounds) -> Bounds {
    if !bounds.is_valid() {
        return Bounds::default();
    }
    debug_assert!(!matrix.is_perspective());

    let corners = bounds.corners();
    let mut corners = corners
        .iter()
        .map(|&p| Point::from_vec(matrix.transform_homogeneous(p).truncate()));
    let mut rect = match corners.next() {
        Some(p) => Rect::from_point(p),
        None => return Bounds::default(),
    };
    corners.for_each(|p| rect.expand(p));

    let per_pixel = matrix.linear_2d()
        * Matrix2::from_diagonal(Vector::new(
            1.0 / bounds.resolution.x,
            1.0 / bounds.resolution.y,
        ));

    Bounds::new(rect, affine_resolution(&per_pixel))
}

/// Map `bounds` through a projective `matrix`.
///
/// The corners behind the horizon are dropped. If the horizon crosses the
/// rectangle, the output is extended to where the horizon line lands when
/// moved to `w = PRECISION`, so the result stays finite. The resolution is
/// solved at the geometric mean of the visible depth range.
///
/// Returns the empty bounds if the input is invalid or the whole rectangle
/// lies behind the horizon.
pub fn transform_bounds(matrix: &Matrix, bounds: &Bounds) -> Bounds {
    if !bounds.rect.is_valid() {
        return Bounds::default();
    }

    let norm = matrix.normalized_by_det();
    let [a, b, c]: [Real; 3] = norm.w_row().into();
    if a * a + b * b <= PRECISION * PRECISION {
        let c_inv = if c.approx_zero() { 0.0 } else { 1.0 / c };
        return transform_bounds_affine(&(norm * c_inv), bounds);
    }
    if !norm.is_invertible_2d() {
        log::debug!("transform_bounds: {:?} is singular", matrix);
        return Bounds::default();
    }

    let horizon_w = PRECISION;

    let mut rect: Option<Rect> = None;
    let (mut min_w, mut max_w) = (Real::INFINITY, Real::NEG_INFINITY);
    for &corner in bounds.corners().iter() {
        let v = norm.transform_homogeneous(corner);
        if v.z > horizon_w {
            let p = Point::new(v.x / v.z, v.y / v.z);
            match &mut rect {
                Some(rect) => rect.expand(p),
                None => rect = Some(Rect::from_point(p)),
            }
            min_w = min_w.min(v.z);
            max_w = max_w.max(v.z);
        }
    }

    let mut rect = match rect {
        Some(rect) => rect,
        None => return Bounds::default(),
    };

    if let Some(line) = truncate_line(&bounds.rect, a, b, c - horizon_w) {
        for &p in line.iter() {
            let v = norm.transform_homogeneous(p);
            rect.expand(Point::new(v.x / horizon_w, v.y / horizon_w));
        }
        min_w = horizon_w;
    }

    let mid_w = ((min_w.ln() + max_w.ln()) * 0.5).exp();
    let solver = ResolutionSolver::new(
        &(norm
            * Matrix::from_nonuniform_scale_2d(
                1.0 / bounds.resolution.x,
                1.0 / bounds.resolution.y,
            )),
    );

    Bounds::new(rect, solver.solve(1.0 / mid_w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cggeom::box2;

    fn bounds10() -> Bounds {
        Bounds::new(
            box2! { min: [0.0, 0.0], max: [10.0, 10.0] },
            Vector::new(1.0, 1.0),
        )
    }

    #[test]
    fn identity() {
        let out = transform_bounds(&Matrix::identity(), &bounds10());
        assert_eq!(out, bounds10());
    }

    #[test]
    fn affine_scale() {
        let out = transform_bounds(&Matrix::from_nonuniform_scale_2d(2.0, 0.5), &bounds10());
        assert_eq!(out.rect, box2! { min: [0.0, 0.0], max: [20.0, 5.0] });
        assert!((out.resolution - Vector::new(0.5, 2.0)).magnitude() < 1e-9);
    }

    #[test]
    fn invalid_input_is_empty() {
        let bx = Bounds::new(box2! { min: [0.0, 0.0], max: [0.0, 10.0] }, Vector::new(1.0, 1.0));
        assert!(!transform_bounds(&Matrix::identity(), &bx).is_valid());
    }

    #[test]
    fn horizon_crossing_stays_finite() {
        // w' = 1 - 0.2·x; the horizon is at x = 5
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let m = Matrix::new(
            1.0, 0.0, -0.2,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        );
        let out = transform_bounds(&m, &bounds10());
        assert!(out.rect.is_valid());
        assert!(!out.rect.is_nan_or_inf(), "{:?}", out);
        // The horizon is pushed far away, but not to infinity
        assert!(out.rect.max.x > 1e6, "{:?}", out);
        assert!(out.resolution.x.is_finite() && out.resolution.y.is_finite());
    }

    #[test]
    fn fully_behind_horizon_is_empty() {
        // w' = 1 - 0.5·x is negative everywhere on the rectangle
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let m = Matrix::new(
            1.0, 0.0, -0.5,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        );
        let bx = Bounds::new(
            box2! { min: [10.0, 0.0], max: [20.0, 10.0] },
            Vector::new(1.0, 1.0),
        );
        assert_eq!(transform_bounds(&m, &bx), Bounds::default());
    }

    /// `w' = 0.05·y + 1`
    fn receding() -> Matrix {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let m = Matrix::new(
            1.0, 0.0, 0.0,
            0.0, 1.0, 0.05,
            0.0, 0.0, 1.0,
        );
        m
    }

    #[test]
    fn negated_matrix_is_the_same_mapping() {
        let m = receding();
        let out = transform_bounds(&m, &bounds10());
        assert!(out.is_valid());
        assert_eq!(transform_bounds(&(-m), &bounds10()), out);
    }

    #[test]
    fn perspective_resolution_is_solved_at_mean_depth() {
        let m = receding();
        let out = transform_bounds(&m, &bounds10());

        // w ranges over [1, 1.5] on the rectangle
        let expected = ResolutionSolver::new(&m.normalized_by_det()).solve(1.0 / 1.5f64.sqrt());
        assert!(
            (out.resolution - expected).magnitude() < 1e-9,
            "{:?} != {:?}",
            out.resolution,
            expected
        );
        assert!((out.rect.max.y - 10.0 / 1.5).abs() < 1e-9, "{:?}", out.rect);
    }

    #[test]
    fn discrete_bounds_snap_to_pixels() {
        let bx = Bounds::new(
            box2! { min: [1.0, 2.0], max: [3.5, 3.0] },
            Vector::new(2.0, 3.0),
        );
        let d = make_discrete_bounds(&bx, 16384);
        assert!(d.is_valid());
        assert_eq!(d.size, Vector2::new(5, 3));
        assert_eq!(d.rect, box2! { min: [1.0, 2.0], max: [3.5, 3.0] });

        let bx = Bounds::new(bx.rect, Vector::new(1.0, 1.0));
        let d = make_discrete_bounds(&bx, 16384);
        assert_eq!(d.size, Vector2::new(3, 1));
        assert_eq!(d.rect, box2! { min: [1.0, 2.0], max: [4.0, 3.0] });
    }

    #[test]
    fn discrete_bounds_are_clamped() {
        let bx = Bounds::new(bounds10().rect, Vector::new(1e4, 1.0));
        let d = make_discrete_bounds(&bx, 4096);
        assert_eq!(d.size, Vector2::new(4096, 10));
        assert_eq!(d.rect, bounds10().rect);
    }

    #[test]
    fn discrete_bounds_of_invalid_bounds() {
        let bx = Bounds::new(bounds10().rect, Vector::new(0.0, 1.0));
        assert!(!make_discrete_bounds(&bx, 4096).is_valid());
    }
}
