//! Depth-banded subdivision of a projective mapping.
//!
//! A single sampling resolution can't serve the whole image of a plane seen
//! in perspective: the part close to the viewer needs a dense grid, and the
//! part near the horizon needs only a sparse one. [`transform_bounds_layered`]
//! slices the visible depth range into bands whose `w` grows geometrically,
//! so that each band can be rendered at a resolution suitable for it.
//!
//! Adjacent bands overlap by one step. The overlapping part is cross-faded
//! with an *alpha ramp*, a matrix whose image divided by `w` gives two
//! factors growing linearly in `w`. Their product, each clamped to `[0, 1]`,
//! is the band's blending weight, and the weights of the bands sum to one.
use arrayvec::ArrayVec;
use cggeom::prelude::*;

use super::{
    bounds::{transform_bounds_affine, Bounds},
    clip::truncate_line,
    resolution::ResolutionSolver,
    Matrix, Point, Real, Rect, Vector3, PRECISION,
};

/// The lower limit of the step factor.
pub const MIN_STEP: Real = 1.1;

/// A band produced by [`transform_bounds_layered`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layer {
    /// The part of the input rectangle this band covers.
    pub source_rect: Rect,
    /// The band's image and the resolution to render it at.
    pub bounds: Bounds,
    /// Maps an input point to the blending factors, before division by `w`.
    pub alpha_matrix: Matrix,
}

impl Layer {
    /// Evaluate the blending weight of this band at an input point, the way
    /// the compositor does. Returns `None` at or behind the horizon.
    pub fn alpha_at(&self, p: Point) -> Option<Real> {
        let v = self.alpha_matrix.transform_homogeneous(p);
        if v.z <= PRECISION {
            return None;
        }
        let v = v / v.z;
        Some(v.x.max(0.0).min(1.0) * v.y.max(0.0).min(1.0))
    }
}

/// A column of an alpha ramp that fades in from depth `z0` to `z1`, where
/// `w_col` computes the depth.
fn make_alpha_matrix_col(z0: Real, z1: Real, w_col: Vector3) -> Vector3 {
    let k = z1 - z0;
    if k.approx_zero() {
        return w_col;
    }
    let k = z1 / k;
    Vector3::new(k * w_col.x, k * w_col.y, k * (w_col.z - z0))
}

/// Build an alpha ramp. The first factor fades in over the depth range
/// `a0..a1`, the second over `b0..b1`. The depth of an input point is
/// `w_col · (x, y, 1)`, which also becomes the ramp's own w row.
///
/// A degenerate range yields a factor that is constantly one.
pub fn make_alpha_matrix(a0: Real, a1: Real, b0: Real, b1: Real, w_col: Vector3) -> Matrix {
    let a = make_alpha_matrix_col(a0, a1, w_col);
    let b = make_alpha_matrix_col(b0, b1, w_col);
    #[cfg_attr(rustfmt, rustfmt_skip)]
    let m = Matrix::new(
        a.x, b.x, w_col.x,
        a.y, b.y, w_col.y,
        a.z, b.z, w_col.z,
    );
    m
}

/// Split the visible part of `bounds.rect` under `matrix` into depth bands.
///
/// `step` (clamped to at least [`MIN_STEP`]) is the ratio between the depths
/// of adjacent bands. The bands are ordered from the nearest to the farthest.
///
/// An affine `matrix` produces a single band covering the whole rectangle
/// with a constant weight of one. Returns an empty list if `bounds` is
/// invalid, if the rectangle is entirely behind the horizon, or if the
/// visible part is thinner than a pixel.
pub fn transform_bounds_layered(matrix: &Matrix, bounds: &Bounds, step: Real) -> Vec<Layer> {
    let mut layers = Vec::new();
    if !bounds.is_valid() {
        return layers;
    }

    let norm = matrix.normalized_by_det();
    if !norm.is_invertible_2d() {
        log::debug!("transform_bounds_layered: {:?} is singular", matrix);
        return layers;
    }
    let step = step.max(MIN_STEP);

    // The iso-line of depth `w` is `a·x + b·y + c = 1/w`, and the horizon is
    // `a·x + b·y + c = 0`.
    let w_col = norm.w_row();
    let [a, b, c]: [Real; 3] = w_col.into();

    let krx = 1.0 / bounds.resolution.x;
    let kry = 1.0 / bounds.resolution.y;

    // How fast `1/w` changes per input pixel
    let hd = (a * a * krx * krx + b * b * kry * kry).sqrt();
    if hd <= PRECISION {
        if c.abs() < PRECISION {
            return layers;
        }
        layers.push(Layer {
            source_rect: bounds.rect,
            bounds: transform_bounds_affine(&(norm * (1.0 / c)), bounds),
            alpha_matrix: make_alpha_matrix(1.0, 1.0, 1.0, 1.0, w_col),
        });
        return layers;
    }

    let solver = ResolutionSolver::new(&(norm * Matrix::from_nonuniform_scale_2d(krx, kry)));

    let Rect { min, max } = bounds.rect;
    let corners = [
        Point::new(min.x, min.y),
        Point::new(min.x, max.y),
        Point::new(max.x, min.y),
        Point::new(max.x, max.y),
    ];

    // Bands closer than one pixel to the horizon are not rendered
    let horizon_w1 = 1.0 / hd;
    let horizon_w2 = 1.0 / (hd * step.min(2.0));
    let horizon_w3 = 1.0 / (hd * step);

    let (mut min_w, mut max_w) = (Real::INFINITY, Real::NEG_INFINITY);
    // The projected corners and their depths, or `None` if not visible
    let mut projected: [Option<(Point, Real)>; 4] = [None; 4];
    for (&corner, proj) in corners.iter().zip(projected.iter_mut()) {
        let p = norm.transform_homogeneous(corner);
        if p.z.approx_gt(hd) {
            let w = 1.0 / p.z;
            *proj = Some((Point::new(p.x * w, p.y * w), w));
            min_w = min_w.min(w);
            max_w = max_w.max(w);
        } else {
            max_w = horizon_w1;
        }
    }
    if min_w.approx_ge(max_w) {
        log::debug!(
            "transform_bounds_layered: the visible part of {:?} is too thin",
            bounds.rect
        );
        return layers;
    }
    let max_w3 = max_w.min(horizon_w3);

    let step_log = step.ln();
    let min_log = (min_w.ln() / step_log).approx_floor() as i32;
    let max_log = ((max_w3.ln() / step_log).approx_ceil() as i32).max(min_log);

    let mut w = step.powi(min_log);
    for i in min_log..=max_log {
        let band_w = w;
        w *= step;

        let w0 = band_w / step;
        let w1 = (band_w * step).min(horizon_w1);

        let (aw0, aw1) = (w0, band_w);
        let (bw0, bw1) = if i == max_log {
            (horizon_w1, horizon_w2)
        } else {
            (w1, band_w)
        };

        // Up to 4 corners plus two iso-line crossings for each end
        let mut found = ArrayVec::<[(Point, Point); 8]>::new();
        for (&corner, proj) in corners.iter().zip(projected.iter()) {
            if let Some((p, cw)) = *proj {
                if cw.approx_ge(w0) && cw.approx_le(w1) {
                    found.push((corner, p));
                }
            }
        }
        for &iso_w in &[w0, w1] {
            if let Some(line) = truncate_line(&bounds.rect, a, b, c - 1.0 / iso_w) {
                for &q in line.iter() {
                    let v = norm.transform_homogeneous(q);
                    found.push((q, Point::new(v.x * iso_w, v.y * iso_w)));
                }
            }
        }

        let (first_src, first_dst) = match found.first() {
            Some(&x) => x,
            None => {
                log::trace!("band {} (w = {}) is empty", i, band_w);
                continue;
            }
        };
        let mut source_rect = Rect::from_point(first_src);
        let mut rect = Rect::from_point(first_dst);
        for &(src, dst) in &found[1..] {
            source_rect.expand(src);
            rect.expand(dst);
        }
        if !rect.is_valid() || !source_rect.is_valid() {
            log::trace!("band {} (w = {}) is too thin", i, band_w);
            continue;
        }

        let resolution = solver.solve(band_w);
        if resolution.x <= PRECISION || resolution.y <= PRECISION {
            log::trace!("band {} (w = {}) has no resolution", i, band_w);
            continue;
        }

        log::trace!(
            "band {} (w = {}): {:?} → {:?} at {:?}",
            i,
            band_w,
            source_rect,
            rect,
            resolution
        );

        layers.push(Layer {
            source_rect,
            bounds: Bounds::new(rect, resolution),
            alpha_matrix: make_alpha_matrix(
                1.0 / aw0,
                1.0 / aw1,
                1.0 / bw0,
                1.0 / bw1,
                w_col,
            ),
        });
    }

    log::debug!(
        "transform_bounds_layered: {} band(s) for {:?}",
        layers.len(),
        bounds.rect
    );

    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector;
    use cggeom::box2;
    use cgmath::SquareMatrix;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    fn bounds10() -> Bounds {
        Bounds::new(
            box2! { min: [0.0, 0.0], max: [10.0, 10.0] },
            Vector::new(1.0, 1.0),
        )
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

    /// `w' = 1 - 0.2·x`, crossing the horizon at `x = 5`
    fn crossing() -> Matrix {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let m = Matrix::new(
            1.0, 0.0, -0.2,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        );
        m
    }

    fn grid(rect: &Rect, n: usize) -> impl Iterator<Item = Point> + '_ {
        (0..=n).flat_map(move |i| {
            (0..=n).map(move |j| {
                let (u, v) = (i as Real / n as Real, j as Real / n as Real);
                Point::new(
                    rect.min.x + (rect.max.x - rect.min.x) * u,
                    rect.min.y + (rect.max.y - rect.min.y) * v,
                )
            })
        })
    }

    #[test]
    fn identity_makes_a_single_opaque_layer() {
        let layers = transform_bounds_layered(&Matrix::identity(), &bounds10(), 2.0);
        assert_eq!(layers.len(), 1);
        let layer = &layers[0];
        assert_eq!(layer.source_rect, bounds10().rect);
        assert_eq!(layer.bounds, bounds10());
        for p in grid(&bounds10().rect, 4) {
            assert_eq!(layer.alpha_at(p), Some(1.0));
        }
    }

    #[test]
    fn affine_alpha_is_one_regardless_of_scale() {
        let m = Matrix::from_scale_2d(3.0);
        let layers = transform_bounds_layered(&m, &bounds10(), 2.0);
        assert_eq!(layers.len(), 1);
        let alpha = layers[0].alpha_at(Point::new(5.0, 5.0)).unwrap();
        assert!((alpha - 1.0).abs() < 1e-12, "{}", alpha);
    }

    #[test]
    fn degenerate_inputs_are_empty() {
        let zero_area = Bounds::new(
            box2! { min: [0.0, 0.0], max: [10.0, 0.0] },
            Vector::new(1.0, 1.0),
        );
        assert!(transform_bounds_layered(&receding(), &zero_area, 2.0).is_empty());

        let zero_res = Bounds::new(bounds10().rect, Vector::new(0.0, 1.0));
        assert!(transform_bounds_layered(&receding(), &zero_res, 2.0).is_empty());

        let singular = Matrix::from_nonuniform_scale_2d(0.0, 1.0);
        assert!(transform_bounds_layered(&singular, &bounds10(), 2.0).is_empty());
    }

    #[test]
    fn negated_matrix_is_the_same_mapping() {
        let layers = transform_bounds_layered(&receding(), &bounds10(), 2.0);
        assert!(!layers.is_empty());
        assert_eq!(transform_bounds_layered(&(-receding()), &bounds10(), 2.0), layers);

        let layers = transform_bounds_layered(&crossing(), &bounds10(), 2.0);
        assert!(!layers.is_empty());
        assert_eq!(transform_bounds_layered(&(-crossing()), &bounds10(), 2.0), layers);
    }

    #[test]
    fn receding_plane_has_two_bands() {
        let layers = transform_bounds_layered(&receding(), &bounds10(), 2.0);
        assert_eq!(layers.len(), 2);
        for layer in &layers {
            assert_eq!(layer.source_rect, bounds10().rect);
            assert!(layer.bounds.is_valid());
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let layers = transform_bounds_layered(&receding(), &bounds10(), 2.0);
        for p in grid(&bounds10().rect, 10) {
            let sum: Real = layers.iter().filter_map(|l| l.alpha_at(p)).sum();
            assert!((sum - 1.0).abs() < 1e-9, "{} at {:?}", sum, p);
        }
    }

    #[test]
    fn horizon_crossing_is_covered() {
        let layers = transform_bounds_layered(&crossing(), &bounds10(), 2.0);
        assert!(layers.len() >= 2, "{:?}", layers);

        let union = layers[1..]
            .iter()
            .fold(layers[0].source_rect, |acc, l| acc.union(&l.source_rect));

        // The visible part is `x < 5`. The last pixel before the horizon is
        // left out.
        assert!(union.min.x.abs() < 1e-9, "{:?}", union);
        assert!(union.min.y.abs() < 1e-9, "{:?}", union);
        assert!((union.max.y - 10.0).abs() < 1e-9, "{:?}", union);
        assert!((union.max.x - 4.0).abs() < 1e-9, "{:?}", union);
    }

    #[test]
    fn layers_stay_in_front_of_the_horizon() {
        let layers = transform_bounds_layered(&crossing(), &bounds10(), 2.0);
        let norm = crossing().normalized_by_det();
        for layer in &layers {
            for p in grid(&layer.source_rect, 8) {
                let w = norm.transform_homogeneous(p).z;
                assert!(w > PRECISION, "{:?} is behind the horizon in {:?}", p, layer);
            }
        }
    }

    #[test]
    fn step_is_clamped() {
        let a = transform_bounds_layered(&receding(), &bounds10(), 0.5);
        let b = transform_bounds_layered(&receding(), &bounds10(), MIN_STEP);
        assert_eq!(a, b);
    }

    #[quickcheck]
    fn alpha_is_bounded(ka: i8, kb: i8, px: u8, py: u8) -> TestResult {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let m = Matrix::new(
            1.0, 0.0, ka as Real / 500.0,
            0.0, 1.0, kb as Real / 500.0,
            0.0, 0.0, 1.0,
        );
        let layers = transform_bounds_layered(&m, &bounds10(), 2.0);
        let p = Point::new(px as Real / 25.5, py as Real / 25.5);
        for layer in &layers {
            if let Some(alpha) = layer.alpha_at(p) {
                if !(alpha >= 0.0 && alpha <= 1.0) {
                    return TestResult::error(format!("{} at {:?} in {:?}", alpha, p, layer));
                }
            }
        }
        TestResult::passed()
    }
}
