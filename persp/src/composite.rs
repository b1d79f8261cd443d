//! The pixel loop that resamples rendered bands into a destination surface.
use cggeom::{prelude::*, Box2};
use cgmath::prelude::*;
use rayon::prelude::*;
use std::ops::AddAssign;

use super::{
    bounds::{transform_bounds, Bounds},
    layered::Layer,
    sampler::Interpolation,
    surface::{add, demult, scale, Surface, TRANSPARENT},
    task::TaskCoords,
    Matrix, Point, Rect, RectInt, Vector, Vector3, PRECISION,
};

/// The number of rows processed by a single job.
const ROWS_PER_JOB: usize = 16;

/// A value that is affine in the pixel coordinates, advanced by constant
/// deltas while scanning a rectangle row by row.
#[derive(Debug, Clone, Copy)]
struct Incremental<T> {
    value: T,
    /// Added after each pixel.
    dx: T,
    /// Added after each row, to get from the end of the row to the start of
    /// the next one.
    dy: T,
}

impl<T: Copy + AddAssign> Incremental<T> {
    #[inline]
    fn next_pixel(&mut self) {
        self.value += self.dx;
    }

    #[inline]
    fn next_row(&mut self) {
        self.value += self.dy;
    }
}

/// Set up the scan of `matrix · (x, y, 1)` over rows of `width` pixels,
/// starting at `(x, y)`.
fn scan(matrix: &Matrix, x: usize, y: usize, width: usize) -> Incremental<Vector3> {
    let value = matrix.transform_homogeneous(Point::new(x as f64, y as f64));
    let dx = matrix.x;
    Incremental {
        value,
        dx,
        dy: matrix.y - dx * width as f64,
    }
}

/// Resample `src` into `rect` of `dst`.
///
/// `matrix` maps destination pixels to source pixels. `alpha_matrix` maps
/// destination pixels to blending factors; only its first two rows are used,
/// and the division uses `matrix`'s w.
///
/// An accumulating `interpolation` adds the premultiplied sample weighted by
/// the blending factor and `amount`. Nearest-neighbour replaces the pixel
/// with the sample where the blending factor exceeds one half.
#[allow(clippy::too_many_arguments)]
pub fn process_layer(
    dst: &mut Surface,
    src: &Surface,
    rect: Box2<usize>,
    matrix: &Matrix,
    alpha_matrix: &Matrix,
    interpolation: Interpolation,
    amount: f32,
    parallel: bool,
) {
    if rect.is_empty() {
        return;
    }
    assert!(rect.max.x <= dst.width() && rect.max.y <= dst.height());

    let stride = dst.width();
    let width = rect.max.x - rect.min.x;
    let rows = &mut dst.data_mut()[rect.min.y * stride..rect.max.y * stride];

    let job = |(i, rows): (usize, &mut [_])| {
        let y = rect.min.y + i * ROWS_PER_JOB;
        let mut coord = scan(matrix, rect.min.x, y, width);
        let mut alpha = scan(alpha_matrix, rect.min.x, y, width);

        for row in rows.chunks_exact_mut(stride) {
            for c in row[rect.min.x..rect.max.x].iter_mut() {
                let v = coord.value;
                if v.z > PRECISION {
                    let w = 1.0 / v.z;
                    let a = (alpha.value.x * w).max(0.0).min(1.0)
                        * (alpha.value.y * w).max(0.0).min(1.0);
                    if interpolation.is_accumulating() {
                        if a > PRECISION {
                            let sample = interpolation.sample_premult(src, v.x * w, v.y * w);
                            *c = add(*c, scale(sample, a as f32 * amount));
                        }
                    } else if a.approx_gt(0.5) {
                        *c = interpolation.sample(src, v.x * w, v.y * w);
                    }
                }
                coord.next_pixel();
                alpha.next_pixel();
            }
            coord.next_row();
            alpha.next_row();
        }
    };

    if parallel {
        rows.par_chunks_mut(stride * ROWS_PER_JOB)
            .enumerate()
            .for_each(job);
    } else {
        rows.chunks_mut(stride * ROWS_PER_JOB).enumerate().for_each(job);
    }
}

/// Convert the premultiplied pixels in `rect` back to straight alpha.
///
/// The cubic filter overshoots near sharp edges. The color is divided by the
/// accumulated alpha as it is, and then the alpha is clamped to `[0, 1]`. A
/// pixel whose alpha is not positive becomes [`TRANSPARENT`].
pub fn demult_rect(dst: &mut Surface, rect: Box2<usize>) {
    if rect.is_empty() {
        return;
    }
    let stride = dst.width();
    for row in dst.data_mut()[rect.min.y * stride..rect.max.y * stride].chunks_exact_mut(stride) {
        for c in row[rect.min.x..rect.max.x].iter_mut() {
            *c = if c.a > 0.0 {
                let mut straight = demult(*c);
                straight.a = straight.a.min(1.0);
                straight
            } else {
                TRANSPARENT
            };
        }
    }
}

/// Composites the bands of a perspective task into its destination surface.
#[derive(Debug)]
pub struct Compositor<'a> {
    dst: &'a mut Surface,
    /// The writable part of `dst`.
    base_rect: Box2<usize>,
    source_rect: Rect,
    from_pixels: Matrix,
    to_pixels: Matrix,
    /// Maps destination pixels to the source space.
    base_matrix: Matrix,
    interpolation: Interpolation,
    amount: f32,
    parallel: bool,
    /// Set when any band was accumulated and needs to be demultiplied.
    demult: bool,
}

impl<'a> Compositor<'a> {
    /// Returns `None` if `coords` doesn't cover any pixel of `dst`.
    ///
    /// `back_matrix` maps the destination space to the source space.
    pub fn new(
        dst: &'a mut Surface,
        coords: &TaskCoords,
        back_matrix: &Matrix,
        interpolation: Interpolation,
        amount: f32,
        parallel: bool,
    ) -> Option<Self> {
        let surface_rect = RectInt::new(
            [0, 0].into(),
            [dst.width() as i32, dst.height() as i32].into(),
        );
        let base_rect = surface_rect.intersection(&coords.target_rect)?.cast::<usize>()?;

        let from_pixels = coords.from_pixels_matrix();
        let to_pixels = coords.to_pixels_matrix();

        Some(Self {
            dst,
            base_rect,
            source_rect: coords.source_rect,
            from_pixels,
            to_pixels,
            base_matrix: *back_matrix * from_pixels,
            interpolation,
            amount,
            parallel,
            demult: false,
        })
    }

    /// Resample one band. `sub_coords` and `sub_surface` describe what the
    /// band's sub-task rendered.
    pub fn add_layer(&mut self, layer: &Layer, sub_coords: &TaskCoords, sub_surface: &Surface) {
        let orig_rect = layer.source_rect.clip(&self.source_rect);
        let to_pixels = |p: Point| Point::from_vec(self.to_pixels.transform_homogeneous(p).truncate());
        let rect_float = Rect::from_corners(to_pixels(orig_rect.min), to_pixels(orig_rect.max));
        if !rect_float.is_valid() {
            return;
        }

        let matrix = sub_coords.to_pixels_matrix() * self.base_matrix;
        let alpha_matrix = layer.alpha_matrix * self.from_pixels;
        if !matrix.is_invertible_2d() {
            return;
        }

        // Don't read outside what the sub-task rendered
        let sub_target = match sub_coords.target_rect.cast::<f64>() {
            Some(r) => r,
            None => return,
        };
        let sub_bounds = Bounds::new(sub_target, Vector::new(1.0, 1.0));
        let rect_float = rect_float.clip(&transform_bounds(&matrix.inverted(), &sub_bounds).rect);
        if !rect_float.is_valid() {
            return;
        }

        let rect = RectInt::new(
            [
                rect_float.min.x.approx_floor() as i32,
                rect_float.min.y.approx_floor() as i32,
            ]
            .into(),
            [
                rect_float.max.x.approx_ceil() as i32,
                rect_float.max.y.approx_ceil() as i32,
            ]
            .into(),
        );
        let base_rect = match self.base_rect.cast::<i32>() {
            Some(r) => r,
            None => return,
        };
        let rect = match rect.intersection(&base_rect).and_then(|r| r.cast::<usize>()) {
            Some(r) => r,
            None => return,
        };

        log::trace!("compositing {:?} into {:?}", sub_coords.target_rect, rect);

        process_layer(
            self.dst,
            sub_surface,
            rect,
            &matrix,
            &alpha_matrix,
            self.interpolation,
            self.amount,
            self.parallel,
        );
        self.demult |= self.interpolation.is_accumulating();
    }

    /// Demultiply the accumulated colors.
    pub fn finish(self) {
        if self.demult {
            demult_rect(self.dst, self.base_rect);
        }
    }
}

/// Copy `src` to `dst` where their target rectangles overlap. Used when the
/// transformation is the identity.
pub fn copy_rect(dst: &mut Surface, dst_rect: &RectInt, src: &Surface, src_rect: &RectInt) {
    let offset = src_rect.min - dst_rect.min;
    let rect = match dst_rect.intersection(&src_rect.translate(-offset)) {
        Some(r) => r,
        None => return,
    };
    for y in rect.min.y..rect.max.y {
        let sy = y + offset.y;
        if y < 0 || sy < 0 || y as usize >= dst.height() || sy as usize >= src.height() {
            continue;
        }
        for x in rect.min.x..rect.max.x {
            let sx = x + offset.x;
            if x < 0 || sx < 0 || x as usize >= dst.width() || sx as usize >= src.width() {
                continue;
            }
            *dst.get_mut(x as usize, y as usize) = src.get(sx as usize, sy as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{layered::make_alpha_matrix, surface::Color};
    use rgb::RGBA;

    fn checker(w: usize, h: usize) -> Surface {
        Surface::from_fn(w, h, |x, y| {
            RGBA::new(x as f32 / w as f32, y as f32 / h as f32, ((x + y) % 2) as f32, 1.0)
        })
    }

    fn opaque_ramp(m: &Matrix) -> Matrix {
        make_alpha_matrix(1.0, 1.0, 1.0, 1.0, m.w_row())
    }

    fn full(s: &Surface) -> Box2<usize> {
        Box2::new([0, 0].into(), [s.width(), s.height()].into())
    }

    #[test]
    fn incremental_matches_direct_evaluation() {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let m = Matrix::new(
            0.5, 0.1, 0.01,
            -0.2, 0.7, 0.02,
            3.0, 1.0, 1.0,
        );
        let mut inc = scan(&m, 2, 3, 5);
        for y in 3..6 {
            for x in 2..7 {
                let direct = m.transform_homogeneous(Point::new(x as f64, y as f64));
                assert!((inc.value - direct).magnitude() < 1e-12);
                inc.next_pixel();
            }
            inc.next_row();
        }
    }

    #[test]
    fn nearest_reproduces_source_at_pixel_centers() {
        let src = checker(8, 8);
        // Destination pixel `p` samples source pixel `p / 2`
        let m = Matrix::from_scale_2d(0.5);
        let mut dst = Surface::new(16, 16);
        let rect = full(&dst);
        process_layer(&mut dst, &src, rect, &m, &opaque_ramp(&m), Interpolation::Nearest, 1.0, false);

        for y in 0..16 {
            for x in 0..16 {
                let expected = src.get_clamped(
                    (x as f64 * 0.5).round() as isize,
                    (y as f64 * 0.5).round() as isize,
                );
                assert_eq!(dst.get(x, y), expected, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn nearest_reproduces_source_under_perspective() {
        let src = checker(16, 16);
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let m = Matrix::new(
            1.0, 0.0, 0.02,
            0.1, 0.9, 0.01,
            0.5, 0.25, 1.0,
        );
        let mut dst = Surface::new(20, 20);
        let rect = full(&dst);
        process_layer(&mut dst, &src, rect, &m, &opaque_ramp(&m), Interpolation::Nearest, 1.0, true);

        for y in 0..20 {
            for x in 0..20 {
                let p = m.project_point(Point::new(x as f64, y as f64)).unwrap();
                let near_half = |t: f64| (t - t.floor() - 0.5).abs() < 1e-6;
                if near_half(p.x) || near_half(p.y) {
                    continue;
                }
                let expected = src.get_clamped(p.x.round() as isize, p.y.round() as isize);
                assert_eq!(dst.get(x, y), expected, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn nearest_respects_threshold() {
        let src = checker(4, 4);
        let m = Matrix::identity();
        // The first factor is 0.4 everywhere
        let mut alpha = opaque_ramp(&m);
        alpha.z.x = 0.4;
        let mut dst = Surface::new(4, 4);
        let rect = full(&dst);
        process_layer(&mut dst, &src, rect, &m, &alpha, Interpolation::Nearest, 1.0, false);
        assert!(dst.data().iter().all(|c| *c == Color::default()));
    }

    #[test]
    fn accumulated_bands_demultiply_once() {
        let src = Surface::from_fn(4, 4, |_, _| RGBA::new(0.8, 0.4, 0.2, 0.5));
        let m = Matrix::identity();
        // Two half-weight bands
        let mut alpha = opaque_ramp(&m);
        alpha.z.x = 0.5;

        let mut dst = Surface::new(4, 4);
        let rect = full(&dst);
        for _ in 0..2 {
            process_layer(&mut dst, &src, rect, &m, &alpha, Interpolation::Linear, 1.0, false);
        }
        demult_rect(&mut dst, rect);
        for c in dst.data() {
            assert!((c.r - 0.8).abs() < 1e-6 && (c.a - 0.5).abs() < 1e-6, "{:?}", c);
        }
    }

    #[test]
    fn demult_clamps_overshoot() {
        let mut dst = Surface::new(3, 1);
        *dst.get_mut(0, 0) = RGBA::new(1.02, 0.51, 0.0, 1.02);
        *dst.get_mut(1, 0) = RGBA::new(0.01, 0.0, 0.0, -0.01);
        *dst.get_mut(2, 0) = RGBA::new(0.25, 0.125, 0.0, 0.5);
        let rect = full(&dst);
        demult_rect(&mut dst, rect);

        let c = dst.get(0, 0);
        assert_eq!(c.a, 1.0);
        assert!((c.r - 1.0).abs() < 1e-6 && (c.g - 0.5).abs() < 1e-6, "{:?}", c);
        assert_eq!(dst.get(1, 0), TRANSPARENT);
        let c = dst.get(2, 0);
        assert!((c.r - 0.5).abs() < 1e-6 && (c.a - 0.5).abs() < 1e-6, "{:?}", c);
    }

    #[test]
    fn cubic_overshoot_stays_opaque() {
        // A hard edge between transparent and opaque columns
        let src = Surface::from_fn(8, 8, |x, _| {
            if x < 4 {
                RGBA::new(0.0, 0.0, 0.0, 0.0)
            } else {
                RGBA::new(1.0, 0.0, 0.0, 1.0)
            }
        });
        let m = Matrix::from_nonuniform_scale_2d(0.25, 1.0);
        let mut dst = Surface::new(32, 8);
        let rect = full(&dst);
        process_layer(&mut dst, &src, rect, &m, &opaque_ramp(&m), Interpolation::Cubic, 1.0, false);
        demult_rect(&mut dst, rect);
        for c in dst.data() {
            assert!(c.a >= 0.0 && c.a <= 1.0, "{:?}", c);
        }
    }

    #[test]
    fn pixels_behind_the_horizon_are_untouched() {
        let src = checker(4, 4);
        // w' = 1 - 0.5·x: columns 2 and beyond are at or behind the horizon
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let m = Matrix::new(
            1.0, 0.0, -0.5,
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        );
        let mut dst = Surface::new(4, 1);
        let rect = full(&dst);
        process_layer(&mut dst, &src, rect, &m, &opaque_ramp(&m), Interpolation::Cubic, 1.0, false);
        assert_ne!(dst.get(0, 0).a, 0.0);
        assert_eq!(dst.get(2, 0).a, 0.0);
        assert_eq!(dst.get(3, 0).a, 0.0);
    }

    #[test]
    fn copy_rect_with_offset() {
        let src = checker(4, 4);
        let mut dst = Surface::new(4, 4);
        let src_rect = RectInt::new([0, 0].into(), [4, 4].into());
        let dst_rect = RectInt::new([1, 1].into(), [5, 5].into());
        copy_rect(&mut dst, &dst_rect, &src, &src_rect);
        assert_eq!(dst.get(1, 1), src.get(0, 0));
        assert_eq!(dst.get(3, 2), src.get(2, 1));
        assert_eq!(dst.get(0, 0).a, 0.0);
    }
}
