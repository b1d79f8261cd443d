//! Intersection of implicit lines with rectangles.
use arrayvec::ArrayVec;
use cggeom::prelude::*;

use super::{Point, Real, Rect};

/// Find where the line `a·x + b·y + c = 0` crosses the boundary of `rect`.
///
/// The horizontal edges are tested first (solving for `x`), then the vertical
/// ones (solving for `y`). A candidate is accepted if it lies within the span
/// of its edge, with `PRECISION` slack. Returns the first two accepted points,
/// or `None` if there aren't two of them, if `rect` is invalid, or if `a` and
/// `b` are both approximately zero (the line is undefined).
///
/// A line passing exactly through a corner may produce that corner twice.
pub fn truncate_line(rect: &Rect, a: Real, b: Real, c: Real) -> Option<[Point; 2]> {
    if !rect.is_valid() || (a.approx_zero() && b.approx_zero()) {
        return None;
    }

    let mut points = ArrayVec::<[Point; 2]>::new();

    if !a.approx_zero() {
        for &y in &[rect.min.y, rect.max.y] {
            let x = -(c + y * b) / a;
            if x.approx_ge(rect.min.x) && x.approx_le(rect.max.x) {
                points.push(Point::new(x, y));
                if points.is_full() {
                    return points.into_inner().ok();
                }
            }
        }
    }

    if !b.approx_zero() {
        for &x in &[rect.min.x, rect.max.x] {
            let y = -(c + x * a) / b;
            if y.approx_ge(rect.min.y) && y.approx_le(rect.max.y) {
                points.push(Point::new(x, y));
                if points.is_full() {
                    return points.into_inner().ok();
                }
            }
        }
    }

    None
}
