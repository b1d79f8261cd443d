//! Reconstruction filters for reading a [`Surface`] at fractional
//! coordinates.
//!
//! Pixel `(i, j)` is located at the coordinates `(i, j)`. Reads outside the
//! surface are clamped to the nearest edge pixel. Filtering is done on
//! premultiplied colors.
use itertools::izip;
use std::f64::consts::PI;

use super::{
    surface::{add, demult, premult, scale, Color, Surface, TRANSPARENT},
    Real,
};

/// The filter used to resample an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpolation {
    Nearest,
    Linear,
    Cosine,
    /// Catmull-Rom.
    Cubic,
}

impl Default for Interpolation {
    fn default() -> Self {
        Interpolation::Cubic
    }
}

impl Interpolation {
    /// Check if this filter blends neighboring pixels. Layers rendered with
    /// such a filter are accumulated in premultiplied form.
    pub fn is_accumulating(self) -> bool {
        self != Interpolation::Nearest
    }

    /// Sample `surface` at `(x, y)`. Returns a premultiplied color.
    pub fn sample_premult(self, surface: &Surface, x: Real, y: Real) -> Color {
        match self {
            Interpolation::Nearest => premult(sample_nearest(surface, x, y)),
            Interpolation::Linear => sample_separable(surface, x, y, linear_weights),
            Interpolation::Cosine => sample_separable(surface, x, y, cosine_weights),
            Interpolation::Cubic => sample_separable(surface, x, y, cubic_weights),
        }
    }

    /// Sample `surface` at `(x, y)`. Returns a straight-alpha color.
    pub fn sample(self, surface: &Surface, x: Real, y: Real) -> Color {
        match self {
            Interpolation::Nearest => sample_nearest(surface, x, y),
            _ => demult(self.sample_premult(surface, x, y)),
        }
    }
}

fn sample_nearest(surface: &Surface, x: Real, y: Real) -> Color {
    surface.get_clamped(x.round() as isize, y.round() as isize)
}

/// The weights of the four taps at offsets `-1..=2` for fraction `t`.
type Weights = [f32; 4];

fn linear_weights(t: Real) -> Weights {
    let t = t as f32;
    [0.0, 1.0 - t, t, 0.0]
}

fn cosine_weights(t: Real) -> Weights {
    let t = ((1.0 - (t * PI).cos()) * 0.5) as f32;
    [0.0, 1.0 - t, t, 0.0]
}

fn cubic_weights(t: Real) -> Weights {
    let t = t as f32;
    [
        0.5 * t * (t * (-t + 2.0) - 1.0),
        0.5 * (t * (t * (3.0 * t - 5.0)) + 2.0),
        0.5 * t * (t * (-3.0 * t + 4.0) + 1.0),
        0.5 * t * t * (t - 1.0),
    ]
}

fn sample_separable(
    surface: &Surface,
    x: Real,
    y: Real,
    weights: impl Fn(Real) -> Weights,
) -> Color {
    if surface.is_empty() {
        return TRANSPARENT;
    }

    let (x0, y0) = (x.floor(), y.floor());
    let (wx, wy) = (weights(x - x0), weights(y - y0));
    let (x0, y0) = (x0 as isize, y0 as isize);

    let mut sum = TRANSPARENT;
    for (j, &ky) in izip!(-1..=2, &wy) {
        if ky == 0.0 {
            continue;
        }
        let mut row = TRANSPARENT;
        for (i, &kx) in izip!(-1..=2, &wx) {
            if kx == 0.0 {
                continue;
            }
            let c = premult(surface.get_clamped(x0 + i, y0 + j));
            row = add(row, scale(c, kx));
        }
        sum = add(sum, scale(row, ky));
    }
    sum
}
