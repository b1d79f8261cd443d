//! Floating-point RGBA surfaces.
use checked::Checked;
use rgb::{ComponentMap, RGBA};

/// A color with straight (non-premultiplied) alpha.
pub type Color = RGBA<f32>;

pub const TRANSPARENT: Color = RGBA {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 0.0,
};

/// Convert a straight-alpha color to the premultiplied form.
#[inline]
pub fn premult(c: Color) -> Color {
    RGBA::new(c.r * c.a, c.g * c.a, c.b * c.a, c.a)
}

/// Convert a premultiplied color to the straight-alpha form. A color with
/// zero alpha becomes [`TRANSPARENT`].
#[inline]
pub fn demult(c: Color) -> Color {
    if c.a == 0.0 {
        TRANSPARENT
    } else {
        let k = 1.0 / c.a;
        RGBA::new(c.r * k, c.g * k, c.b * k, c.a)
    }
}

/// Multiply every component (including alpha) by `k`.
#[inline]
pub fn scale(c: Color, k: f32) -> Color {
    c.map(|x| x * k)
}

#[inline]
pub fn add(c1: Color, c2: Color) -> Color {
    RGBA::new(c1.r + c2.r, c1.g + c2.g, c1.b + c2.b, c1.a + c2.a)
}

/// A row-major image. `data.len() == width * height`.
#[derive(Clone, PartialEq)]
pub struct Surface {
    width: usize,
    height: usize,
    data: Vec<Color>,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Surface {
    /// Construct a transparent surface.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` overflows.
    pub fn new(width: usize, height: usize) -> Self {
        let len = (Checked::from(width) * height).expect("overflow");
        Self {
            width,
            height,
            data: vec![TRANSPARENT; len],
        }
    }

    /// Construct a surface by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> Color) -> Self {
        let mut this = Self::new(width, height);
        for (y, row) in this.rows_mut().enumerate() {
            for (x, c) in row.iter_mut().enumerate() {
                *c = f(x, y);
            }
        }
        this
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn data(&self) -> &[Color] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Color] {
        &mut self.data
    }

    /// Get the pixel at `(x, y)`. Panics if it's out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Color {
        assert!(x < self.width);
        self.data[x + y * self.width]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut Color {
        assert!(x < self.width);
        &mut self.data[x + y * self.width]
    }

    /// Get the pixel nearest to `(x, y)`, clamping the coordinates to the
    /// edges. Returns [`TRANSPARENT`] for an empty surface.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> Color {
        if self.is_empty() {
            return TRANSPARENT;
        }
        let x = x.max(0).min(self.width as isize - 1) as usize;
        let y = y.max(0).min(self.height as isize - 1) as usize;
        self.data[x + y * self.width]
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [Color]> + '_ {
        // `chunks_mut` panics on zero
        self.data.chunks_mut(self.width.max(1))
    }

    pub fn fill(&mut self, color: Color) {
        for c in self.data.iter_mut() {
            *c = color;
        }
    }
}
