use cgmath::BaseFloat;

/// Floating-point types with a shared precision epsilon.
///
/// Every "is this close to zero" and "is this approximately less than that"
/// test in this crate and its users goes through `PRECISION`, so that all of
/// them agree on where the horizon of a projective transformation is.
///
/// # Examples
///
/// ```
/// use cggeom::Tolerance;
/// assert!(1e-12f64.approx_zero());
/// assert!(!1.0f64.approx_lt(1.0 + 1e-12));
/// assert_eq!(2.999_999_999_9f64.approx_floor(), 3.0);
/// ```
pub trait Tolerance: BaseFloat {
    /// The precision epsilon.
    const PRECISION: Self;

    #[inline]
    fn approx_zero(self) -> bool {
        self.abs() < Self::PRECISION
    }

    #[inline]
    fn approx_lt(self, x: Self) -> bool {
        self < x - Self::PRECISION
    }

    #[inline]
    fn approx_gt(self, x: Self) -> bool {
        self > x + Self::PRECISION
    }

    #[inline]
    fn approx_le(self, x: Self) -> bool {
        self < x + Self::PRECISION
    }

    #[inline]
    fn approx_ge(self, x: Self) -> bool {
        self > x - Self::PRECISION
    }

    /// `floor` that treats values within `PRECISION` below an integer as that
    /// integer.
    #[inline]
    fn approx_floor(self) -> Self {
        (self + Self::PRECISION).floor()
    }

    /// `ceil` that treats values within `PRECISION` above an integer as that
    /// integer.
    #[inline]
    fn approx_ceil(self) -> Self {
        (self - Self::PRECISION).ceil()
    }
}

impl Tolerance for f32 {
    const PRECISION: f32 = 1e-5;
}

impl Tolerance for f64 {
    const PRECISION: f64 = 1e-8;
}
