use cgmath::{num_traits::NumCast, BaseNum, Point2, Vector2};
use std::cmp::Ordering;

use super::Tolerance;

/// Represents an axis-aligned 2D box.
///
/// Unlike `std::ops::Range`, both ends are stored as given; a box whose
/// `min` is not below its `max` on some axis is considered empty.
#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Box2<T> {
    /// The minimum coordinate (inclusive).
    pub min: Point2<T>,

    /// The maximum coordinate (exclusive).
    pub max: Point2<T>,
}

/// Construct a [`Box2`] from array literals.
///
/// ```
/// use cggeom::box2;
/// let bx = box2! { min: [0, 0], max: [4, 3] };
/// assert_eq!(bx.size(), [4, 3].into());
/// ```
#[macro_export]
macro_rules! box2 {
    { min: [$min_x:expr, $min_y:expr], max: [$max_x:expr, $max_y:expr]$(,)* } => {
        $crate::Box2::new(
            $crate::cgmath::Point2::new($min_x, $min_y),
            $crate::cgmath::Point2::new($max_x, $max_y),
        )
    };
    { point: [$x:expr, $y:expr]$(,)* } => {
        $crate::Box2::from_point($crate::cgmath::Point2::new($x, $y))
    };
}

#[inline]
fn num_min<T: BaseNum>(x: T, y: T) -> T {
    match x.partial_cmp(&y) {
        None | Some(Ordering::Equal) | Some(Ordering::Less) => x,
        Some(Ordering::Greater) => y,
    }
}

#[inline]
fn num_max<T: BaseNum>(x: T, y: T) -> T {
    match x.partial_cmp(&y) {
        None | Some(Ordering::Equal) | Some(Ordering::Greater) => x,
        Some(Ordering::Less) => y,
    }
}

impl<T: BaseNum> Box2<T> {
    #[inline]
    pub fn new(min: Point2<T>, max: Point2<T>) -> Self {
        Self { min, max }
    }

    /// Construct a zero-sized box located at `p`. Grow it with
    /// [`Box2::expand`].
    #[inline]
    pub fn from_point(p: Point2<T>) -> Self {
        Self { min: p, max: p }
    }

    /// Construct the smallest box containing both points, whichever order
    /// they come in.
    #[inline]
    pub fn from_corners(a: Point2<T>, b: Point2<T>) -> Self {
        let mut bx = Self::from_point(a);
        bx.expand(b);
        bx
    }

    #[inline]
    pub fn zero() -> Self {
        Self::from_point(Point2::new(T::zero(), T::zero()))
    }

    /// Grow the box so that it contains `p`.
    #[inline]
    pub fn expand(&mut self, p: Point2<T>) {
        self.min = Point2::new(num_min(self.min.x, p.x), num_min(self.min.y, p.y));
        self.max = Point2::new(num_max(self.max.x, p.x), num_max(self.max.y, p.y));
    }

    #[inline]
    pub fn size(&self) -> Vector2<T> {
        self.max - self.min
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        let size = self.size();
        size.x <= T::zero() || size.y <= T::zero()
    }

    #[inline]
    pub fn contains_point(&self, point: &Point2<T>) -> bool {
        point.x >= self.min.x && point.y >= self.min.y && point.x < self.max.x && point.y < self.max.y
    }

    /// The bounding box of `self` and `other`. Empty boxes are not treated
    /// specially.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            Point2::new(num_min(self.min.x, other.min.x), num_min(self.min.y, other.min.y)),
            Point2::new(num_max(self.max.x, other.max.x), num_max(self.max.y, other.max.y)),
        )
    }

    #[inline]
    pub fn union_assign(&mut self, other: &Self) {
        *self = self.union(other);
    }

    /// The intersection of `self` and `other`, or `None` if it's empty.
    #[inline]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let s = Self::new(
            Point2::new(num_max(self.min.x, other.min.x), num_max(self.min.y, other.min.y)),
            Point2::new(num_min(self.max.x, other.max.x), num_min(self.max.y, other.max.y)),
        );
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    #[inline]
    pub fn translate(&self, displacement: Vector2<T>) -> Self {
        Self::new(self.min + displacement, self.max + displacement)
    }
}

impl<T: Tolerance> Box2<T> {
    /// Check that the box has a size larger than `T::PRECISION` on both axes.
    /// NaN coordinates make a box invalid.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x.approx_lt(self.max.x) && self.min.y.approx_lt(self.max.y)
    }

    #[inline]
    pub fn area(&self) -> T {
        let size = self.size();
        size.x * size.y
    }

    /// Approximate containment test; points on the boundary are inside.
    #[inline]
    pub fn is_inside(&self, p: &Point2<T>) -> bool {
        self.min.x.approx_le(p.x)
            && p.x.approx_le(self.max.x)
            && self.min.y.approx_le(p.y)
            && p.y.approx_le(self.max.y)
    }

    /// The intersection of two valid boxes. Returns `Box2::zero()` when
    /// either operand is invalid or nearly zero-area, or when the result is
    /// empty.
    pub fn clip(&self, other: &Self) -> Self {
        if !self.is_valid()
            || !other.is_valid()
            || self.area() <= T::PRECISION
            || other.area() <= T::PRECISION
        {
            return Self::zero();
        }
        self.intersection(other).unwrap_or_else(Self::zero)
    }

    /// The union of two boxes. If either operand is invalid or nearly
    /// zero-area, the one with the larger area wins.
    pub fn join(&self, other: &Self) -> Self {
        if self.is_valid()
            && other.is_valid()
            && self.area() > T::PRECISION
            && other.area() > T::PRECISION
        {
            self.union(other)
        } else if self.area() < other.area() {
            *other
        } else {
            *self
        }
    }

    /// Check if any coordinate is NaN or infinite.
    #[inline]
    pub fn is_nan_or_inf(&self) -> bool {
        ![self.min.x, self.min.y, self.max.x, self.max.y]
            .iter()
            .all(|x| x.is_finite())
    }
}

impl<S: NumCast + Copy> Box2<S> {
    /// Component-wise casting to another type
    #[inline]
    pub fn cast<T: NumCast>(&self) -> Option<Box2<T>> {
        Some(Box2 {
            min: self.min.cast()?,
            max: self.max.cast()?,
        })
    }
}

#[cfg(feature = "quickcheck")]
impl<T: quickcheck::Arbitrary + BaseNum> quickcheck::Arbitrary for Box2<T> {
    fn arbitrary<G: quickcheck::Gen>(g: &mut G) -> Self {
        let a = Point2::new(T::arbitrary(g), T::arbitrary(g));
        let b = Point2::new(T::arbitrary(g), T::arbitrary(g));
        Self::from_corners(a, b)
    }
}
