//! A helper library for `cgmath`.
//!
//! Provides axis-aligned boxes, approximate floating-point comparisons, and
//! operations on 3×3 matrices used as projective transformations of the 2D
//! plane.
pub extern crate cgmath;

mod approx;
mod boxes;
mod projective;

pub use self::approx::*;
pub use self::boxes::*;
pub use self::projective::*;

/// The prelude.
pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{Matrix3ProjExt, Tolerance};
}
