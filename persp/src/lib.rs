//! Perspective-correct resampling for a software compositor.
//!
//! Mapping an image through a projective transformation with a single
//! sampling resolution either blurs the parts close to the viewer or wastes
//! work on the parts far away. This crate splits the visible depth range of
//! the mapping into geometric bands ([`layered::Layer`]), renders the source
//! separately for each band at the resolution that band needs, and blends
//! the bands back together with alpha ramps that are linear in `1/w`, so the
//! seams between them vanish.
//!
//! # Overview
//!
//!  - [`clip`], [`resolution`], [`bounds`], and [`layered`] are pure
//!    functions over matrices and rectangles. They never fail; a mapping that
//!    cannot be rendered yields an empty result.
//!  - [`task`] owns a render pass: source tasks, the perspective task, and
//!    their surfaces live in a [`task::TaskArena`] and are referenced by
//!    [`task::TaskId`].
//!  - [`composite`] is the pixel loop that resamples the rendered bands into
//!    the destination surface.
//!  - [`quad`] builds the transformation from a source rectangle and four
//!    destination corners.
//!
//! # Conventions
//!
//! Matrices are `cgmath::Matrix3<f64>` acting on column vectors `(x, y, 1)`;
//! see [`cggeom::Matrix3ProjExt`]. All near-zero tests use [`PRECISION`].
pub mod bounds;
pub mod clip;
pub mod composite;
pub mod config;
pub mod layered;
pub mod quad;
pub mod resolution;
pub mod sampler;
pub mod surface;
pub mod task;
pub mod xform;

pub use self::{
    bounds::{transform_bounds, Bounds},
    config::WarpConfig,
    layered::{transform_bounds_layered, Layer},
    sampler::Interpolation,
    surface::{Color, Surface},
    xform::Transformation,
};

use cggeom::{Box2, Tolerance};

/// The scalar type.
pub type Real = f64;
pub type Vector = cgmath::Vector2<Real>;
pub type Vector3 = cgmath::Vector3<Real>;
pub type Point = cgmath::Point2<Real>;
pub type Matrix = cgmath::Matrix3<Real>;
pub type Matrix2 = cgmath::Matrix2<Real>;
/// A rectangle in continuous coordinates.
pub type Rect = Box2<Real>;
/// A rectangle in pixel coordinates.
pub type RectInt = Box2<i32>;

/// The precision epsilon shared by every approximate comparison, including
/// the location of the horizon.
pub const PRECISION: Real = <Real as Tolerance>::PRECISION;
