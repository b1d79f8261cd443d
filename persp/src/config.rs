//! Render-pass settings.
use super::Real;

/// The largest edge of a sub-task surface, in pixels.
pub const DEFAULT_MAX_SURFACE_SIZE: i32 = 16384;

/// The settings shared by every perspective task in a
/// [`TaskArena`](crate::task::TaskArena).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpConfig {
    /// The depth ratio between adjacent bands. Values below
    /// [`MIN_STEP`](crate::layered::MIN_STEP) are raised to it.
    pub step: Real,
    /// Sub-task surfaces are clamped to this size on each axis. A band
    /// needing more pixels is rendered at a lower resolution.
    pub max_surface_size: i32,
    /// Render the sub-tasks of a perspective task in parallel.
    pub parallel: bool,
}

impl WarpConfig {
    pub const fn default() -> Self {
        Self {
            step: 2.0,
            max_surface_size: DEFAULT_MAX_SURFACE_SIZE,
            parallel: true,
        }
    }

    pub fn with_step(self, step: Real) -> Self {
        Self { step, ..self }
    }

    pub fn with_max_surface_size(self, max_surface_size: i32) -> Self {
        Self {
            max_surface_size,
            ..self
        }
    }

    pub fn with_parallel(self, parallel: bool) -> Self {
        Self { parallel, ..self }
    }
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self::default()
    }
}
