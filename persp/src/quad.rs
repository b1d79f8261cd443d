//! Perspective mapping specified by a source rectangle and the four corners
//! it is mapped to.
use cggeom::prelude::*;
use cgmath::prelude::*;
use quick_error::quick_error;

use super::{
    bounds::{transform_bounds, Bounds},
    sampler::Interpolation,
    surface::Surface,
    task::{clamp_to_surface, SourceTask, TaskArena, TaskCoords, TaskId, TaskPerspective},
    xform::Transformation,
    Matrix, Point, Real, Rect, Vector, PRECISION,
};

quick_error! {
    #[derive(Debug, Clone, PartialEq)]
    pub enum PerspectiveError {
        DegenerateSource {
            display("the source rectangle has no area")
        }
        Singular {
            display("the destination corners don't form a quadrilateral")
        }
        InvalidClip {
            display("the clip rectangle is invalid")
        }
    }
}

/// The parameters of a perspective mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveParams {
    /// The top-left corner of the source rectangle.
    pub src_tl: Point,
    /// The bottom-right corner of the source rectangle.
    pub src_br: Point,
    pub dest_tl: Point,
    pub dest_tr: Point,
    pub dest_bl: Point,
    pub dest_br: Point,
    /// Discard everything outside the source rectangle.
    pub clip: bool,
    pub interpolation: Interpolation,
}

impl PerspectiveParams {
    pub const fn default() -> Self {
        Self {
            src_tl: Point::new(-2.0, 2.0),
            src_br: Point::new(2.0, -2.0),
            dest_tl: Point::new(-1.8, 2.1),
            dest_tr: Point::new(1.8, 2.1),
            dest_bl: Point::new(-2.2, -2.0),
            dest_br: Point::new(2.2, -2.0),
            clip: true,
            interpolation: Interpolation::Cubic,
        }
    }
}

impl Default for PerspectiveParams {
    fn default() -> Self {
        Self::default()
    }
}

/// Construct the matrix mapping `(0, 0)`, `(1, 0)`, `(0, 1)`, `(1, 1)` to
/// `p0`, `px`, `py`, `p1`, respectively.
///
/// The w row is normalized to unit length with a non-negative constant term.
pub fn make_matrix(p0: Point, px: Point, py: Point, p1: Point) -> Matrix {
    let a = px - p1;
    let b = py - p1;
    let c = (p0.to_vec() + p1.to_vec()) - (px.to_vec() + py.to_vec());

    let mut cw = a.y * b.x - a.x * b.y;
    let mut aw = b.x * c.y - b.y * c.x;
    let mut bw = a.y * c.x - a.x * c.y;

    let k = aw * aw + bw * bw + cw * cw;
    let mut k = if k > PRECISION * PRECISION {
        1.0 / k.sqrt()
    } else {
        1.0
    };
    if cw < 0.0 {
        k = -k;
    }
    aw *= k;
    bw *= k;
    cw *= k;

    let col_z = p0.to_vec() * cw;
    let col_x = px.to_vec() * (cw + aw) - col_z;
    let col_y = py.to_vec() * (cw + bw) - col_z;

    #[cfg_attr(rustfmt, rustfmt_skip)]
    let m = Matrix::new(
        col_x.x, col_x.y, aw,
        col_y.x, col_y.y, bw,
        col_z.x, col_z.y, cw,
    );
    m
}

/// A validated perspective mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perspective {
    params: PerspectiveParams,
    matrix: Matrix,
    back_matrix: Matrix,
    clip_rect: Rect,
    affine: bool,
}

impl Perspective {
    pub fn new(params: PerspectiveParams) -> Result<Self, PerspectiveError> {
        let src_size = params.src_br - params.src_tl;
        if src_size.x.approx_zero() || src_size.y.approx_zero() {
            return Err(PerspectiveError::DegenerateSource);
        }

        let matrix = make_matrix(params.dest_tl, params.dest_tr, params.dest_bl, params.dest_br)
            * Matrix::from_nonuniform_scale_2d(1.0 / src_size.x, 1.0 / src_size.y)
            * Matrix::from_translation(-params.src_tl.to_vec());
        if !matrix.is_invertible_2d() {
            return Err(PerspectiveError::Singular);
        }

        let clip_rect = Rect::from_corners(params.src_tl, params.src_br);
        if params.clip && !clip_rect.is_valid() && !clip_rect.is_nan_or_inf() {
            return Err(PerspectiveError::InvalidClip);
        }

        Ok(Self {
            params,
            matrix,
            back_matrix: matrix.normalized_by_det().inverted().normalized_by_det(),
            clip_rect,
            affine: matrix.x.z.approx_zero() && matrix.y.z.approx_zero(),
        })
    }

    pub fn params(&self) -> &PerspectiveParams {
        &self.params
    }

    /// Maps the source space to the destination space.
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn back_matrix(&self) -> &Matrix {
        &self.back_matrix
    }

    pub fn clip_rect(&self) -> &Rect {
        &self.clip_rect
    }

    /// Check if the mapping has no perspective.
    pub fn is_affine(&self) -> bool {
        self.affine
    }

    pub fn transformation(&self) -> Transformation {
        Transformation::from_matrix(self.matrix)
    }

    /// Map a source point to the destination. Returns `None` if it lands at
    /// or behind the horizon.
    pub fn transform(&self, p: Point) -> Option<Point> {
        self.matrix.project_point(p)
    }

    pub fn back_transform(&self, p: Point) -> Option<Point> {
        self.back_matrix.project_point(p)
    }

    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        transform_bounds(&self.matrix, &unit_bounds(rect)).rect
    }

    pub fn back_transform_rect(&self, rect: &Rect) -> Rect {
        transform_bounds(&self.back_matrix, &unit_bounds(rect)).rect
    }

    /// Find the source point displayed at the destination point `p`.
    /// Returns `None` if nothing is displayed there.
    pub fn hit(&self, p: Point) -> Option<Point> {
        let pp = self.back_transform(p)?;
        if self.params.clip && !self.clip_rect.is_inside(&pp) {
            None
        } else {
            Some(pp)
        }
    }

    /// Add a perspective task rendering `source` through this mapping.
    /// The caller assigns the coordinates and configures the task.
    pub fn build_task(&self, arena: &mut TaskArena, source: impl SourceTask + 'static) -> TaskId {
        let sub_task = if self.params.clip {
            arena.add_source(ClippedSource::new(
                Box::new(source),
                self.clip_rect,
                self.params.interpolation != Interpolation::Nearest,
            ))
        } else {
            arena.add_source(source)
        };

        let mut task = TaskPerspective::new(self.transformation(), Some(sub_task));
        task.interpolation = self.params.interpolation;
        arena.add_perspective(task)
    }
}

fn unit_bounds(rect: &Rect) -> Bounds {
    Bounds::new(*rect, Vector::new(1.0, 1.0))
}

/// Makes the output of another source transparent outside a rectangle.
#[derive(Debug)]
pub struct ClippedSource {
    inner: Box<dyn SourceTask>,
    rect: Rect,
    /// Use the area coverage of each pixel instead of a point test.
    antialias: bool,
}

impl ClippedSource {
    pub fn new(inner: Box<dyn SourceTask>, rect: Rect, antialias: bool) -> Self {
        Self {
            inner,
            rect,
            antialias,
        }
    }

    /// The portion of the pixel at `p` (`size` units large) inside the
    /// rectangle.
    fn coverage(&self, p: Point, size: Vector) -> Real {
        let Rect { min, max } = self.rect;
        if !self.antialias || size.x <= 0.0 || size.y <= 0.0 {
            return if self.rect.is_inside(&p) { 1.0 } else { 0.0 };
        }
        let overlap = |c: Real, size: Real, lo: Real, hi: Real| {
            let half = size * 0.5;
            ((c + half).min(hi) - (c - half).max(lo)).max(0.0) / size
        };
        overlap(p.x, size.x, min.x, max.x) * overlap(p.y, size.y, min.y, max.y)
    }
}

impl SourceTask for ClippedSource {
    fn render(&self, coords: &TaskCoords, surface: &mut Surface) {
        self.inner.render(coords, surface);

        let rect = match clamp_to_surface(&coords.target_rect, surface) {
            Some(rect) => rect,
            None => return,
        };
        let upp = coords.units_per_pixel();
        for y in rect.min.y..rect.max.y {
            for x in rect.min.x..rect.max.x {
                let k = self.coverage(coords.pixel_to_unit(x as i32, y as i32), upp);
                if k < 1.0 {
                    surface.get_mut(x, y).a *= k as f32;
                }
            }
        }
    }

    fn clone_task(&self) -> Box<dyn SourceTask> {
        Box::new(Self {
            inner: self.inner.clone_task(),
            ..*self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{surface::Color, task::FnSource};
    use cggeom::box2;
    use cgmath::Vector2;
    use rgb::RGBA;

    fn assert_close(p1: Point, p2: Point) {
        assert!((p1 - p2).magnitude() < 1e-9, "{:?} != {:?}", p1, p2);
    }

    #[test]
    fn corners_are_mapped() {
        let params = PerspectiveParams::default();
        let persp = Perspective::new(params).unwrap();
        assert!(!persp.is_affine());

        let PerspectiveParams { src_tl, src_br, .. } = params;
        assert_close(persp.transform(src_tl).unwrap(), params.dest_tl);
        assert_close(persp.transform(Point::new(src_br.x, src_tl.y)).unwrap(), params.dest_tr);
        assert_close(persp.transform(Point::new(src_tl.x, src_br.y)).unwrap(), params.dest_bl);
        assert_close(persp.transform(src_br).unwrap(), params.dest_br);
    }

    #[test]
    fn unit_square_matrix_is_normalized() {
        let m = make_matrix(
            Point::new(0.0, 0.0),
            Point::new(3.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(2.0, 1.0),
        );
        assert!((m.w_row().magnitude() - 1.0).abs() < 1e-12);
        assert!(m.z.z > 0.0);
        assert_close(m.project_point(Point::new(1.0, 1.0)).unwrap(), Point::new(2.0, 1.0));
    }

    #[test]
    fn round_trip() {
        let persp = Perspective::new(PerspectiveParams::default()).unwrap();
        for &(x, y) in &[(0.0, 0.0), (1.5, -0.5), (-1.9, 1.9)] {
            let p = Point::new(x, y);
            let back = persp.back_transform(persp.transform(p).unwrap()).unwrap();
            assert_close(back, p);
        }
    }

    #[test]
    fn parallelogram_is_affine() {
        let persp = Perspective::new(PerspectiveParams {
            dest_tl: Point::new(0.0, 1.0),
            dest_tr: Point::new(2.0, 1.0),
            dest_bl: Point::new(1.0, 0.0),
            dest_br: Point::new(3.0, 0.0),
            ..PerspectiveParams::default()
        })
        .unwrap();
        assert!(persp.is_affine());
        assert!(matches!(persp.transformation(), Transformation::Affine(_)));
    }

    #[test]
    fn invalid_params() {
        let degenerate = PerspectiveParams {
            src_br: Point::new(2.0, 2.0),
            ..PerspectiveParams::default()
        };
        assert_eq!(Perspective::new(degenerate), Err(PerspectiveError::DegenerateSource));

        let collinear = PerspectiveParams {
            dest_tl: Point::new(0.0, 0.0),
            dest_tr: Point::new(1.0, 0.0),
            dest_bl: Point::new(2.0, 0.0),
            dest_br: Point::new(3.0, 0.0),
            ..PerspectiveParams::default()
        };
        assert_eq!(Perspective::new(collinear), Err(PerspectiveError::Singular));
    }

    #[test]
    fn transform_rect_covers_the_quad() {
        let params = PerspectiveParams::default();
        let persp = Perspective::new(params).unwrap();
        let rect = persp.transform_rect(&Rect::from_corners(params.src_tl, params.src_br));
        assert!((rect.min.x + 2.2).abs() < 1e-9);
        assert!((rect.max.x - 2.2).abs() < 1e-9);
        assert!((rect.min.y + 2.0).abs() < 1e-9);
        assert!((rect.max.y - 2.1).abs() < 1e-9);

        let back = persp.back_transform_rect(&rect);
        assert!(back.is_inside(&params.src_tl) && back.is_inside(&params.src_br));
    }

    #[test]
    fn hit_respects_clip() {
        let persp = Perspective::new(PerspectiveParams::default()).unwrap();
        assert!(persp.hit(Point::new(0.0, 0.0)).is_some());
        assert_eq!(persp.hit(Point::new(0.0, 2.5)), None);

        let unclipped = Perspective::new(PerspectiveParams {
            clip: false,
            ..PerspectiveParams::default()
        })
        .unwrap();
        assert!(unclipped.hit(Point::new(0.0, 2.5)).is_some());
    }

    fn white() -> FnSource<impl Fn(Point) -> Color + Clone + Send + Sync + 'static> {
        FnSource::new(|_| RGBA::new(1.0, 1.0, 1.0, 1.0))
    }

    fn render_clipped(antialias: bool) -> Surface {
        let clipped = ClippedSource::new(
            Box::new(white()),
            box2! { min: [0.5, -10.0], max: [10.0, 10.0] },
            antialias,
        );
        let coords = TaskCoords::new(box2! { min: [0.0, 0.0], max: [4.0, 1.0] }, Vector2::new(4, 1));
        let mut surface = Surface::new(4, 1);
        clipped.render(&coords, &mut surface);
        surface
    }

    #[test]
    fn clip_with_coverage() {
        let s = render_clipped(true);
        // Pixel 0 covers `-0.5..0.5`
        assert_eq!(s.get(0, 0).a, 0.0);
        assert_eq!(s.get(1, 0).a, 1.0);

        let clipped = ClippedSource::new(
            Box::new(white()),
            box2! { min: [0.25, -10.0], max: [10.0, 10.0] },
            true,
        );
        let coords = TaskCoords::new(box2! { min: [0.0, 0.0], max: [4.0, 1.0] }, Vector2::new(4, 1));
        let mut s = Surface::new(4, 1);
        clipped.render(&coords, &mut s);
        assert!((s.get(0, 0).a - 0.25).abs() < 1e-6, "{:?}", s.get(0, 0));
    }

    #[test]
    fn clip_without_antialiasing() {
        let s = render_clipped(false);
        assert_eq!(s.get(0, 0).a, 0.0);
        assert_eq!(s.get(1, 0).a, 1.0);
        assert_eq!(s.get(3, 0).a, 1.0);
    }

    #[test]
    fn build_task_wraps_the_source() {
        let mut arena = TaskArena::default();
        let persp = Perspective::new(PerspectiveParams::default()).unwrap();
        let id = persp.build_task(&mut arena, white());
        let task = arena.perspective(id).unwrap();
        assert_eq!(task.interpolation, Interpolation::Cubic);
        assert!(task.sub_task.is_some());
        assert!(!task.is_configured());
    }
}
