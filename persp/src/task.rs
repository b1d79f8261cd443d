//! Render tasks and the arena that owns them for one render pass.
//!
//! A perspective task doesn't render its source once. [`TaskArena::configure`]
//! splits it into bands with [`transform_bounds_layered`], and clones the
//! source task once for each band, sized to the band's resolution.
//! [`TaskArena::run`] renders those clones, and then composites them into the
//! perspective task's surface.
use cggeom::{prelude::*, Box2};
use cgmath::{prelude::*, Vector2};
use itertools::izip;
use quick_error::quick_error;
use rayon::prelude::*;
use std::{fmt, sync::RwLock};

use super::{
    bounds::{make_discrete_bounds, Bounds},
    composite::{copy_rect, Compositor},
    config::WarpConfig,
    layered::{transform_bounds_layered, Layer},
    sampler::Interpolation,
    surface::{Color, Surface, TRANSPARENT},
    xform::Transformation,
    Matrix, Point, Real, Rect, RectInt, Vector,
};

/// Identifies a task in a [`TaskArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

quick_error! {
    #[derive(Debug, Clone, PartialEq)]
    pub enum TaskError {
        /// The task's surface is being used elsewhere.
        Locked(id: TaskId) {
            display("the surface of {:?} is not available", id)
        }
        WrongKind(id: TaskId) {
            display("{:?} is not a perspective task", id)
        }
        NotConfigured(id: TaskId) {
            display("{:?} must be configured before running", id)
        }
    }
}

/// The region a task renders: `source_rect` (in units) is mapped onto
/// `target_rect` (in pixels) of a surface of `surface_size` pixels.
///
/// Pixel `(x, y)` samples the point
/// `source_rect.min + (p - target_rect.min) · units_per_pixel`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskCoords {
    pub source_rect: Rect,
    pub target_rect: RectInt,
    pub surface_size: Vector2<i32>,
}

impl Default for TaskCoords {
    fn default() -> Self {
        Self {
            source_rect: Rect::zero(),
            target_rect: RectInt::zero(),
            surface_size: Vector2::new(0, 0),
        }
    }
}

impl TaskCoords {
    pub fn new(source_rect: Rect, size: Vector2<i32>) -> Self {
        let mut this = Self::default();
        this.set_coords(source_rect, size);
        this
    }

    pub fn is_valid(&self) -> bool {
        self.source_rect.is_valid() && !self.target_rect.is_empty()
    }

    /// Map `source_rect` onto a whole surface of `size` pixels.
    pub fn set_coords(&mut self, source_rect: Rect, size: Vector2<i32>) {
        self.source_rect = source_rect;
        self.target_rect = RectInt::new(Point2i::new(0, 0), Point2i::new(size.x, size.y));
        self.surface_size = size;
    }

    /// Returns zero for an invalid task.
    pub fn pixels_per_unit(&self) -> Vector {
        if !self.is_valid() {
            return Vector::zero();
        }
        let size = self.source_rect.size();
        let pixels = self.target_rect.size();
        Vector::new(pixels.x as Real / size.x, pixels.y as Real / size.y)
    }

    /// Returns zero for an invalid task.
    pub fn units_per_pixel(&self) -> Vector {
        if !self.is_valid() {
            return Vector::zero();
        }
        let size = self.source_rect.size();
        let pixels = self.target_rect.size();
        Vector::new(size.x / pixels.x as Real, size.y / pixels.y as Real)
    }

    /// Maps pixels to units.
    pub fn from_pixels_matrix(&self) -> Matrix {
        let upp = self.units_per_pixel();
        Matrix::from_translation(self.source_rect.min.to_vec())
            * Matrix::from_nonuniform_scale_2d(upp.x, upp.y)
            * Matrix::from_translation(-target_min(&self.target_rect))
    }

    /// Maps units to pixels.
    pub fn to_pixels_matrix(&self) -> Matrix {
        let ppu = self.pixels_per_unit();
        Matrix::from_translation(target_min(&self.target_rect))
            * Matrix::from_nonuniform_scale_2d(ppu.x, ppu.y)
            * Matrix::from_translation(-self.source_rect.min.to_vec())
    }

    pub fn pixel_to_unit(&self, x: i32, y: i32) -> Point {
        let upp = self.units_per_pixel();
        let Rect { min, .. } = self.source_rect;
        Point::new(
            min.x + (x - self.target_rect.min.x) as Real * upp.x,
            min.y + (y - self.target_rect.min.y) as Real * upp.y,
        )
    }

    /// Shrink the task to the part overlapping `rect`, rounded outwards to
    /// whole pixels. The pixel grid doesn't move.
    pub fn trunc_source_rect(&mut self, rect: &Rect) {
        let sr = self.source_rect.clip(rect);
        if !sr.is_valid() || !self.is_valid() {
            self.trunc_to_zero();
            return;
        }

        let ppu = self.pixels_per_unit();
        let origin = self.source_rect.min;
        let tmin = self.target_rect.min;
        let to_pixel = |v: Real, o: Real, k: Real| (v - o) * k;

        let tr = RectInt::new(
            Point2i::new(
                to_pixel(sr.min.x, origin.x, ppu.x).approx_floor() as i32 + tmin.x,
                to_pixel(sr.min.y, origin.y, ppu.y).approx_floor() as i32 + tmin.y,
            ),
            Point2i::new(
                to_pixel(sr.max.x, origin.x, ppu.x).approx_ceil() as i32 + tmin.x,
                to_pixel(sr.max.y, origin.y, ppu.y).approx_ceil() as i32 + tmin.y,
            ),
        );
        let tr = match tr.intersection(&self.target_rect) {
            Some(tr) => tr,
            None => {
                self.trunc_to_zero();
                return;
            }
        };

        self.source_rect = Rect::new(self.pixel_to_unit(tr.min.x, tr.min.y), self.pixel_to_unit(tr.max.x, tr.max.y));
        self.target_rect = tr;
    }

    /// Make the task render nothing.
    pub fn trunc_to_zero(&mut self) {
        self.source_rect = Rect::zero();
        self.target_rect = RectInt::zero();
    }
}

type Point2i = cgmath::Point2<i32>;

fn target_min(rect: &RectInt) -> Vector {
    Vector::new(rect.min.x as Real, rect.min.y as Real)
}

/// Something that renders an image given the region to render.
pub trait SourceTask: Send + Sync + fmt::Debug {
    /// Render `coords.source_rect` into `coords.target_rect` of `surface`,
    /// which is `coords.surface_size` pixels large and initially transparent.
    fn render(&self, coords: &TaskCoords, surface: &mut Surface);

    /// Clone the task for rendering another region.
    fn clone_task(&self) -> Box<dyn SourceTask>;
}

/// Renders a function of the position.
#[derive(Clone)]
pub struct FnSource<F> {
    func: F,
}

impl<F> FnSource<F>
where
    F: Fn(Point) -> Color + Clone + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FnSource").finish()
    }
}

impl<F> SourceTask for FnSource<F>
where
    F: Fn(Point) -> Color + Clone + Send + Sync + 'static,
{
    fn render(&self, coords: &TaskCoords, surface: &mut Surface) {
        let rect = match clamp_to_surface(&coords.target_rect, surface) {
            Some(rect) => rect,
            None => return,
        };
        for y in rect.min.y..rect.max.y {
            for x in rect.min.x..rect.max.x {
                let p = coords.pixel_to_unit(x as i32, y as i32);
                *surface.get_mut(x, y) = (self.func)(p);
            }
        }
    }

    fn clone_task(&self) -> Box<dyn SourceTask> {
        Box::new(self.clone())
    }
}

/// The part of `rect` inside `surface`.
pub fn clamp_to_surface(rect: &RectInt, surface: &Surface) -> Option<Box2<usize>> {
    let bounds = RectInt::new(
        Point2i::new(0, 0),
        Point2i::new(surface.width() as i32, surface.height() as i32),
    );
    rect.intersection(&bounds)?.cast()
}

/// The perspective task's own state.
#[derive(Debug, Clone)]
pub struct TaskPerspective {
    /// Maps the source space to the destination space.
    pub transformation: Transformation,
    pub sub_task: Option<TaskId>,
    pub interpolation: Interpolation,
    /// Multiplies the opacity of the result.
    pub amount: f32,
    /// Extra resolution of the sub-tasks, per axis.
    pub supersample: Vector,
    layers: Vec<Layer>,
    /// Parallel to `layers`.
    sub_tasks: Vec<TaskId>,
    pass_through: Option<TaskId>,
    configured: bool,
}

impl TaskPerspective {
    pub fn new(transformation: Transformation, sub_task: Option<TaskId>) -> Self {
        Self {
            transformation,
            sub_task,
            interpolation: Interpolation::default(),
            amount: 1.0,
            supersample: Vector::new(1.0, 1.0),
            layers: Vec::new(),
            sub_tasks: Vec::new(),
            pass_through: None,
            configured: false,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn sub_tasks(&self) -> &[TaskId] {
        &self.sub_tasks
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Maps the destination space to the source space. Returns `None` if the
    /// transformation is singular.
    fn back_matrix(&self) -> Option<Matrix> {
        let forward = self.transformation.matrix().normalized_by_det();
        if forward.is_invertible_2d() {
            Some(forward.inverted().normalized_by_det())
        } else {
            None
        }
    }

    /// The identity with full opacity renders the sub-task unchanged.
    fn is_pass_through(&self) -> bool {
        self.transformation.is_identity()
            && self.amount == 1.0
            && self.supersample == Vector::new(1.0, 1.0)
    }
}

#[derive(Debug)]
enum TaskKind {
    Source(Box<dyn SourceTask>),
    Perspective(TaskPerspective),
}

#[derive(Debug)]
struct Node {
    kind: TaskKind,
    coords: TaskCoords,
    surface: RwLock<Surface>,
}

/// Owns the tasks of a render pass.
#[derive(Debug)]
pub struct TaskArena {
    config: WarpConfig,
    nodes: Vec<Node>,
}

impl Default for TaskArena {
    fn default() -> Self {
        Self::new(WarpConfig::default())
    }
}

impl TaskArena {
    pub fn new(config: WarpConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
        }
    }

    pub fn config(&self) -> &WarpConfig {
        &self.config
    }

    fn push(&mut self, kind: TaskKind, coords: TaskCoords) -> TaskId {
        let id = TaskId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            coords,
            surface: RwLock::new(Surface::default()),
        });
        id
    }

    pub fn add_source(&mut self, task: impl SourceTask + 'static) -> TaskId {
        self.push(TaskKind::Source(Box::new(task)), TaskCoords::default())
    }

    pub fn add_perspective(&mut self, task: TaskPerspective) -> TaskId {
        self.push(TaskKind::Perspective(task), TaskCoords::default())
    }

    pub fn coords(&self, id: TaskId) -> &TaskCoords {
        &self.nodes[id.0].coords
    }

    pub fn set_coords(&mut self, id: TaskId, source_rect: Rect, size: Vector2<i32>) {
        self.nodes[id.0].coords.set_coords(source_rect, size);
    }

    pub fn perspective(&self, id: TaskId) -> Result<&TaskPerspective, TaskError> {
        match &self.nodes[id.0].kind {
            TaskKind::Perspective(p) => Ok(p),
            TaskKind::Source(_) => Err(TaskError::WrongKind(id)),
        }
    }

    pub fn perspective_mut(&mut self, id: TaskId) -> Result<&mut TaskPerspective, TaskError> {
        match &mut self.nodes[id.0].kind {
            TaskKind::Perspective(p) => Ok(p),
            TaskKind::Source(_) => Err(TaskError::WrongKind(id)),
        }
    }

    /// Lock the surface of a task for reading.
    pub fn surface(&self, id: TaskId) -> Result<std::sync::RwLockReadGuard<'_, Surface>, TaskError> {
        self.nodes[id.0]
            .surface
            .try_read()
            .map_err(|_| TaskError::Locked(id))
    }

    /// Clone `id` and, for a perspective task, its sub-task.
    fn clone_recursive(&mut self, id: TaskId) -> TaskId {
        let coords = self.nodes[id.0].coords;
        let kind = match &self.nodes[id.0].kind {
            TaskKind::Source(task) => TaskKind::Source(task.clone_task()),
            TaskKind::Perspective(p) => {
                let mut p = TaskPerspective {
                    layers: Vec::new(),
                    sub_tasks: Vec::new(),
                    pass_through: None,
                    configured: false,
                    ..p.clone()
                };
                let sub_task = p.sub_task;
                p.sub_task = sub_task.map(|sub| self.clone_recursive(sub));
                TaskKind::Perspective(p)
            }
        };
        self.push(kind, coords)
    }

    /// Fold unconfigured perspective sub-tasks into `id`.
    fn merge_nested(&mut self, id: TaskId) -> Result<(), TaskError> {
        loop {
            let sub = match self.perspective(id)?.sub_task {
                Some(sub) => sub,
                None => return Ok(()),
            };
            let (inner_xform, inner_sub) = match &self.nodes[sub.0].kind {
                TaskKind::Perspective(p) if !p.configured => (p.transformation, p.sub_task),
                _ => return Ok(()),
            };
            let outer = self.perspective_mut(id)?;
            outer.transformation = Transformation::merge(&outer.transformation, &inner_xform);
            outer.sub_task = inner_sub;
            log::trace!("merged {:?} into {:?}", sub, id);
        }
    }

    /// Split a perspective task into bands and create a sub-task for each
    /// of them. The task's coordinates are shrunk to what the bands cover.
    ///
    /// A task is configured once. Build a new arena for every render.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `id` has already been configured.
    pub fn configure(&mut self, id: TaskId) -> Result<(), TaskError> {
        // The sub-task clones made by an earlier call are never reclaimed
        debug_assert!(
            !self.perspective(id).map(|p| p.configured).unwrap_or(false),
            "{:?} is already configured",
            id
        );
        self.merge_nested(id)?;

        let coords = self.nodes[id.0].coords;
        let persp = self.perspective(id)?.clone();

        let mut layers = Vec::new();
        let mut sub_tasks = Vec::new();
        let mut pass_through = None;
        let mut new_coords = coords;

        match persp.sub_task {
            Some(sub) if persp.is_pass_through() && coords.is_valid() => {
                let t = self.clone_recursive(sub);
                self.nodes[t.0].coords = coords;
                self.configure_if_perspective(t)?;
                pass_through = Some(t);
            }
            Some(sub)
                if coords.is_valid()
                    && persp.supersample.x.approx_gt(0.0)
                    && persp.supersample.y.approx_gt(0.0) =>
            {
                let ppu = coords.pixels_per_unit();
                let bounds = Bounds::new(
                    coords.source_rect,
                    Vector::new(ppu.x * persp.supersample.x, ppu.y * persp.supersample.y),
                );
                let new_layers = match persp.back_matrix() {
                    Some(back) => transform_bounds_layered(&back, &bounds, self.config.step),
                    None => Vec::new(),
                };

                let mut sum_rect = Rect::zero();
                for layer in new_layers {
                    let discrete = make_discrete_bounds(&layer.bounds, self.config.max_surface_size);
                    if !discrete.is_valid() {
                        continue;
                    }
                    let t = self.clone_recursive(sub);
                    self.set_coords(t, discrete.rect, discrete.size);
                    self.configure_if_perspective(t)?;

                    sum_rect = sum_rect.join(&layer.source_rect);
                    layers.push(layer);
                    sub_tasks.push(t);
                }

                new_coords.trunc_source_rect(&sum_rect);
                if sub_tasks.is_empty() {
                    new_coords.trunc_to_zero();
                }
            }
            _ => new_coords.trunc_to_zero(),
        }

        log::debug!(
            "configured {:?}: {} band(s), target {:?}",
            id,
            layers.len(),
            new_coords.target_rect
        );

        self.nodes[id.0].coords = new_coords;
        let p = self.perspective_mut(id)?;
        p.layers = layers;
        p.sub_tasks = sub_tasks;
        p.pass_through = pass_through;
        p.configured = true;
        Ok(())
    }

    fn configure_if_perspective(&mut self, id: TaskId) -> Result<(), TaskError> {
        if let TaskKind::Perspective(_) = self.nodes[id.0].kind {
            self.configure(id)
        } else {
            Ok(())
        }
    }

    /// Render a task. A perspective task renders its sub-tasks first.
    pub fn run(&self, id: TaskId) -> Result<(), TaskError> {
        let node = &self.nodes[id.0];
        match &node.kind {
            TaskKind::Source(task) => {
                let mut surface = self.prepare_surface(id)?;
                if node.coords.is_valid() {
                    task.render(&node.coords, &mut surface);
                }
                Ok(())
            }
            TaskKind::Perspective(p) => self.run_perspective(id, p),
        }
    }

    fn prepare_surface(
        &self,
        id: TaskId,
    ) -> Result<std::sync::RwLockWriteGuard<'_, Surface>, TaskError> {
        let node = &self.nodes[id.0];
        let mut surface = node.surface.try_write().map_err(|_| TaskError::Locked(id))?;
        let size = node.coords.surface_size;
        let (w, h) = (size.x.max(0) as usize, size.y.max(0) as usize);
        if surface.width() == w && surface.height() == h {
            surface.fill(TRANSPARENT);
        } else {
            *surface = Surface::new(w, h);
        }
        Ok(surface)
    }

    fn run_sub_task(&self, id: TaskId) {
        if let Err(e) = self.run(id) {
            log::warn!("sub-task {:?} failed: {}", id, e);
        }
    }

    fn run_perspective(&self, id: TaskId, p: &TaskPerspective) -> Result<(), TaskError> {
        if !p.configured {
            return Err(TaskError::NotConfigured(id));
        }

        let all_sub_tasks = p.sub_tasks.iter().chain(p.pass_through.iter());
        if self.config.parallel {
            all_sub_tasks
                .collect::<Vec<_>>()
                .par_iter()
                .for_each(|&&t| self.run_sub_task(t));
        } else {
            all_sub_tasks.for_each(|&t| self.run_sub_task(t));
        }

        let coords = &self.nodes[id.0].coords;
        let mut dst = self.prepare_surface(id)?;

        if let Some(t) = p.pass_through {
            match self.nodes[t.0].surface.try_read() {
                Ok(src) => copy_rect(&mut dst, &coords.target_rect, &src, &self.nodes[t.0].coords.target_rect),
                Err(_) => log::warn!("skipping {:?}: its surface is not available", t),
            }
            return Ok(());
        }

        let back_matrix = match p.back_matrix() {
            Some(m) => m,
            None => return Ok(()),
        };

        let mut compositor = match Compositor::new(
            &mut dst,
            coords,
            &back_matrix,
            p.interpolation,
            p.amount,
            self.config.parallel,
        ) {
            Some(c) => c,
            None => return Ok(()),
        };

        for (layer, &t) in izip!(&p.layers, &p.sub_tasks) {
            let sub = &self.nodes[t.0];
            match sub.surface.try_read() {
                Ok(src) => compositor.add_layer(layer, &sub.coords, &src),
                Err(_) => log::warn!("skipping {:?}: its surface is not available", t),
            }
        }
        compositor.finish();

        Ok(())
    }
}
