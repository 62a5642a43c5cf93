use crate::{
    bvh::{
        build::{BuildItem, Builder, LeafClass},
        ChildRef,
    },
    error::SceneError,
    primitives::{
        curve::CurveSegment, motion_step, point, triangle, ObjectTransform, PrimitiveType,
        Transform, AABB,
    },
    ray::{Visibility, OBJECT_NONE},
    scene::{KeyTable, ObjectRecord, SceneTables},
};
use glam::{Vec3, Vec4};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct BuildParams {
    pub max_leaf_size: usize,
    /// Number of equal shutter slices moving primitives are split into, each with
    /// its own bounds and time window.
    pub time_segments: u32,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            max_leaf_size: 4,
            time_segments: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u32);

/// Primitive data of one geometry. Motion variants hold one key per time step,
/// each key with the same number of primitives.
#[derive(Clone, Debug)]
pub enum Shape {
    Triangles(Vec<[Vec3; 3]>),
    MotionTriangles(Vec<Vec<[Vec3; 3]>>),
    Curves {
        segments: Vec<CurveSegment>,
        ribbon: bool,
    },
    MotionCurves {
        keys: Vec<Vec<CurveSegment>>,
        ribbon: bool,
    },
    Points(Vec<Vec4>),
    MotionPoints(Vec<Vec<Vec4>>),
}

#[derive(Clone, Debug)]
pub struct Geometry {
    pub shape: Shape,
    pub visibility: Visibility,
    /// Part of the shutter interval in which the geometry exists.
    pub valid_time: [f32; 2],
}

impl Geometry {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            visibility: Visibility::all(),
            valid_time: [0.0, 1.0],
        }
    }

    pub fn triangles(triangles: Vec<[Vec3; 3]>) -> Self {
        Self::new(Shape::Triangles(triangles))
    }

    pub fn motion_triangles(keys: Vec<Vec<[Vec3; 3]>>) -> Self {
        Self::new(Shape::MotionTriangles(keys))
    }

    pub fn curves(segments: Vec<CurveSegment>) -> Self {
        Self::new(Shape::Curves {
            segments,
            ribbon: false,
        })
    }

    pub fn ribbons(segments: Vec<CurveSegment>) -> Self {
        Self::new(Shape::Curves {
            segments,
            ribbon: true,
        })
    }

    pub fn motion_curves(keys: Vec<Vec<CurveSegment>>, ribbon: bool) -> Self {
        Self::new(Shape::MotionCurves { keys, ribbon })
    }

    pub fn points(points: Vec<Vec4>) -> Self {
        Self::new(Shape::Points(points))
    }

    pub fn motion_points(keys: Vec<Vec<Vec4>>) -> Self {
        Self::new(Shape::MotionPoints(keys))
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_valid_time(mut self, start: f32, end: f32) -> Self {
        self.valid_time = [start, end];
        self
    }

    /// Number of primitives, not counting motion keys.
    pub fn len(&self) -> usize {
        match &self.shape {
            Shape::Triangles(t) => t.len(),
            Shape::Curves { segments, .. } => segments.len(),
            Shape::Points(p) => p.len(),
            Shape::MotionTriangles(keys) => keys.first().map_or(0, Vec::len),
            Shape::MotionCurves { keys, .. } => keys.first().map_or(0, Vec::len),
            Shape::MotionPoints(keys) => keys.first().map_or(0, Vec::len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn has_full_window(&self) -> bool {
        self.valid_time == [0.0, 1.0]
    }
}

#[derive(Clone, Debug)]
pub enum Placement {
    /// Baked into the top level hierarchy as is.
    World,
    Instance(Transform),
    /// Transform keys spread evenly over the shutter interval.
    MotionInstance(Vec<Transform>),
}

/// Collects geometry and objects and flattens them into [`SceneTables`].
#[derive(Debug, Default)]
pub struct SceneBuilder {
    params: BuildParams,
    geometry: Vec<Geometry>,
    objects: Vec<(GeometryId, Placement)>,
}

// Table entries for one primitive address, written in leaf order once the
// hierarchy over them is known.
#[derive(Clone, Copy, Debug)]
struct Slot {
    prim_type: PrimitiveType,
    object: u32,
    index: u32,
    visibility: Visibility,
    time: [f32; 2],
}

// A built instanced hierarchy, shared by every object placing the geometry.
#[derive(Clone, Copy, Debug)]
struct SubTree {
    root: ChildRef,
    bounds: AABB,
    visibility: Visibility,
    depth: usize,
}

impl SceneBuilder {
    pub fn new(params: BuildParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryId {
        self.geometry.push(geometry);
        GeometryId(self.geometry.len() as u32 - 1)
    }

    pub fn add_object(&mut self, geometry: GeometryId, placement: Placement) -> ObjectId {
        self.objects.push((geometry, placement));
        ObjectId(self.objects.len() as u32 - 1)
    }

    pub fn geometry_count(&self) -> usize {
        self.geometry.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn build(&self) -> Result<SceneTables, SceneError> {
        if self.params.time_segments == 0 {
            return Err(SceneError::ZeroTimeSegments);
        }
        if self.params.max_leaf_size == 0 {
            return Err(SceneError::ZeroLeafSize);
        }
        for (index, geometry) in self.geometry.iter().enumerate() {
            validate_geometry(index as u32, geometry)?;
        }
        let transforms = self.validate_objects()?;

        let mut tables = SceneTables::default();
        let mut key_bases: Vec<Option<u32>> = vec![None; self.geometry.len()];
        let mut sub_trees: Vec<Option<Option<SubTree>>> = vec![None; self.geometry.len()];

        let mut top_items = Vec::new();
        let mut top_slots = Vec::new();

        for (object, ((geometry_id, _), transform)) in
            self.objects.iter().zip(transforms).enumerate()
        {
            let object = object as u32;
            let g = geometry_id.0 as usize;
            let geometry = &self.geometry[g];

            let base = *key_bases[g].get_or_insert_with(|| push_keys(&mut tables, geometry));

            let Some(transform) = transform else {
                self.emit(geometry, base, object, &mut top_items, &mut top_slots);
                tables.objects.push(ObjectRecord {
                    root: ChildRef::SENTINEL,
                    transform: None,
                });
                continue;
            };

            let sub = *sub_trees[g].get_or_insert_with(|| {
                self.build_sub_tree(geometry_id.0, geometry, base, &mut tables)
            });

            match sub {
                Some(sub) => {
                    top_items.push(BuildItem {
                        bounds: transform.bounds(sub.bounds),
                        class: LeafClass::Instance {
                            object,
                            depth: sub.depth,
                        },
                        visibility: sub.visibility,
                    });
                    tables.objects.push(ObjectRecord {
                        root: sub.root,
                        transform: Some(transform),
                    });
                }
                None => tables.objects.push(ObjectRecord {
                    root: ChildRef::SENTINEL,
                    transform: Some(transform),
                }),
            }
        }

        let prim_base = tables.prim_type.len() as u32;
        let top = Builder::new(&top_items, self.params.max_leaf_size).build(
            &mut tables.nodes,
            &mut tables.leaves,
            prim_base,
        );
        append_slots(&mut tables, top.order.iter().map(|&i| top_slots[i]));

        tables.root = top.root;
        tables.max_depth = top.depth;
        tables.bounds = top.bounds;
        tables.use_time_steps = tables.prim_time.iter().any(|&t| t != [0.0, 1.0]);

        info!(
            "Built scene: {} nodes, {} leaves, {} primitive slots, {} objects, depth {}",
            tables.nodes.len(),
            tables.leaves.len(),
            tables.prim_type.len(),
            tables.objects.len(),
            tables.max_depth
        );

        Ok(tables)
    }

    fn validate_objects(&self) -> Result<Vec<Option<ObjectTransform>>, SceneError> {
        self.objects
            .iter()
            .enumerate()
            .map(|(object, (geometry, placement))| {
                let object = object as u32;
                if geometry.0 as usize >= self.geometry.len() {
                    return Err(SceneError::UnknownGeometry {
                        object,
                        geometry: geometry.0,
                    });
                }

                match placement {
                    Placement::World => Ok(None),
                    Placement::Instance(tfm) => {
                        if !tfm.is_invertible() {
                            return Err(SceneError::SingularTransform { object });
                        }
                        Ok(Some(ObjectTransform::fixed(tfm)))
                    }
                    Placement::MotionInstance(keys) => {
                        if keys.is_empty() {
                            return Err(SceneError::EmptyMotion { object });
                        }
                        if !keys.iter().all(Transform::is_invertible) {
                            return Err(SceneError::SingularTransform { object });
                        }
                        Ok(Some(ObjectTransform::motion(keys.clone())))
                    }
                }
            })
            .collect()
    }

    fn build_sub_tree(
        &self,
        geometry_id: u32,
        geometry: &Geometry,
        base: u32,
        tables: &mut SceneTables,
    ) -> Option<SubTree> {
        let mut items = Vec::new();
        let mut slots = Vec::new();
        self.emit(geometry, base, OBJECT_NONE, &mut items, &mut slots);

        if items.is_empty() {
            warn!("Geometry {} is empty or never exists, skipping its instances", geometry_id);
            return None;
        }

        let prim_base = tables.prim_type.len() as u32;
        let tree = Builder::new(&items, self.params.max_leaf_size).build(
            &mut tables.nodes,
            &mut tables.leaves,
            prim_base,
        );
        append_slots(tables, tree.order.iter().map(|&i| slots[i]));

        debug!(
            "Built instanced geometry {}: {} primitive slots, depth {}",
            geometry_id,
            tree.order.len(),
            tree.depth
        );

        Some(SubTree {
            root: tree.root,
            bounds: tree.bounds,
            visibility: tree.visibility,
            depth: tree.depth,
        })
    }

    /// Build items and table slots for every primitive address of `geometry`.
    fn emit(
        &self,
        geometry: &Geometry,
        base: u32,
        object: u32,
        items: &mut Vec<BuildItem>,
        slots: &mut Vec<Slot>,
    ) {
        let mut out = Emitter {
            segments: self.params.time_segments,
            window: geometry.valid_time,
            visibility: geometry.visibility,
            promote: !geometry.has_full_window(),
            base,
            object,
            items,
            slots,
        };

        match &geometry.shape {
            Shape::Triangles(t) => out.emit(
                std::slice::from_ref(t),
                PrimitiveType::Triangle,
                triangle::bounds,
                triangle::lerp,
            ),
            Shape::MotionTriangles(keys) => out.emit(
                keys,
                PrimitiveType::MotionTriangle,
                triangle::bounds,
                triangle::lerp,
            ),
            Shape::Curves { segments, ribbon } => out.emit(
                std::slice::from_ref(segments),
                curve_type(*ribbon, false),
                CurveSegment::bounds,
                CurveSegment::lerp,
            ),
            Shape::MotionCurves { keys, ribbon } => out.emit(
                keys,
                curve_type(*ribbon, true),
                CurveSegment::bounds,
                CurveSegment::lerp,
            ),
            Shape::Points(p) => out.emit(
                std::slice::from_ref(p),
                PrimitiveType::Point,
                |p: &Vec4| point::bounds(*p),
                |a: &Vec4, b: &Vec4, t| a.lerp(*b, t),
            ),
            Shape::MotionPoints(keys) => out.emit(
                keys,
                PrimitiveType::MotionPoint,
                |p: &Vec4| point::bounds(*p),
                |a: &Vec4, b: &Vec4, t| a.lerp(*b, t),
            ),
        }
    }
}

struct Emitter<'a> {
    segments: u32,
    window: [f32; 2],
    visibility: Visibility,
    /// Static geometry living in part of the shutter is tagged as moving so the
    /// traversal culls it by time.
    promote: bool,
    base: u32,
    object: u32,
    items: &'a mut Vec<BuildItem>,
    slots: &'a mut Vec<Slot>,
}

impl Emitter<'_> {
    fn emit<T: Copy>(
        &mut self,
        keys: &[Vec<T>],
        prim_type: PrimitiveType,
        bounds: impl Fn(&T) -> AABB,
        lerp: impl Fn(&T, &T, f32) -> T,
    ) {
        let steps = keys.len();
        let prim_type = if self.promote {
            motion_type(prim_type)
        } else {
            prim_type
        };
        let segments = if steps > 1 { self.segments } else { 1 };
        let [w0, w1] = self.window;

        let Some(first) = keys.first() else {
            return;
        };

        for prim in 0..first.len() {
            let key_at = |time: f32| {
                let (step, frac) = motion_step(steps as u32, time);
                let (step, next) = (step as usize, (step as usize + 1).min(steps - 1));
                lerp(&keys[step][prim], &keys[next][prim], frac)
            };

            for segment in 0..segments {
                let start = (segment as f32 / segments as f32).max(w0);
                let end = ((segment + 1) as f32 / segments as f32).min(w1);
                if start > end {
                    continue;
                }

                // Linear keys reach their extremes at the slice ends or at a key.
                let inner = (1..steps.saturating_sub(1))
                    .map(|k| k as f32 / (steps - 1) as f32)
                    .filter(|&t| start < t && t < end);
                let prim_bounds = [start, end]
                    .into_iter()
                    .chain(inner)
                    .fold(AABB::default(), |b, t| b.union(bounds(&key_at(t))));

                self.items.push(BuildItem {
                    bounds: prim_bounds,
                    class: LeafClass::Primitive(prim_type),
                    visibility: self.visibility,
                });
                self.slots.push(Slot {
                    prim_type,
                    object: self.object,
                    index: self.base + prim as u32,
                    visibility: self.visibility,
                    time: [start, end],
                });
            }
        }
    }
}

fn curve_type(ribbon: bool, motion: bool) -> PrimitiveType {
    match (ribbon, motion) {
        (false, false) => PrimitiveType::CurveThick,
        (false, true) => PrimitiveType::MotionCurveThick,
        (true, false) => PrimitiveType::CurveRibbon,
        (true, true) => PrimitiveType::MotionCurveRibbon,
    }
}

fn motion_type(prim_type: PrimitiveType) -> PrimitiveType {
    match prim_type {
        PrimitiveType::Triangle => PrimitiveType::MotionTriangle,
        PrimitiveType::CurveThick => PrimitiveType::MotionCurveThick,
        PrimitiveType::CurveRibbon => PrimitiveType::MotionCurveRibbon,
        PrimitiveType::Point => PrimitiveType::MotionPoint,
        ty => ty,
    }
}

/// Store the keys of `geometry` in its family's table, returning the first primitive id.
fn push_keys(tables: &mut SceneTables, geometry: &Geometry) -> u32 {
    fn push<T: Copy>(table: &mut KeyTable<T>, keys: &[Vec<T>]) -> u32 {
        let base = table.len() as u32;
        if let Some(first) = keys.first() {
            for prim in 0..first.len() {
                table.push(keys.iter().map(|key| key[prim]));
            }
        }
        base
    }

    match &geometry.shape {
        Shape::Triangles(t) => push(&mut tables.triangles, std::slice::from_ref(t)),
        Shape::MotionTriangles(keys) => push(&mut tables.triangles, keys),
        Shape::Curves { segments, .. } => push(&mut tables.curves, std::slice::from_ref(segments)),
        Shape::MotionCurves { keys, .. } => push(&mut tables.curves, keys),
        Shape::Points(p) => push(&mut tables.points, std::slice::from_ref(p)),
        Shape::MotionPoints(keys) => push(&mut tables.points, keys),
    }
}

fn append_slots(tables: &mut SceneTables, slots: impl Iterator<Item = Slot>) {
    for slot in slots {
        tables.prim_type.push(slot.prim_type);
        tables.prim_object.push(slot.object);
        tables.prim_index.push(slot.index);
        tables.prim_visibility.push(slot.visibility);
        tables.prim_time.push(slot.time);
    }
}

fn validate_geometry(geometry_id: u32, geometry: &Geometry) -> Result<(), SceneError> {
    let [start, end] = geometry.valid_time;
    if !(0.0 <= start && start <= end && end <= 1.0) {
        return Err(SceneError::InvalidTimeWindow {
            geometry: geometry_id,
            start,
            end,
        });
    }

    fn check<T>(
        geometry: u32,
        keys: &[Vec<T>],
        motion: bool,
        finite: impl Fn(&T) -> bool,
    ) -> Result<(), SceneError> {
        if motion && keys.len() < 2 {
            return Err(SceneError::MissingKeys {
                geometry,
                found: keys.len(),
            });
        }

        let expected = keys.first().map_or(0, Vec::len);
        for key in keys {
            if key.len() != expected {
                return Err(SceneError::KeyLength {
                    geometry,
                    expected,
                    found: key.len(),
                });
            }
            if !key.iter().all(&finite) {
                return Err(SceneError::NonFinite { geometry });
            }
        }

        Ok(())
    }

    let finite_triangle = |t: &[Vec3; 3]| t.iter().all(|v| v.is_finite());
    let finite_point = |p: &Vec4| p.is_finite() && p.w >= 0.0;

    match &geometry.shape {
        Shape::Triangles(t) => check(geometry_id, std::slice::from_ref(t), false, finite_triangle),
        Shape::MotionTriangles(keys) => check(geometry_id, keys, true, finite_triangle),
        Shape::Curves { segments, .. } => check(
            geometry_id,
            std::slice::from_ref(segments),
            false,
            CurveSegment::is_finite,
        ),
        Shape::MotionCurves { keys, .. } => {
            check(geometry_id, keys, true, CurveSegment::is_finite)
        }
        Shape::Points(p) => check(geometry_id, std::slice::from_ref(p), false, finite_point),
        Shape::MotionPoints(keys) => check(geometry_id, keys, true, finite_point),
    }
}
