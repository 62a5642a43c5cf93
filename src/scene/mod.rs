//! Read-only scene tables consumed by the traversal.
//!
//! [`SceneData`] is the accessor interface the traversal is written against, so the
//! backing store can be anything that answers indexed reads. [`SceneTables`] is the
//! host memory implementation produced by [`SceneBuilder`].

mod builder;

pub use builder::*;

use crate::{
    bvh::{ChildRef, PackedLeaf, PackedNode},
    primitives::{
        instance::{pop_ray, push_ray},
        CurveSegment, ObjectTransform, PrimitiveType, AABB,
    },
    ray::{LocalRay, Ray, Visibility},
};
use glam::{Vec3, Vec4};

/// Indexed reads of the flattened hierarchy and the per-primitive tables.
///
/// Primitive tables are indexed by primitive address, the slots leaves point at.
/// Geometry keys are indexed by primitive id, see [`SceneData::prim_index`].
pub trait SceneData {
    fn root(&self) -> ChildRef;
    /// Deepest chain of internal nodes, including one level per instance boundary
    /// and the depth of the instanced hierarchy below it.
    fn max_depth(&self) -> usize;

    fn node(&self, addr: u32) -> PackedNode;
    fn leaf(&self, index: u32) -> PackedLeaf;

    fn prim_type(&self, prim_addr: u32) -> PrimitiveType;
    /// Owning object of a top level primitive, [`crate::ray::OBJECT_NONE`] inside instances.
    fn prim_object(&self, prim_addr: u32) -> u32;
    /// Primitive id whose keys are fetched and reported in the intersection.
    fn prim_index(&self, prim_addr: u32) -> u32;
    fn prim_visibility(&self, prim_addr: u32) -> Visibility;
    /// Shutter interval `[start, end]` in which the primitive at `prim_addr` exists.
    fn prim_time(&self, prim_addr: u32) -> [f32; 2];
    /// Whether [`SceneData::prim_time`] carries information worth culling with.
    fn uses_time_steps(&self) -> bool;

    fn object_root(&self, object: u32) -> ChildRef;

    fn triangle_steps(&self, prim: u32) -> u32;
    fn triangle(&self, prim: u32, step: u32) -> [Vec3; 3];
    fn curve_steps(&self, prim: u32) -> u32;
    fn curve(&self, prim: u32, step: u32) -> CurveSegment;
    fn point_steps(&self, prim: u32) -> u32;
    /// Center in `xyz`, radius in `w`.
    fn point(&self, prim: u32, step: u32) -> Vec4;
}

/// Moves rays in and out of instanced object space.
///
/// `push` returns the object space ray and the factor that converts parent space
/// distances into object space ones. `pop` restores the parent space ray from
/// `ray`, the untouched world ray, and converts `t` back. `time` is `None` when
/// motion is disabled, moving objects are then evaluated at shutter open.
pub trait InstanceTransform {
    fn push(&self, object: u32, ray: &Ray, time: Option<f32>) -> (LocalRay, f32);
    fn pop(&self, object: u32, ray: &Ray, t: f32, time: Option<f32>) -> (LocalRay, f32);
}

/// Per object data. World objects are baked into the top level and have no
/// hierarchy or transform of their own.
#[derive(Clone, Debug)]
pub(crate) struct ObjectRecord {
    pub root: ChildRef,
    pub transform: Option<ObjectTransform>,
}

/// Motion keys of one primitive family, `steps` consecutive keys per primitive.
#[derive(Clone, Debug)]
pub(crate) struct KeyTable<T> {
    ranges: Vec<(u32, u32)>,
    keys: Vec<T>,
}

impl<T> Default for KeyTable<T> {
    fn default() -> Self {
        Self {
            ranges: Vec::new(),
            keys: Vec::new(),
        }
    }
}

impl<T: Copy> KeyTable<T> {
    /// Append a primitive and return its id.
    pub fn push(&mut self, keys: impl IntoIterator<Item = T>) -> u32 {
        let start = self.keys.len() as u32;
        self.keys.extend(keys);
        let steps = self.keys.len() as u32 - start;

        self.ranges.push((start, steps));
        self.ranges.len() as u32 - 1
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn steps(&self, prim: u32) -> u32 {
        self.ranges[prim as usize].1
    }

    #[inline]
    pub fn get(&self, prim: u32, step: u32) -> T {
        let (start, steps) = self.ranges[prim as usize];
        debug_assert!(step < steps);

        self.keys[(start + step) as usize]
    }
}

/// Host memory scene tables. Immutable once built and safe to share between threads.
#[derive(Clone, Debug)]
pub struct SceneTables {
    pub(crate) root: ChildRef,
    pub(crate) max_depth: usize,
    pub(crate) bounds: AABB,
    pub(crate) nodes: Vec<PackedNode>,
    pub(crate) leaves: Vec<PackedLeaf>,

    pub(crate) prim_type: Vec<PrimitiveType>,
    pub(crate) prim_object: Vec<u32>,
    pub(crate) prim_index: Vec<u32>,
    pub(crate) prim_visibility: Vec<Visibility>,
    pub(crate) prim_time: Vec<[f32; 2]>,
    pub(crate) use_time_steps: bool,

    pub(crate) objects: Vec<ObjectRecord>,

    pub(crate) triangles: KeyTable<[Vec3; 3]>,
    pub(crate) curves: KeyTable<CurveSegment>,
    pub(crate) points: KeyTable<Vec4>,
}

impl Default for SceneTables {
    /// A scene without anything in it.
    fn default() -> Self {
        Self {
            root: ChildRef::SENTINEL,
            max_depth: 0,
            bounds: AABB::default(),
            nodes: Vec::new(),
            leaves: Vec::new(),
            prim_type: Vec::new(),
            prim_object: Vec::new(),
            prim_index: Vec::new(),
            prim_visibility: Vec::new(),
            prim_time: Vec::new(),
            use_time_steps: false,
            objects: Vec::new(),
            triangles: KeyTable::default(),
            curves: KeyTable::default(),
            points: KeyTable::default(),
        }
    }
}

impl SceneTables {
    /// World space bounds of everything in the scene, over the whole shutter interval.
    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Number of primitive addresses, time slices counted separately.
    pub fn prim_count(&self) -> usize {
        self.prim_type.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn curve_count(&self) -> usize {
        self.curves.len()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Transform of an instanced object, `None` for objects baked into the top level.
    pub fn object_transform(&self, object: u32) -> Option<&ObjectTransform> {
        self.objects
            .get(object as usize)
            .and_then(|o| o.transform.as_ref())
    }
}

impl SceneData for SceneTables {
    fn root(&self) -> ChildRef {
        self.root
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[inline]
    fn node(&self, addr: u32) -> PackedNode {
        self.nodes[addr as usize]
    }

    #[inline]
    fn leaf(&self, index: u32) -> PackedLeaf {
        self.leaves[index as usize]
    }

    #[inline]
    fn prim_type(&self, prim_addr: u32) -> PrimitiveType {
        self.prim_type[prim_addr as usize]
    }

    #[inline]
    fn prim_object(&self, prim_addr: u32) -> u32 {
        self.prim_object[prim_addr as usize]
    }

    #[inline]
    fn prim_index(&self, prim_addr: u32) -> u32 {
        self.prim_index[prim_addr as usize]
    }

    #[inline]
    fn prim_visibility(&self, prim_addr: u32) -> Visibility {
        self.prim_visibility[prim_addr as usize]
    }

    #[inline]
    fn prim_time(&self, prim_addr: u32) -> [f32; 2] {
        self.prim_time[prim_addr as usize]
    }

    fn uses_time_steps(&self) -> bool {
        self.use_time_steps
    }

    #[inline]
    fn object_root(&self, object: u32) -> ChildRef {
        self.objects[object as usize].root
    }

    fn triangle_steps(&self, prim: u32) -> u32 {
        self.triangles.steps(prim)
    }

    fn triangle(&self, prim: u32, step: u32) -> [Vec3; 3] {
        self.triangles.get(prim, step)
    }

    fn curve_steps(&self, prim: u32) -> u32 {
        self.curves.steps(prim)
    }

    fn curve(&self, prim: u32, step: u32) -> CurveSegment {
        self.curves.get(prim, step)
    }

    fn point_steps(&self, prim: u32) -> u32 {
        self.points.steps(prim)
    }

    fn point(&self, prim: u32, step: u32) -> Vec4 {
        self.points.get(prim, step)
    }
}

impl InstanceTransform for SceneTables {
    fn push(&self, object: u32, ray: &Ray, time: Option<f32>) -> (LocalRay, f32) {
        match self.object_transform(object) {
            Some(tfm) => push_ray(&tfm.inverse_at(time), ray),
            None => (LocalRay::from(ray), 1.0),
        }
    }

    fn pop(&self, object: u32, ray: &Ray, t: f32, time: Option<f32>) -> (LocalRay, f32) {
        match self.object_transform(object) {
            Some(tfm) => pop_ray(&tfm.inverse_at(time), ray, t),
            None => (LocalRay::from(ray), t),
        }
    }
}
