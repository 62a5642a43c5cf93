//! The ray traversal loop.
//!
//! An iterative depth first search over the flattened hierarchy with an explicit
//! stack. Both children hit: the nearer one is visited first and the farther one
//! pushed. Primitive leaves pop the next node before their primitives are tested,
//! instance leaves move the ray into object space and push a sentinel marking the
//! boundary. Running out of nodes inside an instance moves the ray back and
//! continues with the parent's pending nodes.

mod stack;
mod stats;

pub use stack::TraversalStack;
pub use stats::{Counters, TraversalStats};

use crate::{
    bvh::{ChildRef, LeafContent, NodeRef},
    error::TraversalError,
    primitives::{self, PrimitiveType},
    ray::{Intersection, LocalRay, Ray, Visibility, OBJECT_NONE},
    scene::{InstanceTransform, SceneData},
};
use std::marker::PhantomData;

/// Default stack capacity, enough for any scene the builder produces in practice.
pub const BVH_STACK_SIZE: usize = 192;

/// Primitive families a traversal is specialised for. Leaves of a disabled family
/// are skipped without looking at their primitives.
pub trait Features {
    const HAIR: bool;
    const MOTION: bool;
    const POINTCLOUD: bool;

    #[inline]
    fn enabled(prim_type: PrimitiveType) -> bool {
        (Self::MOTION || !prim_type.is_motion())
            && (Self::HAIR || !prim_type.is_curve())
            && (Self::POINTCLOUD || !prim_type.is_point())
    }
}

/// Static triangles only.
#[derive(Clone, Copy, Debug, Default)]
pub struct Basic;
#[derive(Clone, Copy, Debug, Default)]
pub struct Motion;
#[derive(Clone, Copy, Debug, Default)]
pub struct Hair;
#[derive(Clone, Copy, Debug, Default)]
pub struct PointCloud;
#[derive(Clone, Copy, Debug, Default)]
pub struct AllFeatures;

impl Features for Basic {
    const HAIR: bool = false;
    const MOTION: bool = false;
    const POINTCLOUD: bool = false;
}

impl Features for Motion {
    const HAIR: bool = false;
    const MOTION: bool = true;
    const POINTCLOUD: bool = false;
}

impl Features for Hair {
    const HAIR: bool = true;
    const MOTION: bool = false;
    const POINTCLOUD: bool = false;
}

impl Features for PointCloud {
    const HAIR: bool = false;
    const MOTION: bool = false;
    const POINTCLOUD: bool = true;
}

impl Features for AllFeatures {
    const HAIR: bool = true;
    const MOTION: bool = true;
    const POINTCLOUD: bool = true;
}

/// Ray queries against one scene.
///
/// Holds nothing but the scene reference, all traversal state lives on the stack of
/// the query, so one `Traversal` can serve any number of threads.
pub struct Traversal<'s, S: ?Sized, F = AllFeatures, const STACK_SIZE: usize = BVH_STACK_SIZE> {
    scene: &'s S,
    features: PhantomData<fn() -> F>,
}

impl<S: ?Sized, F, const STACK_SIZE: usize> Clone for Traversal<'_, S, F, STACK_SIZE> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized, F, const STACK_SIZE: usize> Copy for Traversal<'_, S, F, STACK_SIZE> {}

impl<'s, S> Traversal<'s, S>
where
    S: SceneData + InstanceTransform + ?Sized,
{
    pub fn new(scene: &'s S) -> Result<Self, TraversalError> {
        Self::with_features(scene)
    }
}

impl<'s, S, F, const STACK_SIZE: usize> Traversal<'s, S, F, STACK_SIZE>
where
    S: SceneData + InstanceTransform + ?Sized,
    F: Features,
{
    /// Fails when the scene is deeper than the stack can hold, so no query on the
    /// returned traversal can overflow it.
    pub fn with_features(scene: &'s S) -> Result<Self, TraversalError> {
        let depth = scene.max_depth();
        let required = depth + 1;
        if required > STACK_SIZE {
            return Err(TraversalError::StackTooShallow {
                depth,
                required,
                capacity: STACK_SIZE,
            });
        }

        Ok(Self {
            scene,
            features: PhantomData,
        })
    }

    /// Closest hit, or the first opaque hit for rays carrying
    /// [`Visibility::SHADOW_OPAQUE`]. Returns whether anything was hit, `isect`
    /// holds the hit in world space distances.
    #[inline]
    pub fn intersect(&self, ray: &Ray, isect: &mut Intersection) -> bool {
        self.intersect_counted(ray, isect, &mut ())
    }

    pub fn closest_hit(&self, ray: &Ray) -> Option<Intersection> {
        let mut isect = Intersection::none(ray.t_max);
        self.intersect(ray, &mut isect).then_some(isect)
    }

    /// Whether anything blocks the ray, stopping at the first hit found.
    pub fn occluded(&self, ray: &Ray) -> bool {
        let ray = ray.with_visibility(ray.visibility | Visibility::SHADOW_OPAQUE);
        let mut isect = Intersection::none(ray.t_max);

        self.intersect(&ray, &mut isect)
    }

    pub fn intersect_counted<C: Counters>(
        &self,
        ray: &Ray,
        isect: &mut Intersection,
        counters: &mut C,
    ) -> bool {
        let scene = self.scene;

        *isect = Intersection::none(ray.t_max);
        if ray.is_degenerate() {
            return false;
        }

        let mut node = scene.root();
        if node.is_sentinel() {
            return false;
        }

        let mut stack = TraversalStack::<STACK_SIZE>::new();
        let visibility = ray.visibility;
        let shadow = visibility.contains(Visibility::SHADOW_OPAQUE);
        let use_time = scene.uses_time_steps();
        let motion_time = F::MOTION.then_some(ray.time);

        let mut local = LocalRay::from(ray);
        let mut object = OBJECT_NONE;
        // World space bound on entering the active instance, and whether the
        // instance has tightened it since.
        let mut parent_t = isect.t;
        let mut instance_hit = false;

        loop {
            loop {
                // Descend until a leaf is reached or the space runs out.
                while let NodeRef::Internal(addr) = node.decode() {
                    counters.node();

                    let n = scene.node(addr);
                    let hit = n.intersect(&local, isect.t, visibility);

                    node = match hit.mask {
                        0b11 => {
                            // Child 0 first when both are entered at the same distance.
                            let (near, far) = if hit.dist[1] < hit.dist[0] {
                                (n.children[1], n.children[0])
                            } else {
                                (n.children[0], n.children[1])
                            };
                            stack.push(far);
                            counters.stack(stack.len());
                            near
                        }
                        0b01 => n.children[0],
                        0b10 => n.children[1],
                        _ => stack.pop(),
                    };
                }

                if let NodeRef::Leaf(index) = node.decode() {
                    counters.leaf();

                    match scene.leaf(index).content() {
                        LeafContent::Primitives { range, prim_type } => {
                            node = stack.pop();

                            if !F::enabled(prim_type) {
                                continue;
                            }

                            for prim_addr in range {
                                let ty = if prim_type.is_curve() || prim_type.is_point() {
                                    scene.prim_type(prim_addr)
                                } else {
                                    prim_type
                                };

                                if use_time && (ty.is_motion() || ty.is_point()) {
                                    let [start, end] = scene.prim_time(prim_addr);
                                    if ray.time < start || ray.time > end {
                                        continue;
                                    }
                                }

                                counters.primitive();

                                let prim_object = if object == OBJECT_NONE {
                                    scene.prim_object(prim_addr)
                                } else {
                                    object
                                };
                                let prim = scene.prim_index(prim_addr);

                                let hit = primitives::intersect(
                                    scene,
                                    isect,
                                    &local,
                                    ty,
                                    visibility,
                                    prim_object,
                                    prim,
                                    prim_addr,
                                    ray.time,
                                );

                                if !hit {
                                    continue;
                                }
                                instance_hit = true;

                                if shadow {
                                    if object != OBJECT_NONE {
                                        let t = scene.pop(object, ray, isect.t, motion_time).1;
                                        isect.t = t.min(parent_t);
                                    }
                                    return true;
                                }
                            }
                        }
                        LeafContent::Instance { object: instance } => {
                            let root = scene.object_root(instance);
                            if root.is_sentinel() {
                                node = stack.pop();
                                continue;
                            }
                            counters.instance();

                            object = instance;
                            parent_t = isect.t;
                            instance_hit = false;
                            let (object_ray, scale) = scene.push(object, ray, motion_time);
                            local = object_ray;
                            isect.t *= scale;

                            stack.push(ChildRef::SENTINEL);
                            counters.stack(stack.len());
                            node = root;
                        }
                    }
                }

                if node.is_sentinel() {
                    break;
                }
            }

            if object == OBJECT_NONE {
                break;
            }

            // Leave the instance and continue with the parent's pending nodes.
            // Dividing the scale back out can round up past the parent's bound.
            let (parent_ray, t) = scene.pop(object, ray, isect.t, motion_time);
            local = parent_ray;
            isect.t = if instance_hit { t.min(parent_t) } else { parent_t };
            object = OBJECT_NONE;
            node = stack.pop();

            if node.is_sentinel() {
                break;
            }
        }

        isect.is_hit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bvh::{PackedLeaf, PackedNode},
        primitives::{triangle, ObjectTransform, Transform, AABB},
        scene::{ObjectRecord, SceneTables},
    };
    use approx::assert_relative_eq;
    use glam::{vec3, Vec3};

    fn facing(z: f32) -> [Vec3; 3] {
        [vec3(-1.0, -1.0, z), vec3(1.0, -1.0, z), vec3(0.0, 1.0, z)]
    }

    fn add_triangle(scene: &mut SceneTables, verts: [Vec3; 3], object: u32) -> u32 {
        let prim = scene.triangles.push([verts]);
        scene.prim_type.push(PrimitiveType::Triangle);
        scene.prim_object.push(object);
        scene.prim_index.push(prim);
        scene.prim_visibility.push(Visibility::all());
        scene.prim_time.push([0.0, 1.0]);

        scene.prim_type.len() as u32 - 1
    }

    fn leaf_bounds(scene: &SceneTables, range: std::ops::Range<u32>) -> AABB {
        range.fold(AABB::default(), |b, addr| {
            b.union(triangle::bounds(&scene.triangles.get(scene.prim_index[addr as usize], 0)))
        })
    }

    // A root node over two single triangle leaves.
    fn two_leaves(a: [Vec3; 3], b: [Vec3; 3]) -> SceneTables {
        let mut scene = SceneTables::default();
        add_triangle(&mut scene, a, 0);
        add_triangle(&mut scene, b, 0);
        scene.objects.push(ObjectRecord {
            root: ChildRef::SENTINEL,
            transform: None,
        });

        scene.leaves.push(PackedLeaf::primitives(0..1, PrimitiveType::Triangle));
        scene.leaves.push(PackedLeaf::primitives(1..2, PrimitiveType::Triangle));
        let bounds = [leaf_bounds(&scene, 0..1), leaf_bounds(&scene, 1..2)];
        scene.nodes.push(PackedNode::new(
            bounds,
            [ChildRef::leaf(0), ChildRef::leaf(1)],
            [Visibility::all(); 2],
        ));
        scene.root = ChildRef::internal(0);
        scene.max_depth = 1;

        scene
    }

    #[test]
    fn nearer_child_wins_regardless_of_order() {
        let scene = two_leaves(facing(5.0), facing(2.0));
        let traversal = Traversal::new(&scene).unwrap();

        let isect = traversal
            .closest_hit(&Ray::new(Vec3::ZERO, Vec3::Z))
            .unwrap();
        assert_relative_eq!(isect.t, 2.0);
        assert_eq!(isect.prim, 1);
        assert_eq!(isect.object, 0);
        assert_eq!(isect.prim_type, Some(PrimitiveType::Triangle));
    }

    #[test]
    fn equal_distance_ties_go_to_the_first_child() {
        let scene = two_leaves(facing(3.0), facing(3.0));
        let traversal = Traversal::new(&scene).unwrap();

        let isect = traversal
            .closest_hit(&Ray::new(Vec3::ZERO, Vec3::Z))
            .unwrap();
        assert_eq!(isect.prim, 0);
    }

    #[test]
    fn counts_the_work_done() {
        let scene = two_leaves(facing(5.0), facing(2.0));
        let traversal = Traversal::new(&scene).unwrap();

        let mut stats = TraversalStats::default();
        let mut isect = Intersection::default();
        assert!(traversal.intersect_counted(&Ray::new(Vec3::ZERO, Vec3::Z), &mut isect, &mut stats));

        // A popped leaf goes straight to its primitives without another box test.
        assert_eq!(
            stats,
            TraversalStats {
                nodes: 1,
                leaves: 2,
                primitives: 2,
                instances: 0,
                max_stack: 2,
            }
        );
    }

    #[test]
    fn t_max_bounds_the_search() {
        let scene = two_leaves(facing(5.0), facing(2.0));
        let traversal = Traversal::new(&scene).unwrap();

        assert!(traversal
            .closest_hit(&Ray::new(Vec3::ZERO, Vec3::Z).with_t_max(1.5))
            .is_none());
        let isect = traversal
            .closest_hit(&Ray::new(Vec3::ZERO, Vec3::Z).with_t_max(4.0))
            .unwrap();
        assert_eq!(isect.prim, 1);
    }

    #[test]
    fn degenerate_rays_miss() {
        let scene = two_leaves(facing(5.0), facing(2.0));
        let traversal = Traversal::new(&scene).unwrap();

        let mut isect = Intersection::default();
        assert!(!traversal.intersect(&Ray::new(Vec3::ZERO, Vec3::ZERO), &mut isect));
        assert!(!isect.is_hit());
        assert!(!traversal.intersect(&Ray::new(Vec3::ZERO, Vec3::Z).with_t_max(0.0), &mut isect));
        assert!(!traversal.occluded(&Ray::new(Vec3::ZERO, Vec3::Z).with_t_max(-1.0)));
    }

    #[test]
    fn empty_scene_misses() {
        let scene = SceneTables::default();
        let traversal = Traversal::new(&scene).unwrap();

        assert!(traversal.closest_hit(&Ray::new(Vec3::ZERO, Vec3::Z)).is_none());
        assert!(!traversal.occluded(&Ray::new(Vec3::ZERO, Vec3::Z)));
    }

    #[test]
    fn shadow_ray_stops_at_first_hit_in_a_leaf() {
        let mut scene = SceneTables::default();
        add_triangle(&mut scene, facing(2.0), 0);
        add_triangle(&mut scene, facing(1.0), 0);
        scene.objects.push(ObjectRecord {
            root: ChildRef::SENTINEL,
            transform: None,
        });
        scene.leaves.push(PackedLeaf::primitives(0..2, PrimitiveType::Triangle));
        scene.root = ChildRef::leaf(0);

        let traversal = Traversal::new(&scene).unwrap();
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);

        let mut stats = TraversalStats::default();
        let mut isect = Intersection::default();
        let shadow = ray.with_visibility(Visibility::all());
        assert!(traversal.intersect_counted(&shadow, &mut isect, &mut stats));
        assert_eq!(stats.primitives, 1);
        assert_eq!(isect.prim, 0);

        let mut stats = TraversalStats::default();
        assert!(traversal.intersect_counted(&ray, &mut isect, &mut stats));
        assert_eq!(stats.primitives, 2);
        assert_eq!(isect.prim, 1);
    }

    #[test]
    fn primitive_visibility_is_respected() {
        let mut scene = two_leaves(facing(2.0), facing(5.0));
        scene.prim_visibility[0] = Visibility::SHADOW;
        let traversal = Traversal::new(&scene).unwrap();

        let camera = Ray::new(Vec3::ZERO, Vec3::Z).with_visibility(Visibility::CAMERA);
        assert_eq!(traversal.closest_hit(&camera).unwrap().prim, 1);

        let shadow = Ray::new(Vec3::ZERO, Vec3::Z).with_visibility(Visibility::SHADOW_OPAQUE);
        let mut isect = Intersection::default();
        assert!(traversal.intersect(&shadow, &mut isect));
        assert_eq!(isect.prim, 0);
    }

    #[test]
    fn instance_leaf_enters_object_space() {
        // Object 0 owns a triangle at z = 1 in its own space, placed twice as far away.
        let mut scene = SceneTables::default();
        add_triangle(&mut scene, facing(1.0), OBJECT_NONE);
        scene.leaves.push(PackedLeaf::primitives(0..1, PrimitiveType::Triangle));
        scene.leaves.push(PackedLeaf::instance(0));

        let transform = Transform::new(Vec3::ZERO, glam::Quat::IDENTITY, Vec3::splat(3.0));
        scene.objects.push(ObjectRecord {
            root: ChildRef::leaf(0),
            transform: Some(ObjectTransform::fixed(&transform)),
        });
        scene.root = ChildRef::leaf(1);
        scene.max_depth = 1;

        let traversal = Traversal::new(&scene).unwrap();
        let mut stats = TraversalStats::default();
        let mut isect = Intersection::default();
        assert!(traversal.intersect_counted(
            &Ray::new(Vec3::ZERO, Vec3::Z * 0.5),
            &mut isect,
            &mut stats
        ));

        // World hit at z = 3, six units of the half length direction.
        assert_relative_eq!(isect.t, 6.0, epsilon = 1e-5);
        assert_eq!(isect.object, 0);
        assert_eq!(isect.prim, 0);
        assert_eq!(stats.instances, 1);
        assert_eq!(stats.max_stack, 2);

        let shadow = Ray::new(Vec3::ZERO, Vec3::Z * 0.5).with_visibility(Visibility::all());
        assert!(traversal.intersect(&shadow, &mut isect));
        assert_relative_eq!(isect.t, 6.0, epsilon = 1e-5);
    }

    // Object 0 placed with a uniform scale, in front of a world triangle at z = 5.
    // The object's only triangle sits off to the side, so rays along +Z miss it.
    fn instance_before_triangle(scale: f32, object_root: ChildRef) -> SceneTables {
        let mut scene = SceneTables::default();
        add_triangle(
            &mut scene,
            [vec3(4.0, 4.0, 0.5), vec3(5.0, 4.0, 0.5), vec3(4.0, 5.0, 0.5)],
            OBJECT_NONE,
        );
        add_triangle(&mut scene, facing(5.0), 1);

        scene.leaves.push(PackedLeaf::primitives(0..1, PrimitiveType::Triangle));
        scene.leaves.push(PackedLeaf::instance(0));
        scene.leaves.push(PackedLeaf::primitives(1..2, PrimitiveType::Triangle));

        let transform = Transform::new(Vec3::ZERO, glam::Quat::IDENTITY, Vec3::splat(scale));
        scene.objects.push(ObjectRecord {
            root: object_root,
            transform: Some(ObjectTransform::fixed(&transform)),
        });
        scene.objects.push(ObjectRecord {
            root: ChildRef::SENTINEL,
            transform: None,
        });

        let bounds = [
            AABB::new(vec3(-1.0, -1.0, 0.0), vec3(1.0, 1.0, 1.0)),
            leaf_bounds(&scene, 1..2),
        ];
        scene.nodes.push(PackedNode::new(
            bounds,
            [ChildRef::leaf(1), ChildRef::leaf(2)],
            [Visibility::all(); 2],
        ));
        scene.root = ChildRef::internal(0);
        scene.max_depth = 2;

        scene
    }

    #[test]
    fn leaving_an_instance_keeps_t_max_exclusive() {
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);

        for scale in [1.0137, 1.0411, 2.1234, 0.7, 1.1, 3.0, 5.3, 0.013] {
            let scene = instance_before_triangle(scale, ChildRef::leaf(0));
            let traversal = Traversal::new(&scene).unwrap();

            let mut stats = TraversalStats::default();
            let mut isect = Intersection::default();
            let hit = traversal.intersect_counted(&ray.with_t_max(5.0), &mut isect, &mut stats);
            assert!(!hit, "scale {scale} accepted a hit at t = {}", isect.t);
            assert_eq!(isect.t, 5.0);
            assert_eq!(stats.instances, 1);

            assert!(!traversal.occluded(&ray.with_t_max(5.0)));

            let isect = traversal.closest_hit(&ray.with_t_max(5.5)).unwrap();
            assert_eq!(isect.object, 1);
            assert_relative_eq!(isect.t, 5.0);
        }
    }

    #[test]
    fn empty_instance_continues_with_parent_nodes() {
        let scene = instance_before_triangle(2.0, ChildRef::SENTINEL);
        let traversal = Traversal::new(&scene).unwrap();
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);

        let mut stats = TraversalStats::default();
        let mut isect = Intersection::default();
        assert!(traversal.intersect_counted(&ray, &mut isect, &mut stats));
        assert_eq!(isect.object, 1);
        assert_eq!(isect.prim, 1);
        assert_relative_eq!(isect.t, 5.0);
        assert_eq!(stats.instances, 0);
        assert_eq!(stats.leaves, 2);

        assert!(traversal.occluded(&ray));
    }

    #[test]
    fn shallow_stack_is_rejected() {
        let mut scene = two_leaves(facing(5.0), facing(2.0));
        scene.max_depth = 8;

        let result = Traversal::<_, AllFeatures, 8>::with_features(&scene);
        assert_eq!(
            result.err(),
            Some(TraversalError::StackTooShallow {
                depth: 8,
                required: 9,
                capacity: 8
            })
        );
        assert!(Traversal::<_, AllFeatures, 9>::with_features(&scene).is_ok());
    }

    #[test]
    fn feature_masks() {
        assert!(Basic::enabled(PrimitiveType::Triangle));
        assert!(!Basic::enabled(PrimitiveType::MotionTriangle));
        assert!(!Basic::enabled(PrimitiveType::CurveRibbon));
        assert!(Hair::enabled(PrimitiveType::CurveThick));
        assert!(!Hair::enabled(PrimitiveType::MotionCurveThick));
        assert!(PointCloud::enabled(PrimitiveType::Point));
        assert!(Motion::enabled(PrimitiveType::MotionTriangle));
        assert!(AllFeatures::enabled(PrimitiveType::MotionPoint));
    }
}
