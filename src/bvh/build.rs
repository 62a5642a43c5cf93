//! Binned SAH construction of the flattened tables.
//!
//! Produces the node and leaf records the traversal consumes, and reports the
//! deepest chain of internal nodes so the traversal stack can be sized from it.
//! There is no refitting or rebalancing, a changed scene is built again.

use crate::{
    bvh::{ChildRef, PackedLeaf, PackedNode},
    primitives::{Axis, GetAxis, PrimitiveType, AABB},
    ray::Visibility,
};
use glam::Vec3;

const BUCKETS: usize = 12;
const TRAVERSAL_COST: f32 = 0.125;

/// What a build item turns into once it lands in a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeafClass {
    /// One primitive slot of this type.
    Primitive(PrimitiveType),
    /// An instance marker for this object. `depth` is the depth of the object's own
    /// hierarchy, counted towards the depth of the tree it is placed in.
    Instance { object: u32, depth: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct BuildItem {
    pub bounds: AABB,
    pub class: LeafClass,
    pub visibility: Visibility,
}

impl BuildItem {
    fn center(&self) -> Vec3 {
        self.bounds.center()
    }
}

/// Result of building one hierarchy into the shared tables.
#[derive(Clone, Debug)]
pub struct BuiltTree {
    pub root: ChildRef,
    pub bounds: AABB,
    pub visibility: Visibility,
    /// Internal levels on the longest path, plus one per instance boundary
    /// and the depth of the instanced hierarchy below it.
    pub depth: usize,
    /// Item indices in primitive slot order, starting at the `prim_base` passed in.
    /// Instance items have no slot and do not appear.
    pub order: Vec<usize>,
}

#[derive(Copy, Clone, Debug, Default)]
struct SAHBucket {
    count: usize,
    bounds: AABB,
}

#[derive(Debug)]
enum BuildNodeInner {
    Interior {
        left: Box<BuildNode>,
        right: Box<BuildNode>,
    },
    Leaf {
        prim_offset: usize,
        num_primitives: usize,
        class: LeafClass,
    },
}

#[derive(Debug)]
struct BuildNode {
    bounds: AABB,
    visibility: Visibility,
    depth: usize,
    inner: BuildNodeInner,
}

impl BuildNode {
    fn interior(left: Box<BuildNode>, right: Box<BuildNode>) -> Self {
        Self {
            bounds: left.bounds.union(right.bounds),
            visibility: left.visibility | right.visibility,
            depth: 1 + left.depth.max(right.depth),
            inner: BuildNodeInner::Interior { left, right },
        }
    }
}

pub struct Builder<'a> {
    items: &'a [BuildItem],
    max_leaf_size: usize,
    order: Vec<usize>,
    total_nodes: usize,
}

impl<'a> Builder<'a> {
    pub fn new(items: &'a [BuildItem], max_leaf_size: usize) -> Self {
        Self {
            items,
            max_leaf_size: max_leaf_size.max(1),
            order: Vec::with_capacity(items.len()),
            total_nodes: 0,
        }
    }

    /// Build a hierarchy over all items and append it to `nodes` and `leaves`.
    ///
    /// Primitive slots are numbered from `prim_base` in the returned `order`.
    pub fn build(
        mut self,
        nodes: &mut Vec<PackedNode>,
        leaves: &mut Vec<PackedLeaf>,
        prim_base: u32,
    ) -> BuiltTree {
        if self.items.is_empty() {
            return BuiltTree {
                root: ChildRef::SENTINEL,
                bounds: AABB::default(),
                visibility: Visibility::empty(),
                depth: 0,
                order: Vec::new(),
            };
        }

        let mut indices: Vec<usize> = (0..self.items.len()).collect();
        let root = self.build_recursive(&mut indices);

        let bounds = root.bounds;
        let visibility = root.visibility;
        let depth = root.depth;
        let root = Self::flatten(root, nodes, leaves, prim_base);

        tracing::trace!(
            "Built {} nodes over {} items, depth {}",
            self.total_nodes,
            self.items.len(),
            depth
        );

        BuiltTree {
            root,
            bounds,
            visibility,
            depth,
            order: self.order,
        }
    }

    fn bucket(&self, index: usize, axis: Axis, centroids: &AABB) -> usize {
        let min = centroids.min.axis(axis);
        let extent = centroids.max.axis(axis) - min;
        let b = ((self.items[index].center().axis(axis) - min) / extent * BUCKETS as f32) as usize;

        b.min(BUCKETS - 1)
    }

    fn build_recursive(&mut self, indices: &mut [usize]) -> BuildNode {
        self.total_nodes += 1;

        let items = self.items;
        let bounds = indices
            .iter()
            .fold(AABB::default(), |b, &i| b.union(items[i].bounds));

        // Leaves hold primitives of one type, or exactly one instance.
        let class = items[indices[0]].class;
        let homogeneous = indices.iter().all(|&i| items[i].class == class);
        let leafable = homogeneous
            && match class {
                LeafClass::Primitive(_) => indices.len() <= self.max_leaf_size,
                LeafClass::Instance { .. } => indices.len() == 1,
            };

        if indices.len() == 1 {
            return self.build_leaf(indices, bounds);
        }

        let centroids = indices
            .iter()
            .fold(AABB::default(), |b, &i| b.point_union(items[i].center()));
        let split_axis = centroids.max_extent();
        let degenerate = centroids.max.axis(split_axis) <= centroids.min.axis(split_axis);

        let mut mid = 0;
        if !degenerate {
            // SAH guided partitioning
            let mut buckets = [SAHBucket::default(); BUCKETS];
            for &i in indices.iter() {
                let bucket = &mut buckets[self.bucket(i, split_axis, &centroids)];
                bucket.count += 1;
                bucket.bounds = bucket.bounds.union(items[i].bounds);
            }

            let mut cost = [0.0; BUCKETS - 1];
            for (i, c) in cost.iter_mut().enumerate() {
                let (left, right) = buckets.split_at(i + 1);
                let sum = |side: &[SAHBucket]| {
                    side.iter().fold(SAHBucket::default(), |mut a, b| {
                        a.bounds = a.bounds.union(b.bounds);
                        a.count += b.count;
                        a
                    })
                };
                let (left, right) = (sum(left), sum(right));

                *c = TRAVERSAL_COST
                    + (left.count as f32 * left.bounds.surface_area()
                        + right.count as f32 * right.bounds.surface_area())
                        / bounds.surface_area().max(f32::MIN_POSITIVE);
            }

            let (min_bucket, min_cost) =
                cost.iter()
                    .enumerate()
                    .fold((0, f32::INFINITY), |(pi, pc), (i, &c)| {
                        if c < pc {
                            (i, c)
                        } else {
                            (pi, pc)
                        }
                    });

            if leafable && min_cost >= indices.len() as f32 {
                return self.build_leaf(indices, bounds);
            }

            // Items that fall into the chosen left buckets go first.
            indices.sort_by_key(|&i| self.bucket(i, split_axis, &centroids) > min_bucket);
            mid = indices
                .iter()
                .position(|&i| self.bucket(i, split_axis, &centroids) > min_bucket)
                .unwrap_or(0);
        } else if leafable {
            return self.build_leaf(indices, bounds);
        }

        // Fall back to an object median split when SAH cannot separate the items.
        if mid == 0 || mid == indices.len() {
            indices.sort_by(|&a, &b| {
                items[a]
                    .center()
                    .axis(split_axis)
                    .total_cmp(&items[b].center().axis(split_axis))
            });
            mid = indices.len() / 2;
        }

        let (left, right) = indices.split_at_mut(mid);
        let left = Box::new(self.build_recursive(left));
        let right = Box::new(self.build_recursive(right));

        BuildNode::interior(left, right)
    }

    fn build_leaf(&mut self, indices: &[usize], bounds: AABB) -> BuildNode {
        let items = self.items;
        let class = items[indices[0]].class;
        let visibility = indices
            .iter()
            .fold(Visibility::empty(), |v, &i| v | items[i].visibility);

        let prim_offset = self.order.len();
        let (num_primitives, depth) = match class {
            LeafClass::Primitive(_) => {
                self.order.extend_from_slice(indices);
                (indices.len(), 0)
            }
            LeafClass::Instance { depth, .. } => (0, depth + 1),
        };

        BuildNode {
            bounds,
            visibility,
            depth,
            inner: BuildNodeInner::Leaf {
                prim_offset,
                num_primitives,
                class,
            },
        }
    }

    fn flatten(
        node: BuildNode,
        nodes: &mut Vec<PackedNode>,
        leaves: &mut Vec<PackedLeaf>,
        prim_base: u32,
    ) -> ChildRef {
        match node.inner {
            BuildNodeInner::Interior { left, right } => {
                let offset = nodes.len();
                let bounds = [left.bounds, right.bounds];
                let visibility = [left.visibility, right.visibility];
                nodes.push(PackedNode::new(
                    bounds,
                    [ChildRef::SENTINEL; 2],
                    visibility,
                ));

                let left = Self::flatten(*left, nodes, leaves, prim_base);
                let right = Self::flatten(*right, nodes, leaves, prim_base);
                nodes[offset].children = [left, right];

                ChildRef::internal(offset as u32)
            }
            BuildNodeInner::Leaf {
                prim_offset,
                num_primitives,
                class,
            } => {
                let leaf = match class {
                    LeafClass::Primitive(prim_type) => {
                        let start = prim_base + prim_offset as u32;
                        PackedLeaf::primitives(start..start + num_primitives as u32, prim_type)
                    }
                    LeafClass::Instance { object, .. } => PackedLeaf::instance(object),
                };
                leaves.push(leaf);

                ChildRef::leaf(leaves.len() as u32 - 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::{LeafContent, NodeRef};
    use glam::vec3;
    use rand::prelude::*;
    use rand_xoshiro::Xoshiro256Plus;

    fn item(center: Vec3, prim_type: PrimitiveType) -> BuildItem {
        BuildItem {
            bounds: AABB::new(center - Vec3::splat(0.1), center + Vec3::splat(0.1)),
            class: LeafClass::Primitive(prim_type),
            visibility: Visibility::all(),
        }
    }

    fn collect(
        r: ChildRef,
        nodes: &[PackedNode],
        leaves: &[PackedLeaf],
        out: &mut Vec<LeafContent>,
    ) {
        match r.decode() {
            NodeRef::Internal(addr) => {
                let node = nodes[addr as usize];
                collect(node.children[0], nodes, leaves, out);
                collect(node.children[1], nodes, leaves, out);
            }
            NodeRef::Leaf(index) => out.push(leaves[index as usize].content()),
            NodeRef::Sentinel => panic!("sentinel inside the tree"),
        }
    }

    #[test]
    fn every_item_lands_in_exactly_one_slot() {
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let items: Vec<_> = (0..500)
            .map(|i| {
                let center = vec3(rng.gen(), rng.gen(), rng.gen()) * 10.0;
                let ty = if i % 3 == 0 {
                    PrimitiveType::Point
                } else {
                    PrimitiveType::Triangle
                };
                item(center, ty)
            })
            .collect();

        let (mut nodes, mut leaves) = (Vec::new(), Vec::new());
        let tree = Builder::new(&items, 4).build(&mut nodes, &mut leaves, 10);

        let mut order = tree.order.clone();
        order.sort_unstable();
        assert_eq!(order, (0..500).collect::<Vec<_>>());

        let mut contents = Vec::new();
        collect(tree.root, &nodes, &leaves, &mut contents);

        let mut covered = 0;
        for content in contents {
            match content {
                LeafContent::Primitives { range, prim_type } => {
                    assert!(range.len() <= 4);
                    for slot in range {
                        let index = tree.order[(slot - 10) as usize];
                        assert_eq!(items[index].class, LeafClass::Primitive(prim_type));
                        covered += 1;
                    }
                }
                LeafContent::Instance { .. } => panic!("no instances were added"),
            }
        }
        assert_eq!(covered, 500);
        assert!(tree.depth >= 7);
    }

    #[test]
    fn coincident_items_still_split() {
        let items = vec![item(Vec3::ZERO, PrimitiveType::Triangle); 9];
        let (mut nodes, mut leaves) = (Vec::new(), Vec::new());
        let tree = Builder::new(&items, 2).build(&mut nodes, &mut leaves, 0);

        assert_eq!(tree.order.len(), 9);
        assert!(leaves.len() >= 5);
        assert!(matches!(tree.root.decode(), NodeRef::Internal(0)));
    }

    #[test]
    fn single_item_is_a_leaf_root() {
        let items = vec![item(Vec3::ONE, PrimitiveType::Triangle)];
        let (mut nodes, mut leaves) = (Vec::new(), Vec::new());
        let tree = Builder::new(&items, 4).build(&mut nodes, &mut leaves, 0);

        assert!(nodes.is_empty());
        assert_eq!(tree.root.decode(), NodeRef::Leaf(0));
        assert_eq!(tree.depth, 0);
    }

    #[test]
    fn instances_get_their_own_leaves_and_depth() {
        let mut items = vec![item(Vec3::ZERO, PrimitiveType::Triangle); 2];
        items.push(BuildItem {
            bounds: AABB::new(Vec3::ZERO, Vec3::ONE),
            class: LeafClass::Instance { object: 3, depth: 5 },
            visibility: Visibility::CAMERA,
        });

        let (mut nodes, mut leaves) = (Vec::new(), Vec::new());
        let tree = Builder::new(&items, 4).build(&mut nodes, &mut leaves, 0);

        assert_eq!(tree.order.len(), 2);
        assert!(leaves.contains(&PackedLeaf::instance(3)));
        // One level above the instance, one boundary, five levels inside.
        assert!(tree.depth >= 7);
    }

    #[test]
    fn empty_input() {
        let (mut nodes, mut leaves) = (Vec::new(), Vec::new());
        let tree = Builder::new(&[], 4).build(&mut nodes, &mut leaves, 0);

        assert!(tree.root.is_sentinel());
        assert!(nodes.is_empty() && leaves.is_empty());
    }
}
