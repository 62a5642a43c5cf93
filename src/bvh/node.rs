//! Flattened node storage and the node intersection test.
//!
//! Child references stay packed into an `i32` in memory and are decoded into
//! [`NodeRef`] on use:
//!
//! - `>= 0` addresses an internal node
//! - `< 0` addresses leaf `-raw - 1`
//! - [`ENTRYPOINT_SENTINEL`] is "no node", also the marker for an empty stack

use crate::{
    primitives::{PrimitiveType, AABB},
    ray::{LocalRay, Visibility},
};
use std::ops::Range;

pub const ENTRYPOINT_SENTINEL: i32 = 0x7654_3210;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChildRef(i32);

/// Decoded view of a [`ChildRef`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRef {
    Internal(u32),
    Leaf(u32),
    Sentinel,
}

impl ChildRef {
    pub const SENTINEL: ChildRef = ChildRef(ENTRYPOINT_SENTINEL);

    pub fn internal(addr: u32) -> Self {
        debug_assert!((addr as i32) >= 0 && addr as i32 != ENTRYPOINT_SENTINEL);
        ChildRef(addr as i32)
    }

    pub fn leaf(index: u32) -> Self {
        debug_assert!((index as i32) >= 0);
        ChildRef(-(index as i32) - 1)
    }

    #[inline]
    pub fn is_sentinel(self) -> bool {
        self.0 == ENTRYPOINT_SENTINEL
    }

    #[inline]
    pub fn decode(self) -> NodeRef {
        match self.0 {
            ENTRYPOINT_SENTINEL => NodeRef::Sentinel,
            addr if addr >= 0 => NodeRef::Internal(addr as u32),
            leaf => NodeRef::Leaf((-(leaf + 1)) as u32),
        }
    }
}

impl Default for ChildRef {
    fn default() -> Self {
        ChildRef::SENTINEL
    }
}

/// Which children of an internal node the ray entered, and where.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeHit {
    /// Bit `i` is set when child `i` was hit.
    pub mask: u32,
    /// Entry distance per child, only meaningful for children in `mask`.
    pub dist: [f32; 2],
}

/// An internal node: the bounds of both children side by side, so the slab test
/// for the pair runs in lockstep.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PackedNode {
    pub lo_x: [f32; 2],
    pub hi_x: [f32; 2],
    pub lo_y: [f32; 2],
    pub hi_y: [f32; 2],
    pub lo_z: [f32; 2],
    pub hi_z: [f32; 2],
    pub children: [ChildRef; 2],
    pub visibility: [u32; 2],
}

impl PackedNode {
    pub fn new(bounds: [AABB; 2], children: [ChildRef; 2], visibility: [Visibility; 2]) -> Self {
        let [a, b] = bounds;

        Self {
            lo_x: [a.min.x, b.min.x],
            hi_x: [a.max.x, b.max.x],
            lo_y: [a.min.y, b.min.y],
            hi_y: [a.max.y, b.max.y],
            lo_z: [a.min.z, b.min.z],
            hi_z: [a.max.z, b.max.z],
            children,
            visibility: [visibility[0].bits(), visibility[1].bits()],
        }
    }

    pub fn bounds(&self, child: usize) -> AABB {
        AABB::new(
            glam::vec3(self.lo_x[child], self.lo_y[child], self.lo_z[child]),
            glam::vec3(self.hi_x[child], self.hi_y[child], self.hi_z[child]),
        )
    }

    /// Slab test of both children against the ray interval `[0, t]`.
    ///
    /// Relies on `ray.inv_direction` being finite, see [`crate::ray::clamp_direction`].
    /// Children are culled when their visibility shares no bit with `visibility`.
    #[inline]
    pub fn intersect(&self, ray: &LocalRay, t: f32, visibility: Visibility) -> NodeHit {
        let o = ray.origin;
        let idir = ray.inv_direction;

        let mut mask = 0;
        let mut dist = [0.0; 2];

        for i in 0..2 {
            let lo_x = (self.lo_x[i] - o.x) * idir.x;
            let hi_x = (self.hi_x[i] - o.x) * idir.x;
            let lo_y = (self.lo_y[i] - o.y) * idir.y;
            let hi_y = (self.hi_y[i] - o.y) * idir.y;
            let lo_z = (self.lo_z[i] - o.z) * idir.z;
            let hi_z = (self.hi_z[i] - o.z) * idir.z;

            let near = lo_x
                .min(hi_x)
                .max(lo_y.min(hi_y))
                .max(lo_z.min(hi_z))
                .max(0.0);
            let far = lo_x
                .max(hi_x)
                .min(lo_y.max(hi_y))
                .min(lo_z.max(hi_z))
                .min(t);

            dist[i] = near;
            if far >= near && self.visibility[i] & visibility.bits() != 0 {
                mask |= 1 << i;
            }
        }

        NodeHit { mask, dist }
    }
}

/// A leaf: a primitive range of a single type, or an instance marker.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PackedLeaf {
    prim_start: i32,
    prim_end: i32,
    prim_type: PrimitiveType,
}

/// Decoded view of a [`PackedLeaf`].
#[derive(Clone, Debug, PartialEq)]
pub enum LeafContent {
    Primitives {
        range: Range<u32>,
        prim_type: PrimitiveType,
    },
    Instance {
        object: u32,
    },
}

impl PackedLeaf {
    pub fn primitives(range: Range<u32>, prim_type: PrimitiveType) -> Self {
        debug_assert!(range.start <= range.end);

        Self {
            prim_start: range.start as i32,
            prim_end: range.end as i32,
            prim_type,
        }
    }

    pub fn instance(object: u32) -> Self {
        Self {
            prim_start: -(object as i32) - 1,
            prim_end: 0,
            prim_type: PrimitiveType::Triangle,
        }
    }

    #[inline]
    pub fn content(&self) -> LeafContent {
        if self.prim_start >= 0 {
            LeafContent::Primitives {
                range: self.prim_start as u32..self.prim_end as u32,
                prim_type: self.prim_type,
            }
        } else {
            LeafContent::Instance {
                object: (-(self.prim_start + 1)) as u32,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::{vec3, Vec3};

    fn unit_box(offset: Vec3) -> AABB {
        AABB::new(offset, offset + Vec3::ONE)
    }

    fn pair() -> PackedNode {
        PackedNode::new(
            [unit_box(vec3(2.0, 0.0, 0.0)), unit_box(vec3(5.0, 0.0, 0.0))],
            [ChildRef::internal(1), ChildRef::leaf(0)],
            [Visibility::all(), Visibility::CAMERA],
        )
    }

    #[test]
    fn child_ref_encoding() {
        assert_eq!(ChildRef::internal(0).decode(), NodeRef::Internal(0));
        assert_eq!(ChildRef::internal(41).decode(), NodeRef::Internal(41));
        assert_eq!(ChildRef::leaf(0).decode(), NodeRef::Leaf(0));
        assert_eq!(ChildRef::leaf(41).decode(), NodeRef::Leaf(41));
        assert_eq!(ChildRef::leaf(0).0, -1);
        assert_eq!(ChildRef::SENTINEL.decode(), NodeRef::Sentinel);
        assert_eq!(ChildRef::default(), ChildRef::SENTINEL);
    }

    #[test]
    fn leaf_encoding() {
        let leaf = PackedLeaf::primitives(4..9, PrimitiveType::Point);
        assert_eq!(
            leaf.content(),
            LeafContent::Primitives {
                range: 4..9,
                prim_type: PrimitiveType::Point
            }
        );

        assert_eq!(PackedLeaf::instance(0).content(), LeafContent::Instance { object: 0 });
        assert_eq!(PackedLeaf::instance(17).content(), LeafContent::Instance { object: 17 });
    }

    #[test]
    fn both_children_with_entry_distances() {
        let ray = LocalRay::new(vec3(0.0, 0.5, 0.5), Vec3::X);
        let hit = pair().intersect(&ray, f32::INFINITY, Visibility::CAMERA);

        assert_eq!(hit.mask, 0b11);
        assert_relative_eq!(hit.dist[0], 2.0);
        assert_relative_eq!(hit.dist[1], 5.0);
    }

    #[test]
    fn culls_beyond_best_distance() {
        let ray = LocalRay::new(vec3(0.0, 0.5, 0.5), Vec3::X);

        assert_eq!(pair().intersect(&ray, 4.0, Visibility::CAMERA).mask, 0b01);
        assert_eq!(pair().intersect(&ray, 1.5, Visibility::CAMERA).mask, 0);
    }

    #[test]
    fn culls_by_visibility() {
        let ray = LocalRay::new(vec3(0.0, 0.5, 0.5), Vec3::X);
        let hit = pair().intersect(&ray, f32::INFINITY, Visibility::DIFFUSE);

        assert_eq!(hit.mask, 0b01);
    }

    #[test]
    fn axis_parallel_rays() {
        // Direction has exact zeros in y and z, the origin lies inside those slabs.
        let inside = LocalRay::new(vec3(0.0, 0.25, 0.75), Vec3::X);
        assert_eq!(pair().intersect(&inside, f32::INFINITY, Visibility::all()).mask, 0b11);

        // Outside the y slab the zero component can never bring the ray in.
        let outside = LocalRay::new(vec3(0.0, 1.5, 0.5), Vec3::X);
        assert_eq!(pair().intersect(&outside, f32::INFINITY, Visibility::all()).mask, 0);

        let negative = LocalRay::new(vec3(10.0, 0.5, 0.5), -Vec3::X);
        let hit = pair().intersect(&negative, f32::INFINITY, Visibility::all());
        assert_eq!(hit.mask, 0b11);
        assert_relative_eq!(hit.dist[1], 4.0);
        assert_relative_eq!(hit.dist[0], 7.0);
    }

    #[test]
    fn origin_inside_starts_at_zero() {
        let ray = LocalRay::new(vec3(2.5, 0.5, 0.5), vec3(0.0, 1.0, 0.0));
        let hit = pair().intersect(&ray, f32::INFINITY, Visibility::all());

        assert_eq!(hit.mask, 0b01);
        assert_eq!(hit.dist[0], 0.0);
    }
}
