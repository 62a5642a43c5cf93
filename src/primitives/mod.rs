//! This module is full of primitives the traversal can intersect, and the dispatch
//! that picks the right test for a primitive type.

mod aabb;
pub mod curve;
pub mod instance;
pub mod point;
pub mod triangle;

pub use aabb::*;
pub use curve::CurveSegment;
pub use instance::{ObjectTransform, Transform};

use crate::{
    ray::{Intersection, LocalRay, Visibility},
    scene::SceneData,
};

/// Primitive type tags, stored per primitive and per leaf.
///
/// The values are distinct bits so masks of several types can be formed.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Triangle = 1 << 0,
    MotionTriangle = 1 << 1,
    CurveThick = 1 << 2,
    MotionCurveThick = 1 << 3,
    CurveRibbon = 1 << 4,
    MotionCurveRibbon = 1 << 5,
    Point = 1 << 7,
    MotionPoint = 1 << 8,
}

impl PrimitiveType {
    pub const MOTION: u32 = PrimitiveType::MotionTriangle as u32
        | PrimitiveType::MotionCurveThick as u32
        | PrimitiveType::MotionCurveRibbon as u32
        | PrimitiveType::MotionPoint as u32;
    pub const CURVE: u32 = PrimitiveType::CurveThick as u32
        | PrimitiveType::MotionCurveThick as u32
        | PrimitiveType::CurveRibbon as u32
        | PrimitiveType::MotionCurveRibbon as u32;
    pub const POINT: u32 = PrimitiveType::Point as u32 | PrimitiveType::MotionPoint as u32;

    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn is_motion(self) -> bool {
        self.bits() & Self::MOTION != 0
    }

    pub fn is_curve(self) -> bool {
        self.bits() & Self::CURVE != 0
    }

    pub fn is_ribbon(self) -> bool {
        matches!(
            self,
            PrimitiveType::CurveRibbon | PrimitiveType::MotionCurveRibbon
        )
    }

    pub fn is_point(self) -> bool {
        self.bits() & Self::POINT != 0
    }
}

/// Locate `time` between evenly spaced motion keys.
///
/// Returns the lower key and the blend factor towards the next one.
#[inline]
pub(crate) fn motion_step(steps: u32, time: f32) -> (u32, f32) {
    if steps <= 1 {
        return (0, 0.0);
    }

    let last = steps - 1;
    let t = time.clamp(0.0, 1.0) * last as f32;
    let step = (t as u32).min(last - 1);

    (step, t - step as f32)
}

/// Run the type-appropriate intersection test for one primitive.
///
/// Returns true when the test tightened `isect`.
#[allow(clippy::too_many_arguments)]
#[inline]
pub(crate) fn intersect<S: SceneData + ?Sized>(
    scene: &S,
    isect: &mut Intersection,
    ray: &LocalRay,
    prim_type: PrimitiveType,
    visibility: Visibility,
    object: u32,
    prim: u32,
    prim_addr: u32,
    time: f32,
) -> bool {
    if !scene.prim_visibility(prim_addr).intersects(visibility) {
        return false;
    }

    match prim_type {
        PrimitiveType::Triangle => triangle::triangle_intersect(scene, isect, ray, object, prim),
        PrimitiveType::MotionTriangle => {
            triangle::motion_triangle_intersect(scene, isect, ray, object, prim, time)
        }
        ty if ty.is_curve() => curve::curve_intersect(scene, isect, ray, object, prim, ty, time),
        ty => point::point_intersect(scene, isect, ray, object, prim, ty, time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_classes() {
        assert!(PrimitiveType::MotionCurveRibbon.is_curve());
        assert!(PrimitiveType::MotionCurveRibbon.is_motion());
        assert!(PrimitiveType::MotionCurveRibbon.is_ribbon());
        assert!(!PrimitiveType::CurveThick.is_motion());
        assert!(PrimitiveType::Point.is_point());
        assert!(!PrimitiveType::Triangle.is_point());
    }

    #[test]
    fn motion_steps_are_evenly_spaced() {
        assert_eq!(motion_step(1, 0.7), (0, 0.0));
        assert_eq!(motion_step(2, 0.25), (0, 0.25));
        assert_eq!(motion_step(3, 0.75), (1, 0.5));
        assert_eq!(motion_step(3, 1.0), (1, 1.0));
        assert_eq!(motion_step(3, -1.0), (0, 0.0));
    }
}
