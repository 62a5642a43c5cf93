//! Object space transforms used when the traversal enters and leaves an instance.

use crate::{
    primitives::AABB,
    ray::{LocalRay, Ray},
};
use glam::{Affine3A, Quat, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Blend two keys: translation and scale linearly, rotation along the shortest arc.
    pub fn lerp(&self, other: &Transform, t: f32) -> Self {
        Self {
            translation: self.translation.lerp(other.translation, t),
            rotation: self.rotation.slerp(other.rotation, t),
            scale: self.scale.lerp(other.scale, t),
        }
    }

    /// Whether the transform can be inverted without producing non-finite values.
    pub fn is_invertible(&self) -> bool {
        self.translation.is_finite()
            && self.rotation.is_finite()
            && self.rotation.length_squared() > 0.0
            && self.scale.is_finite()
            && self.scale.x != 0.0
            && self.scale.y != 0.0
            && self.scale.z != 0.0
    }
}

/// Placement of an instanced object, fixed or animated over the shutter interval.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectTransform {
    Static { tfm: Affine3A, itfm: Affine3A },
    /// Keys spread evenly over `[0, 1]`.
    Motion { keys: Vec<Transform> },
}

// Samples used to bound a moving instance in addition to its keys.
const MOTION_BOUND_SAMPLES: usize = 32;

impl ObjectTransform {
    pub fn fixed(transform: &Transform) -> Self {
        let tfm = transform.to_affine();

        ObjectTransform::Static {
            tfm,
            itfm: tfm.inverse(),
        }
    }

    pub fn motion(keys: Vec<Transform>) -> Self {
        ObjectTransform::Motion { keys }
    }

    pub fn is_motion(&self) -> bool {
        matches!(self, ObjectTransform::Motion { .. })
    }

    fn key_at(keys: &[Transform], time: f32) -> Transform {
        match keys {
            [] => Transform::default(),
            [only] => *only,
            _ => {
                let (step, frac) = super::motion_step(keys.len() as u32, time);
                let step = step as usize;
                keys[step].lerp(&keys[step + 1], frac)
            }
        }
    }

    /// Object to world transform at `time`, shutter open when `None`.
    pub fn forward_at(&self, time: Option<f32>) -> Affine3A {
        match self {
            ObjectTransform::Static { tfm, .. } => *tfm,
            ObjectTransform::Motion { keys } => {
                Self::key_at(keys, time.unwrap_or(0.0)).to_affine()
            }
        }
    }

    /// World to object transform at `time`, shutter open when `None`.
    pub fn inverse_at(&self, time: Option<f32>) -> Affine3A {
        match self {
            ObjectTransform::Static { itfm, .. } => *itfm,
            ObjectTransform::Motion { .. } => self.forward_at(time).inverse(),
        }
    }

    /// World space bounds of object space `bounds` over the whole shutter interval.
    ///
    /// Moving instances are bounded by their keys plus a fixed number of samples in
    /// between, then padded by a small fraction of the box size.
    pub fn bounds(&self, bounds: AABB) -> AABB {
        let transformed = |tfm: Affine3A| {
            bounds
                .corners()
                .iter()
                .fold(AABB::default(), |b, &p| b.point_union(tfm.transform_point3(p)))
        };

        match self {
            ObjectTransform::Static { tfm, .. } => transformed(*tfm),
            ObjectTransform::Motion { .. } => {
                let world = (0..=MOTION_BOUND_SAMPLES)
                    .map(|i| i as f32 / MOTION_BOUND_SAMPLES as f32)
                    .fold(AABB::default(), |b, time| {
                        b.union(transformed(self.forward_at(Some(time))))
                    });
                let pad = (world.max - world.min).max_element() * 1e-3;

                world.grow(pad)
            }
        }
    }
}

/// Move `ray` into object space.
///
/// The local direction is normalised, the returned factor converts parent space
/// distances to object space distances.
pub fn push_ray(itfm: &Affine3A, ray: &Ray) -> (LocalRay, f32) {
    let origin = itfm.transform_point3(ray.origin);
    let dir = itfm.transform_vector3(ray.direction);
    let len = dir.length();

    (LocalRay::new(origin, dir / len), len)
}

/// Restore the parent space ray and convert an object space distance back.
pub fn pop_ray(itfm: &Affine3A, ray: &Ray, t: f32) -> (LocalRay, f32) {
    let len = itfm.transform_vector3(ray.direction).length();

    (LocalRay::from(ray), t / len)
}
