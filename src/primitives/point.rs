use crate::{
    primitives::{motion_step, PrimitiveType, AABB},
    ray::{Intersection, LocalRay},
    scene::SceneData,
};
use glam::{Vec3, Vec4, Vec4Swizzles};

/// Point cloud primitives are spheres, stored as `(center, radius)` in a `Vec4`.
pub fn bounds(point: Vec4) -> AABB {
    let center = point.xyz();
    let radius = Vec3::splat(point.w);

    AABB::new(center - radius, center + radius)
}

pub fn intersect(origin: Vec3, dir: Vec3, point: Vec4, t_max: f32) -> Option<f32> {
    let center = point.xyz();
    let radius = point.w;

    let oc = origin - center;
    let a = dir.dot(dir);
    let b = oc.dot(dir);
    let c = oc.dot(oc) - radius * radius;
    let discriminant = b * b - a * c;

    if discriminant > 0.0 {
        let sqrt = discriminant.sqrt();
        let t_1 = (-b - sqrt) / a;
        let t_2 = (-b + sqrt) / a;

        for t in [t_1, t_2] {
            if 0.0 < t && t < t_max {
                return Some(t);
            }
        }
    }

    None
}

pub fn point_at<S: SceneData + ?Sized>(scene: &S, prim: u32, time: f32) -> Vec4 {
    let (step, frac) = motion_step(scene.point_steps(prim), time);
    if frac == 0.0 {
        return scene.point(prim, step);
    }

    scene.point(prim, step).lerp(scene.point(prim, step + 1), frac)
}

pub(crate) fn point_intersect<S: SceneData + ?Sized>(
    scene: &S,
    isect: &mut Intersection,
    ray: &LocalRay,
    object: u32,
    prim: u32,
    point_type: PrimitiveType,
    time: f32,
) -> bool {
    let point = if point_type.is_motion() {
        point_at(scene, prim, time)
    } else {
        scene.point(prim, 0)
    };

    match intersect(ray.origin, ray.direction, point, isect.t) {
        Some(t) => isect.record(t, 0.0, 0.0, prim, object, point_type),
        None => false,
    }
}
