use crate::{
    primitives::{motion_step, PrimitiveType, AABB},
    ray::{Intersection, LocalRay},
    scene::SceneData,
};
use glam::Vec3;

/// Distance and barycentrics of a ray/triangle hit, `P = (1 - u - v) * v0 + u * v1 + v * v2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

pub fn bounds(verts: &[Vec3; 3]) -> AABB {
    verts
        .iter()
        .fold(AABB::default(), |b, &p| b.point_union(p))
}

pub fn lerp(a: &[Vec3; 3], b: &[Vec3; 3], t: f32) -> [Vec3; 3] {
    [a[0].lerp(b[0], t), a[1].lerp(b[1], t), a[2].lerp(b[2], t)]
}

// Index of the largest component
fn max_dim(v: Vec3) -> usize {
    if v.x > v.y && v.x > v.z {
        0
    } else if v.y > v.z {
        1
    } else {
        2
    }
}

/// Watertight ray/triangle intersection (Woop, Benthin and Wald, JCGT 2013).
///
/// Edges shared by two triangles are never missed by both of them. Accepts hits
/// with `0 < t < t_max` only.
pub fn intersect(origin: Vec3, dir: Vec3, verts: &[Vec3; 3], t_max: f32) -> Option<TriangleHit> {
    // Permute so the dominant direction axis becomes z, keeping the winding.
    let kz = max_dim(dir.abs());
    let mut kx = (kz + 1) % 3;
    let mut ky = (kx + 1) % 3;
    if dir[kz] < 0.0 {
        std::mem::swap(&mut kx, &mut ky);
    }

    let sz = 1.0 / dir[kz];
    let sx = dir[kx] * sz;
    let sy = dir[ky] * sz;

    let a = verts[0] - origin;
    let b = verts[1] - origin;
    let c = verts[2] - origin;

    let ax = a[kx] - sx * a[kz];
    let ay = a[ky] - sy * a[kz];
    let bx = b[kx] - sx * b[kz];
    let by = b[ky] - sy * b[kz];
    let cx = c[kx] - sx * c[kz];
    let cy = c[ky] - sy * c[kz];

    let mut e0 = cx * by - cy * bx;
    let mut e1 = ax * cy - ay * cx;
    let mut e2 = bx * ay - by * ax;

    // Exactly zero edge functions are re-evaluated in double precision.
    if e0 == 0.0 || e1 == 0.0 || e2 == 0.0 {
        let (ax, ay) = (ax as f64, ay as f64);
        let (bx, by) = (bx as f64, by as f64);
        let (cx, cy) = (cx as f64, cy as f64);
        e0 = (cx * by - cy * bx) as f32;
        e1 = (ax * cy - ay * cx) as f32;
        e2 = (bx * ay - by * ax) as f32;
    }

    if (e0 < 0.0 || e1 < 0.0 || e2 < 0.0) && (e0 > 0.0 || e1 > 0.0 || e2 > 0.0) {
        return None;
    }

    let det = e0 + e1 + e2;
    if det == 0.0 {
        return None;
    }

    let az = sz * a[kz];
    let bz = sz * b[kz];
    let cz = sz * c[kz];
    let t_scaled = e0 * az + e1 * bz + e2 * cz;

    let rcp_det = 1.0 / det;
    let t = t_scaled * rcp_det;
    if !(t > 0.0 && t < t_max) {
        return None;
    }

    Some(TriangleHit {
        t,
        u: e1 * rcp_det,
        v: e2 * rcp_det,
    })
}

/// Fetch the vertices of a motion triangle at `time`.
pub fn motion_vertices<S: SceneData + ?Sized>(scene: &S, prim: u32, time: f32) -> [Vec3; 3] {
    let (step, frac) = motion_step(scene.triangle_steps(prim), time);
    if frac == 0.0 {
        return scene.triangle(prim, step);
    }

    lerp(
        &scene.triangle(prim, step),
        &scene.triangle(prim, step + 1),
        frac,
    )
}

pub(crate) fn triangle_intersect<S: SceneData + ?Sized>(
    scene: &S,
    isect: &mut Intersection,
    ray: &LocalRay,
    object: u32,
    prim: u32,
) -> bool {
    let verts = scene.triangle(prim, 0);

    match intersect(ray.origin, ray.direction, &verts, isect.t) {
        Some(hit) => isect.record(hit.t, hit.u, hit.v, prim, object, PrimitiveType::Triangle),
        None => false,
    }
}

pub(crate) fn motion_triangle_intersect<S: SceneData + ?Sized>(
    scene: &S,
    isect: &mut Intersection,
    ray: &LocalRay,
    object: u32,
    prim: u32,
    time: f32,
) -> bool {
    let verts = motion_vertices(scene, prim, time);

    match intersect(ray.origin, ray.direction, &verts, isect.t) {
        Some(hit) => isect.record(
            hit.t,
            hit.u,
            hit.v,
            prim,
            object,
            PrimitiveType::MotionTriangle,
        ),
        None => false,
    }
}
