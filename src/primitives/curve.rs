//! Hair curves as linear segments, intersected either as thick tubes (capsules)
//! or as flat ribbons that always face the ray.

use crate::{
    primitives::{motion_step, PrimitiveType, AABB},
    ray::{Intersection, LocalRay},
    scene::SceneData,
};
use glam::Vec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurveSegment {
    pub p0: Vec3,
    pub p1: Vec3,
    pub radius: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurveHit {
    pub t: f32,
    /// Parameter along the segment in `[0, 1]`.
    pub u: f32,
    /// Signed offset across a ribbon in `[-1, 1]`, zero for thick curves.
    pub v: f32,
}

impl CurveSegment {
    pub fn new(p0: Vec3, p1: Vec3, radius: f32) -> Self {
        Self { p0, p1, radius }
    }

    pub fn bounds(&self) -> AABB {
        AABB::new(self.p0.min(self.p1), self.p0.max(self.p1)).grow(self.radius)
    }

    pub fn lerp(&self, other: &CurveSegment, t: f32) -> Self {
        Self {
            p0: self.p0.lerp(other.p0, t),
            p1: self.p1.lerp(other.p1, t),
            radius: self.radius + (other.radius - self.radius) * t,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.p0.is_finite() && self.p1.is_finite() && self.radius.is_finite() && self.radius >= 0.0
    }
}

// Roots of a*t^2 + 2*b*t + c with a > 0, smaller first.
fn roots(a: f32, b: f32, c: f32) -> Option<(f32, f32)> {
    let h = b * b - a * c;
    if h < 0.0 {
        return None;
    }

    let h = h.sqrt();
    Some(((-b - h) / a, (-b + h) / a))
}

/// Intersect a capsule around the segment.
///
/// Works on a unit direction internally, the returned `t` is in units of `dir`.
pub fn intersect_thick(origin: Vec3, dir: Vec3, curve: &CurveSegment, t_max: f32) -> Option<CurveHit> {
    let len = dir.length();
    if !(len > 0.0) {
        return None;
    }
    let rd = dir / len;
    let r2 = curve.radius * curve.radius;

    let ba = curve.p1 - curve.p0;
    let oa = origin - curve.p0;
    let baba = ba.dot(ba);
    let bard = ba.dot(rd);
    let baoa = ba.dot(oa);

    // Smallest positive root over the tube body and both end caps is the first
    // boundary crossing when the origin is outside.
    let mut best: Option<(f32, f32)> = None;
    let mut consider = |t: f32, u: f32| {
        if t > 0.0 && t / len < t_max && best.map_or(true, |(b, _)| t < b) {
            best = Some((t, u));
        }
    };

    let a = baba - bard * bard;
    if baba > 0.0 && a > 1e-6 * baba {
        let b = baba * rd.dot(oa) - baoa * bard;
        let c = baba * oa.dot(oa) - baoa * baoa - r2 * baba;
        if let Some((t0, t1)) = roots(a, b, c) {
            for t in [t0, t1] {
                let y = baoa + t * bard;
                if y > 0.0 && y < baba {
                    consider(t, y / baba);
                }
            }
        }
    }

    for (center, u) in [(curve.p0, 0.0), (curve.p1, 1.0)] {
        let oc = origin - center;
        if let Some((t0, t1)) = roots(1.0, rd.dot(oc), oc.dot(oc) - r2) {
            consider(t0, u);
            consider(t1, u);
        }
    }

    best.map(|(t, u)| CurveHit { t: t / len, u, v: 0.0 })
}

/// Intersect a flat ribbon of width `2 * radius` oriented towards the ray.
pub fn intersect_ribbon(origin: Vec3, dir: Vec3, curve: &CurveSegment, t_max: f32) -> Option<CurveHit> {
    let len = dir.length();
    if !(len > 0.0) {
        return None;
    }
    let rd = dir / len;

    let ba = curve.p1 - curve.p0;
    let w0 = origin - curve.p0;
    let b = rd.dot(ba);
    let c = ba.dot(ba);
    let d = rd.dot(w0);
    let e = ba.dot(w0);

    // Edge-on ribbons have no area.
    let denom = c - b * b;
    if !(c > 0.0) || denom <= 1e-6 * c {
        return None;
    }

    let w = ((e - b * d) / denom).clamp(0.0, 1.0);
    let on_curve = curve.p0 + w * ba;
    let s = rd.dot(on_curve - origin);
    if !(s > 0.0 && s / len < t_max) {
        return None;
    }

    let offset = origin + s * rd - on_curve;
    let distance = offset.length();
    if distance > curve.radius {
        return None;
    }

    let side = rd.cross(ba).dot(offset).signum();
    let v = if curve.radius > 0.0 {
        side * distance / curve.radius
    } else {
        0.0
    };

    Some(CurveHit { t: s / len, u: w, v })
}

/// Fetch a (possibly moving) curve segment at `time`.
pub fn curve_at<S: SceneData + ?Sized>(scene: &S, prim: u32, time: f32) -> CurveSegment {
    let (step, frac) = motion_step(scene.curve_steps(prim), time);
    if frac == 0.0 {
        return scene.curve(prim, step);
    }

    scene
        .curve(prim, step)
        .lerp(&scene.curve(prim, step + 1), frac)
}

pub(crate) fn curve_intersect<S: SceneData + ?Sized>(
    scene: &S,
    isect: &mut Intersection,
    ray: &LocalRay,
    object: u32,
    prim: u32,
    curve_type: PrimitiveType,
    time: f32,
) -> bool {
    let curve = if curve_type.is_motion() {
        curve_at(scene, prim, time)
    } else {
        scene.curve(prim, 0)
    };

    let hit = if curve_type.is_ribbon() {
        intersect_ribbon(ray.origin, ray.direction, &curve, isect.t)
    } else {
        intersect_thick(ray.origin, ray.direction, &curve, isect.t)
    };

    match hit {
        Some(hit) => isect.record(hit.t, hit.u, hit.v, prim, object, curve_type),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::vec3;

    fn strand() -> CurveSegment {
        CurveSegment::new(vec3(0.0, -1.0, 0.0), vec3(0.0, 1.0, 0.0), 0.25)
    }

    #[test]
    fn thick_body_hit() {
        let hit = intersect_thick(vec3(0.0, 0.5, -2.0), Vec3::Z, &strand(), f32::INFINITY).unwrap();

        assert_relative_eq!(hit.t, 1.75, epsilon = 1e-5);
        assert_relative_eq!(hit.u, 0.75, epsilon = 1e-5);
    }

    #[test]
    fn thick_cap_hit_along_axis() {
        let hit = intersect_thick(vec3(0.0, -3.0, 0.0), Vec3::Y * 2.0, &strand(), f32::INFINITY)
            .unwrap();

        // Enters the lower cap at y = -1.25, in units of the unnormalised direction.
        assert_relative_eq!(hit.t, 0.875, epsilon = 1e-5);
        assert_eq!(hit.u, 0.0);
    }

    #[test]
    fn thick_miss_and_range() {
        let curve = strand();
        assert!(intersect_thick(vec3(0.5, 0.0, -2.0), Vec3::Z, &curve, f32::INFINITY).is_none());
        assert!(intersect_thick(vec3(0.0, 0.0, -2.0), Vec3::Z, &curve, 1.0).is_none());
        assert!(intersect_thick(vec3(0.0, 0.0, -2.0), -Vec3::Z, &curve, f32::INFINITY).is_none());
    }

    #[test]
    fn ribbon_hit_has_signed_offset() {
        let curve = strand();
        let left = intersect_ribbon(vec3(-0.1, 0.0, -2.0), Vec3::Z, &curve, f32::INFINITY).unwrap();
        let right = intersect_ribbon(vec3(0.1, 0.0, -2.0), Vec3::Z, &curve, f32::INFINITY).unwrap();

        assert_relative_eq!(left.t, 2.0, epsilon = 1e-5);
        assert_relative_eq!(left.u, 0.5, epsilon = 1e-5);
        assert_relative_eq!(left.v.abs(), 0.4, epsilon = 1e-5);
        assert_eq!(left.v.signum(), -right.v.signum());
    }

    #[test]
    fn ribbon_edge_on_and_outside() {
        let curve = strand();
        assert!(intersect_ribbon(vec3(0.0, -3.0, 0.0), Vec3::Y, &curve, f32::INFINITY).is_none());
        assert!(intersect_ribbon(vec3(0.3, 0.0, -2.0), Vec3::Z, &curve, f32::INFINITY).is_none());
    }

    #[test]
    fn bounds_include_radius() {
        let b = strand().bounds();
        assert_eq!(b.min, vec3(-0.25, -1.25, -0.25));
        assert_eq!(b.max, vec3(0.25, 1.25, 0.25));
    }
}
