use crate::primitives::PrimitiveType;
use bitflags::bitflags;
use glam::{vec3, Vec3};

/// Marks an unset primitive id in an [`Intersection`].
pub const PRIM_NONE: u32 = u32::MAX;
/// Marks an unset object id, both in an [`Intersection`] and for the
/// "no active instance" state of a traversal.
pub const OBJECT_NONE: u32 = u32::MAX;

// Smallest direction component magnitude that survives inversion as a finite number.
const OOEPS: f32 = 8.271_806e-25;

bitflags! {
    /// Which categories of geometry a ray may intersect, plus the shadow-mode flags.
    ///
    /// The same mask type is stored per primitive and per node child, a candidate is
    /// only considered when the two masks share at least one bit.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Visibility: u32 {
        const CAMERA = 1 << 0;
        const REFLECT = 1 << 1;
        const TRANSMIT = 1 << 2;
        const DIFFUSE = 1 << 3;
        const GLOSSY = 1 << 4;
        const SINGULAR = 1 << 5;
        const TRANSPARENT = 1 << 6;
        const VOLUME_SCATTER = 1 << 7;
        /// Any qualifying hit terminates the traversal.
        const SHADOW_OPAQUE = 1 << 8;
        const SHADOW_TRANSPARENT = 1 << 9;

        const SHADOW = Self::SHADOW_OPAQUE.bits() | Self::SHADOW_TRANSPARENT.bits();
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::all()
    }
}

/// The ray data type
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Exclusive upper bound of the valid distance range `[0, t_max)`.
    pub t_max: f32,
    /// Shutter-relative time in `[0, 1]`, used by motion blur.
    pub time: f32,
    pub visibility: Visibility,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        debug_assert!(origin.is_finite());
        debug_assert!(direction.is_finite());

        Self {
            origin,
            direction,
            t_max: f32::INFINITY,
            time: 0.0,
            visibility: Visibility::all() - Visibility::SHADOW,
        }
    }

    pub fn with_t_max(mut self, t_max: f32) -> Self {
        self.t_max = t_max;
        self
    }

    pub fn with_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn point_at_parameter(&self, t: f32) -> Vec3 {
        self.origin + t * self.direction
    }

    /// Whether the ray can hit anything at all.
    ///
    /// Zero or non-finite directions, non-finite origins and empty distance ranges
    /// are rejected here instead of inside the slab tests.
    pub fn is_degenerate(&self) -> bool {
        !(self.t_max > 0.0)
            || !self.origin.is_finite()
            || !self.direction.is_finite()
            || self.direction == Vec3::ZERO
    }
}

/// Replace near-zero direction components so their inverse stays finite.
#[inline]
pub fn clamp_direction(dir: Vec3) -> Vec3 {
    #[inline]
    fn clamp(x: f32) -> f32 {
        if x.abs() > OOEPS {
            x
        } else {
            OOEPS.copysign(x)
        }
    }

    vec3(clamp(dir.x), clamp(dir.y), clamp(dir.z))
}

#[inline]
pub fn inverse_direction(dir: Vec3) -> Vec3 {
    vec3(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z)
}

/// The ray as seen by the traversal registers, in the space currently being traversed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalRay {
    pub origin: Vec3,
    pub direction: Vec3,
    pub inv_direction: Vec3,
}

impl LocalRay {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        let direction = clamp_direction(direction);

        Self {
            origin,
            direction,
            inv_direction: inverse_direction(direction),
        }
    }
}

impl From<&Ray> for LocalRay {
    fn from(ray: &Ray) -> Self {
        LocalRay::new(ray.origin, ray.direction)
    }
}

/// The result record of a closest-hit query.
///
/// Starts out as "no hit" with `t` at the ray's `t_max` and is only ever tightened.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    pub prim: u32,
    pub object: u32,
    pub prim_type: Option<PrimitiveType>,
}

impl Intersection {
    pub fn none(t_max: f32) -> Self {
        Self {
            t: t_max,
            u: 0.0,
            v: 0.0,
            prim: PRIM_NONE,
            object: OBJECT_NONE,
            prim_type: None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.prim != PRIM_NONE
    }

    /// Record a candidate hit if it is strictly closer than the current best.
    ///
    /// Equal distances keep the earlier primitive.
    #[inline]
    pub fn record(
        &mut self,
        t: f32,
        u: f32,
        v: f32,
        prim: u32,
        object: u32,
        prim_type: PrimitiveType,
    ) -> bool {
        if t < self.t {
            *self = Self {
                t,
                u,
                v,
                prim,
                object,
                prim_type: Some(prim_type),
            };
            true
        } else {
            false
        }
    }
}

impl Default for Intersection {
    fn default() -> Self {
        Self::none(f32::INFINITY)
    }
}
