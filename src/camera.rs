use crate::{
    config::RenderConfig,
    ray::{Ray, Visibility},
};
use glam::Vec3;
use rand::Rng;
use rand_distr::{Distribution, UnitDisc};

/// Thin lens camera focused on its target.
#[derive(Clone, Debug)]
pub struct Camera {
    origin: Vec3,
    lower_left_corner: Vec3,
    horizontal: Vec3,
    vertical: Vec3,
    u: Vec3,
    v: Vec3,
    lens_radius: f32,
    /// Sample ray times over the open shutter instead of always using time 0.
    shutter: bool,
}

impl Camera {
    pub fn new(config: &RenderConfig) -> Self {
        let camera = &config.camera;
        let (eye, target) = (camera.eye(), camera.target());

        // Looking down -w, with the image plane at the focus distance.
        let w = (eye - target).normalize();
        let u = camera.up().cross(w).normalize();
        let v = w.cross(u);

        let focus = eye.distance(target);
        let half_v = (camera.fov.to_radians() * 0.5).tan() * focus;
        let half_u = config.aspect() * half_v;

        Self {
            origin: eye,
            lower_left_corner: eye - half_u * u - half_v * v - focus * w,
            horizontal: 2.0 * half_u * u,
            vertical: 2.0 * half_v * v,
            u,
            v,
            lens_radius: camera.aperture * 0.5,
            shutter: config.shutter,
        }
    }

    /// Camera ray through `(s, t)` in `[0, 1]^2` of the image plane.
    pub fn ray<R: Rng + ?Sized>(&self, s: f32, t: f32, rng: &mut R) -> Ray {
        let [x, y]: [f32; 2] = UnitDisc.sample(rng);
        let offset = self.lens_radius * (self.u * x + self.v * y);
        let time = if self.shutter { rng.gen::<f32>() } else { 0.0 };

        Ray::new(
            self.origin + offset,
            self.lower_left_corner + s * self.horizontal + t * self.vertical - self.origin - offset,
        )
        .with_time(time)
        .with_visibility(Visibility::CAMERA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn config(aperture: f32, shutter: bool) -> RenderConfig {
        RenderConfig {
            shutter,
            camera: CameraConfig {
                aperture,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn center_ray_points_at_target() {
        let config = config(0.0, false);
        let camera = Camera::new(&config);
        let mut rng = Xoshiro256Plus::seed_from_u64(1);

        let ray = camera.ray(0.5, 0.5, &mut rng);
        let to_target = (config.camera.target() - ray.origin).normalize();
        assert_relative_eq!(ray.direction.normalize().dot(to_target), 1.0, epsilon = 1e-5);
        assert_eq!(ray.origin, config.camera.eye());
        assert_eq!(ray.time, 0.0);
        assert_eq!(ray.visibility, Visibility::CAMERA);
    }

    #[test]
    fn shutter_times_stay_in_range() {
        let config = config(0.1, true);
        let camera = Camera::new(&config);
        let mut rng = Xoshiro256Plus::seed_from_u64(2);

        for _ in 0..100 {
            let ray = camera.ray(0.3, 0.7, &mut rng);
            assert!((0.0..1.0).contains(&ray.time));
            assert!((ray.origin - config.camera.eye()).length() <= 0.05 + 1e-6);
        }
    }
}
