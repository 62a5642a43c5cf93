use anyhow::{Context, Result};
use clap::Parser;
use glam::{vec3, vec4, Quat, Vec3};
use itertools::iproduct;
use pathtracer_bvh::{
    camera::Camera,
    config::RenderConfig,
    primitives::{CurveSegment, Transform},
    traversal::{Counters, TraversalStats},
    BuildParams, DefaultRng, Geometry, Placement, Ray, SceneBuilder, SceneData, SceneTables,
    Traversal, Visibility, OBJECT_NONE,
};
use rand::prelude::*;
use rayon::prelude::*;
use std::{path::PathBuf, time::Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static COLOR_CHANNELS: u32 = 3;
static GAMMA: f32 = 2.2;

#[derive(Parser)]
#[command(about = "Render a demo scene with the BVH traversal")]
struct Args {
    /// Path to a render config, defaults are used without one
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Where to write the image, overrides the config
    #[clap(short, long)]
    output: Option<PathBuf>,
}

// Eight faces around the origin, reused by every instance in the grid.
fn octahedron(radius: f32) -> Vec<[Vec3; 3]> {
    let axes = [Vec3::X, Vec3::Y, Vec3::Z];

    iproduct!([-1.0f32, 1.0], [-1.0f32, 1.0], [-1.0f32, 1.0])
        .map(|(x, y, z)| {
            let a = axes[0] * x * radius;
            let b = axes[1] * y * radius;
            let c = axes[2] * z * radius;
            // Keep the winding outward facing.
            if x * y * z > 0.0 {
                [a, b, c]
            } else {
                [a, c, b]
            }
        })
        .collect()
}

fn hair_tuft(rng: &mut DefaultRng, strands: usize, length: f32) -> Vec<CurveSegment> {
    (0..strands)
        .flat_map(|_| {
            let root = vec3(rng.gen_range(-0.8..0.8), 0.0, rng.gen_range(-0.8..0.8));
            let lean = vec3(rng.gen_range(-0.3..0.3), 1.0, rng.gen_range(-0.3..0.3)) * length * 0.5;
            let tip = root + 2.0 * lean + vec3(0.1, 0.0, 0.0);

            [
                CurveSegment::new(root, root + lean, 0.02),
                CurveSegment::new(root + lean, tip, 0.01),
            ]
        })
        .collect()
}

// Generate a semi random scene
fn random(config: &RenderConfig) -> Result<SceneTables> {
    let mut rng = DefaultRng::seed_from_u64(config.scene.seed);
    let mut builder = SceneBuilder::new(BuildParams {
        time_segments: config.scene.time_segments,
        ..Default::default()
    });

    // The ground
    let ground = builder.add_geometry(Geometry::triangles(vec![
        [vec3(-100.0, 0.0, -100.0), vec3(-100.0, 0.0, 100.0), vec3(100.0, 0.0, 100.0)],
        [vec3(-100.0, 0.0, -100.0), vec3(100.0, 0.0, 100.0), vec3(100.0, 0.0, -100.0)],
    ]));
    builder.add_object(ground, Placement::World);

    let small = builder.add_geometry(Geometry::triangles(octahedron(0.2)));
    let pebble = builder.add_geometry(Geometry::points(vec![vec4(0.0, 0.0, 0.0, 0.2)]));
    let tuft = builder.add_geometry(Geometry::ribbons(hair_tuft(&mut rng, 12, 0.25)));

    let half = config.scene.grid as i32 / 2;
    for (a, b) in iproduct!(-half..half, -half..half) {
        let kind = rng.gen::<f32>();
        let center = vec3(
            a as f32 + 0.9 * rng.gen::<f32>(),
            0.2,
            b as f32 + 0.9 * rng.gen::<f32>(),
        );

        if (center - vec3(4.0, 0.2, 0.0)).length() <= 0.9 {
            continue;
        }

        let rotation = Quat::from_rotation_y(rng.gen::<f32>() * std::f32::consts::TAU);
        let transform = Transform::new(center, rotation, Vec3::ONE);

        if kind < 0.5 {
            builder.add_object(small, Placement::Instance(transform));
        } else if kind < 0.7 {
            // Bouncing
            let lifted = Transform::new(center + vec3(0.0, rng.gen_range(0.1..0.5), 0.0), rotation, Vec3::ONE);
            builder.add_object(small, Placement::MotionInstance(vec![transform, lifted]));
        } else if kind < 0.9 {
            builder.add_object(pebble, Placement::Instance(transform));
        } else {
            let transform = Transform::new(center - vec3(0.0, 0.2, 0.0), rotation, Vec3::splat(0.5));
            builder.add_object(tuft, Placement::Instance(transform));
        }
    }

    let big = builder.add_geometry(Geometry::triangles(octahedron(1.0)));
    builder.add_object(big, Placement::Instance(Transform::from_translation(vec3(-4.0, 1.0, 0.0))));

    let cloud = (0..200)
        .map(|_| {
            let p = vec3(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            vec4(p.x, p.y + 1.0, p.z, 0.05)
        })
        .collect();
    let cloud = builder.add_geometry(Geometry::points(cloud));
    builder.add_object(cloud, Placement::World);

    let falling = octahedron(1.0)
        .into_iter()
        .map(|t| t.map(|v| v + vec3(4.0, 1.5, 0.0)))
        .collect::<Vec<_>>();
    let landed = falling
        .iter()
        .map(|t| t.map(|v| v - vec3(0.0, 0.5, 0.0)))
        .collect();
    let falling = builder.add_geometry(Geometry::motion_triangles(vec![falling, landed]));
    builder.add_object(falling, Placement::World);

    let scene = builder.build().context("Failed to build the demo scene")?;
    Ok(scene)
}

fn object_color(object: u32) -> Vec3 {
    if object == OBJECT_NONE || object == 0 {
        return vec3(0.5, 0.5, 0.5);
    }

    // Stable pseudo random color per object
    let mut rng = DefaultRng::seed_from_u64(object as u64);
    vec3(rng.gen(), rng.gen(), rng.gen()) * 0.8 + Vec3::splat(0.2)
}

// Computes the color of a sample based on a ray
// Returns color and raycount
fn color<C: Counters>(
    ray: &Ray,
    traversal: &Traversal<SceneTables>,
    light: Vec3,
    counters: &mut C,
) -> (Vec3, u32) {
    let mut isect = Default::default();
    if !traversal.intersect_counted(ray, &mut isect, counters) {
        // Sky
        let dir = ray.direction.normalize();
        let t = 0.5 * (dir.y + 1.0);
        return ((1.0 - t) * vec3(1.0, 1.0, 1.0) + t * vec3(0.5, 0.7, 1.0), 1);
    }

    let point = ray.point_at_parameter(isect.t) + light * 1e-3;
    let shadow = Ray::new(point, light)
        .with_time(ray.time)
        .with_visibility(Visibility::SHADOW_OPAQUE);
    let mut shadow_isect = Default::default();
    let lit = if traversal.intersect_counted(&shadow, &mut shadow_isect, counters) {
        0.3
    } else {
        1.0
    };

    (object_color(isect.object) * lit, 2)
}

fn trace<C: Counters + Default + Send>(
    config: &RenderConfig,
    traversal: &Traversal<SceneTables>,
) -> (Vec<u8>, u64, C) {
    let (width, height) = (config.width, config.height);
    let camera = Camera::new(config);
    let light = vec3(-0.4, 1.0, 0.6).normalize();

    let mut buffer = vec![0u8; (width * height * COLOR_CHANNELS) as usize];

    let (ray_count, counters) = buffer
        .par_chunks_mut((width * COLOR_CHANNELS) as usize)
        .rev()
        .enumerate()
        .map(|(y, row)| {
            let mut rng = DefaultRng::seed_from_u64(config.scene.seed ^ (y as u64) << 16);
            let mut counters = C::default();
            let mut ray_count = 0u64;

            for (i, pixel) in row.chunks_mut(COLOR_CHANNELS as usize).enumerate() {
                let mut out = Vec3::ZERO;

                // Antialiasing via multisampling
                for _ in 0..config.samples {
                    let u = (rng.gen::<f32>() + i as f32) / width as f32;
                    let v = (rng.gen::<f32>() + y as f32) / height as f32;

                    let ray = camera.ray(u, v, &mut rng);
                    let (sample, rays) = color(&ray, traversal, light, &mut counters);
                    out += sample;
                    ray_count += rays as u64;
                }

                out /= config.samples as f32;

                // Gamma correct
                out = out.powf(1.0 / GAMMA);

                // Convert from [0, 1] to [0, 256]
                pixel[0] = (255.99 * out.x) as u8;
                pixel[1] = (255.99 * out.y) as u8;
                pixel[2] = (255.99 * out.z) as u8;
            }

            (ray_count, counters)
        })
        .reduce(
            || (0, C::default()),
            |(rays_a, mut a), (rays_b, b)| {
                a.merge(b);
                (rays_a + rays_b, a)
            },
        );

    (buffer, ray_count, counters)
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    if let Some(output) = args.output {
        config.output = output;
    }

    let start = Instant::now();
    let scene = random(&config)?;
    info!("Scene built in {:.2?}", start.elapsed());

    let traversal = Traversal::new(&scene).context("Scene is too deep to traverse")?;

    let start = Instant::now();
    let (buffer, ray_count) = if config.stats {
        let (buffer, rays, stats) = trace::<TraversalStats>(&config, &traversal);
        info!(
            "Visited {} nodes and {} leaves, tested {} primitives, entered {} instances, \
             max stack {} of depth {}",
            stats.nodes,
            stats.leaves,
            stats.primitives,
            stats.instances,
            stats.max_stack,
            scene.max_depth()
        );
        (buffer, rays)
    } else {
        let (buffer, rays, ()) = trace::<()>(&config, &traversal);
        (buffer, rays)
    };

    let duration = start.elapsed();
    let rays = ray_count as f64 / 1_000_000.0;
    info!(
        "Time elapsed: {:.2?}, total rays: {:.2}M, rays per second: {:.2}M",
        duration,
        rays,
        rays / duration.as_secs_f64()
    );

    image::RgbImage::from_raw(config.width, config.height, buffer)
        .context("Image buffer has the wrong size")?
        .save(&config.output)
        .with_context(|| format!("Failed to save image to {:?}", config.output))?;
    info!("Saved {:?}", config.output);

    Ok(())
}
