//! BVH ray traversal for a path tracer.
//!
//! Scenes are flattened by [`scene::SceneBuilder`] into read-only tables, which
//! [`traversal::Traversal`] answers closest hit and occlusion queries against.

pub mod bvh;
pub mod camera;
pub mod config;
pub mod error;
pub mod primitives;
pub mod ray;
pub mod scene;
pub mod traversal;

pub use crate::{
    error::{ConfigError, SceneError, TraversalError},
    ray::{Intersection, Ray, Visibility, OBJECT_NONE, PRIM_NONE},
    scene::{BuildParams, Geometry, Placement, SceneBuilder, SceneData, SceneTables},
    traversal::{Traversal, TraversalStats, BVH_STACK_SIZE},
};

pub type DefaultRng = rand_xoshiro::Xoshiro256Plus;
