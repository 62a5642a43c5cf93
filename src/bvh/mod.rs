//! Flattened BVH storage shared by the builder and the traversal.

pub(crate) mod build;
mod node;

pub use node::*;
