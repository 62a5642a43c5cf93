use std::path::PathBuf;
use thiserror::Error;

/// Problems found while turning geometry and objects into scene tables.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("object {object} refers to unknown geometry {geometry}")]
    UnknownGeometry { object: u32, geometry: u32 },
    #[error("geometry {geometry} has {found} motion keys, at least 2 are needed")]
    MissingKeys { geometry: u32, found: usize },
    #[error("geometry {geometry} has a key of {found} elements, expected {expected}")]
    KeyLength {
        geometry: u32,
        expected: usize,
        found: usize,
    },
    #[error("geometry {geometry} contains non-finite data")]
    NonFinite { geometry: u32 },
    #[error("object {object} has a transform that cannot be inverted")]
    SingularTransform { object: u32 },
    #[error("object {object} has a motion placement without keys")]
    EmptyMotion { object: u32 },
    #[error("geometry {geometry} has an invalid time window [{start}, {end}]")]
    InvalidTimeWindow { geometry: u32, start: f32, end: f32 },
    #[error("time segments must be at least 1")]
    ZeroTimeSegments,
    #[error("leaves must hold at least one primitive")]
    ZeroLeafSize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraversalError {
    #[error(
        "scene depth {depth} needs a stack of {required} entries, but the traversal only has {capacity}"
    )]
    StackTooShallow {
        depth: usize,
        required: usize,
        capacity: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
