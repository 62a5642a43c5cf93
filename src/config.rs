use crate::error::ConfigError;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    /// Sample ray times over the shutter interval, enables motion blur.
    pub shutter: bool,
    pub output: PathBuf,
    /// Count traversal work and log it after rendering.
    pub stats: bool,
    pub camera: CameraConfig,
    pub scene: SceneConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
    pub fov: f32,
    pub aperture: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Instances per side of the instance grid.
    pub grid: u32,
    pub time_segments: u32,
    pub seed: u64,
}

impl RenderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let string = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::from_toml(&string)?;
        info!("Loaded config from {:?}", path);

        Ok(config)
    }

    pub fn from_toml(string: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(string)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid("image size must not be zero".into()));
        }
        if self.samples == 0 {
            return Err(ConfigError::Invalid("samples must be at least 1".into()));
        }
        if self.scene.time_segments == 0 {
            return Err(ConfigError::Invalid("time_segments must be at least 1".into()));
        }
        if !(self.camera.fov > 0.0 && self.camera.fov < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "fov must be between 0 and 180 degrees, got {}",
                self.camera.fov
            )));
        }
        if self.camera.eye == self.camera.target {
            return Err(ConfigError::Invalid("camera eye and target coincide".into()));
        }

        Ok(())
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

impl CameraConfig {
    pub fn eye(&self) -> Vec3 {
        Vec3::from(self.eye)
    }

    pub fn target(&self) -> Vec3 {
        Vec3::from(self.target)
    }

    pub fn up(&self) -> Vec3 {
        Vec3::from(self.up)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 960,
            height: 540,
            samples: 4,
            shutter: true,
            output: PathBuf::from("output.png"),
            stats: false,
            camera: CameraConfig::default(),
            scene: SceneConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            eye: [13.0, 2.0, 3.0],
            target: [4.0, 1.0, 0.0],
            up: [0.0, 1.0, 0.0],
            fov: 20.0,
            aperture: 0.1,
        }
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            grid: 24,
            time_segments: 2,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config = RenderConfig::from_toml(
            r#"
            width = 320
            samples = 16

            [scene]
            grid = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.width, 320);
        assert_eq!(config.height, 540);
        assert_eq!(config.samples, 16);
        assert_eq!(config.scene.grid, 4);
        assert_eq!(config.scene.time_segments, 2);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn empty_config_is_the_default() {
        assert_eq!(RenderConfig::from_toml("").unwrap(), RenderConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            RenderConfig::from_toml("samples = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml("[camera]\nfov = 190.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml("width = \"wide\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file() {
        let err = RenderConfig::load(Path::new("/nonexistent/render.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
