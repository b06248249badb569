//! Application configuration
//!
//! One JSON file with a section per subsystem. Every field has a default, so a
//! partial file (or none at all) is valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::CameraConfig;
use crate::catalog::CatalogConfig;
use crate::placement::PlacementParams;
use crate::pose::PoseOptions;
use crate::render::RenderConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TryOnConfig {
    pub camera: CameraConfig,
    pub pose: PoseOptions,
    pub placement: PlacementParams,
    pub render: RenderConfig,
    pub catalog: CatalogConfig,
}

impl TryOnConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("virtual-tryon");
            p.push("config.json");
            p
        })
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` (or the default location), falling back to defaults on any error
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Self::default(),
            },
        };

        match Self::load(&path) {
            Ok(config) => {
                log::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("{}. Using default configuration.", e);
                Self::default()
            }
        }
    }

    /// Write the config as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_error)?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(io_error)
    }

    /// Check value ranges across all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pose
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero (got {}x{})",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.target_fps == 0 {
            return Err(ConfigError::Invalid("camera.target_fps must be non-zero".into()));
        }
        if self.render.target_fps == 0 {
            return Err(ConfigError::Invalid("render.target_fps must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.render.overlay_opacity) {
            return Err(ConfigError::Invalid(format!(
                "render.overlay_opacity must be within [0, 1] (got {})",
                self.render.overlay_opacity
            )));
        }

        let quick = &self.placement.quick;
        for (name, value) in [
            ("placement.quick.x_ratio", quick.x_ratio),
            ("placement.quick.y_ratio", quick.y_ratio),
            ("placement.quick.width_ratio", quick.width_ratio),
            ("placement.quick.height_ratio", quick.height_ratio),
            ("placement.width_scale", self.placement.width_scale),
            ("placement.height_scale", self.placement.height_scale),
            ("placement.top_offset", self.placement.top_offset),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!("{} must be finite", name)));
            }
        }

        let mut ids: Vec<&str> = self.catalog.garments.iter().map(|g| g.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid(format!("duplicate garment id '{}'", pair[0])));
        }

        Ok(())
    }
}
