use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::FinderError;

static DIRS: Lazy<Option<ProjectDirs>> = Lazy::new(|| ProjectDirs::from("", "", "snapfind"));

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(path) = std::env::var("SNAPFIND_CONFIG") {
        return PathBuf::from(path);
    }
    DIRS.as_ref()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("snapfind.toml"))
});

pub static MODEL_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(path) = std::env::var("SNAPFIND_MODEL_DIR") {
        return PathBuf::from(path);
    }
    DIRS.as_ref()
        .map(|d| d.data_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum cosine distance for two faces to count as the same person.
    pub tolerance: f32,
    /// Candidates are shrunk by this factor before detection.
    pub downscale: f32,
    pub box_margin: u32,
    pub box_thickness: u32,
    pub box_color: [u8; 3],
    pub jpeg_quality: u8,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub group_folder: Option<PathBuf>,
    pub model_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            downscale: 0.5,
            box_margin: 20,
            box_thickness: 5,
            box_color: [0, 255, 0],
            jpeg_quality: 75,
            score_threshold: snapfind_vision::pipeline::DEFAULT_SCORE_THRESHOLD,
            nms_threshold: snapfind_vision::pipeline::DEFAULT_NMS_THRESHOLD,
            group_folder: None,
            model_dir: MODEL_DIR.to_path_buf(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), FinderError> {
        validate_tolerance(self.tolerance)?;
        validate_downscale(self.downscale)
    }
}

pub fn validate_tolerance(tolerance: f32) -> Result<(), FinderError> {
    if tolerance.is_finite() && tolerance >= 0.0 {
        Ok(())
    } else {
        Err(FinderError::InvalidTolerance(tolerance))
    }
}

pub fn validate_downscale(factor: f32) -> Result<(), FinderError> {
    if factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(FinderError::InvalidDownscale(factor))
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(CONFIG_PATH.as_path());
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("snapfind-config-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load_config(Some(&scratch("absent.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.tolerance, 0.5);
        assert_eq!(cfg.box_color, [0, 255, 0]);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = scratch("partial.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "tolerance = 0.35\ngroup_folder = \"/srv/event\"\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.tolerance, 0.35);
        assert_eq!(cfg.group_folder, Some(PathBuf::from("/srv/event")));
        assert_eq!(cfg.downscale, 0.5);
        assert_eq!(cfg.box_margin, 20);
    }

    #[test]
    fn save_then_load() {
        let path = scratch("nested/config.toml");
        let cfg = Config {
            tolerance: 0.42,
            box_thickness: 3,
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(validate_tolerance(-0.1).is_err());
        assert!(validate_tolerance(f32::NAN).is_err());
        assert!(validate_tolerance(0.0).is_ok());
        assert!(validate_downscale(0.0).is_err());
        assert!(validate_downscale(1.5).is_err());
        assert!(validate_downscale(1.0).is_ok());

        let path = scratch("bad.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "downscale = 2.0\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("downscale factor"));
    }
}
