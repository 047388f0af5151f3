use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::cosmology::FlatLcdm;
use crate::domain::radii::ApertureRadii;
use crate::domain::selection::SelectionCriteria;
use crate::domain::sky_map::Interpolation;
use crate::domain::stamp::StampGeometry;

pub const CONFIG_FILENAME: &str = "thumbstack.json";
pub const ENV_PREFIX: &str = "THUMBSTACK";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Run name; tables land in `<output_dir>/<name>/`.
    pub name: String,
    pub temperature_map: PathBuf,
    pub mask_map: PathBuf,
    pub hit_map: PathBuf,
    pub catalog: PathBuf,
    pub output_dir: PathBuf,
    pub radii: ApertureRadii,
    pub stamp: StampGeometry,
    pub temperature_interpolation: Interpolation,
    pub overlap_threshold: f64,
    /// Worker threads for the filtering pass, 0 = all cores.
    pub workers: usize,
    pub selection: SelectionCriteria,
    pub noise_bins: usize,
    pub cosmology: FlatLcdm,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            temperature_map: PathBuf::from("maps/temperature.fits"),
            mask_map: PathBuf::from("maps/mask.fits"),
            hit_map: PathBuf::from("maps/hits.fits"),
            catalog: PathBuf::from("catalog.csv"),
            output_dir: PathBuf::from("output"),
            radii: ApertureRadii::default(),
            stamp: StampGeometry::default(),
            temperature_interpolation: Interpolation::Nearest,
            overlap_threshold: 1e-5,
            workers: 0,
            selection: SelectionCriteria::default(),
            noise_bins: 20,
            cosmology: FlatLcdm::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn table_dir(&self) -> PathBuf {
        self.output_dir.join(&self.name)
    }
}

/// Loads the configuration file (JSON or TOML, by extension) and layers
/// `THUMBSTACK__*` environment variables on top, e.g.
/// `THUMBSTACK__WORKERS=4` or `THUMBSTACK__RADII__MAX=6`.
pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read config {:?}", path))?;

    let cfg: AnalysisConfig = settings
        .try_deserialize()
        .with_context(|| format!("Invalid config {:?}", path))?;
    log::debug!("Loaded config {:?}: {:?}", path, cfg);
    Ok(cfg)
}

pub fn save_config(config: &AnalysisConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir: {:?}", parent))?;
        }
    }
    let json = serde_json::to_string_pretty(config)
        .context("Failed to serialize config")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write config to {:?}", path))?;
    Ok(())
}

/// Writes a default configuration unless one already exists. Returns true
/// when a file was created.
pub fn init_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    save_config(&AnalysisConfig::default(), path)?;
    Ok(true)
}
