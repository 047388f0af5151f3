use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::aperture::ApertureOutput;
use crate::domain::config_manager::AnalysisConfig;
use crate::domain::cosmology::FlatLcdm;
use crate::domain::radii::ApertureRadii;
use crate::domain::sky_map::Interpolation;
use crate::domain::stamp::{MapSet, StampGeometry};
use crate::model::catalog::Catalog;

pub const OVERLAP_FILE: &str = "overlap_flag.txt";
pub const FILTERED_FILE: &str = "filtmap.txt";
pub const CONTAMINATION_FILE: &str = "filtmask.txt";
pub const NOISE_FILE: &str = "filtnoisestddev.txt";
pub const DISK_AREA_FILE: &str = "diskarea.txt";
pub const FINGERPRINT_FILE: &str = "fingerprint.json";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Filter table {0:?} not found")]
    Missing(PathBuf),
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path:?} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("{path:?} has shape {found:?}, expected {expected:?}")]
    Shape {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Cached tables were computed for different inputs (stored {stored}, current {current})")]
    Stale { stored: String, current: String },
    #[error("Failed to serialize table fingerprint: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

/// Content digests of the three input maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDigests {
    pub temperature: String,
    pub mask: String,
    pub hits: String,
}

impl MapDigests {
    pub fn of(maps: &MapSet) -> Self {
        let (temperature, (mask, hits)) = rayon::join(
            || maps.temperature.digest(),
            || rayon::join(|| maps.mask.digest(), || maps.hits.digest()),
        );
        MapDigests {
            temperature,
            mask,
            hits,
        }
    }
}

/// Everything the filter outputs depend on. Two runs with equal
/// fingerprints produce the same tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFingerprint {
    pub catalog_digest: String,
    pub maps: MapDigests,
    pub n_objects: usize,
    pub radii: ApertureRadii,
    pub stamp: StampGeometry,
    pub interpolation: Interpolation,
    pub overlap_threshold: f64,
    pub cosmology: FlatLcdm,
}

impl TableFingerprint {
    pub fn new(catalog: &Catalog, maps: &MapSet, config: &AnalysisConfig) -> Self {
        TableFingerprint {
            catalog_digest: catalog.digest(),
            maps: MapDigests::of(maps),
            n_objects: catalog.len(),
            radii: config.radii.clone(),
            stamp: config.stamp,
            interpolation: config.temperature_interpolation,
            overlap_threshold: config.overlap_threshold,
            cosmology: config.cosmology,
        }
    }

    pub fn hash(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(self)?;
        Ok(format!("{:x}", md5::compute(canonical)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredFingerprint {
    hash: String,
    inputs: TableFingerprint,
}

/// Per-object, per-radius filter outputs plus the per-object overlap flag.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTable {
    pub overlap: Vec<bool>,
    pub filtered_temperature: Array2<f64>,
    pub contamination: Array2<f64>,
    pub noise_std_dev: Array2<f64>,
    pub disk_area: Array2<f64>,
}

impl FilterTable {
    pub fn zeros(n_objects: usize, n_radii: usize) -> Self {
        let shape = (n_objects, n_radii);
        FilterTable {
            overlap: vec![false; n_objects],
            filtered_temperature: Array2::zeros(shape),
            contamination: Array2::zeros(shape),
            noise_std_dev: Array2::zeros(shape),
            disk_area: Array2::zeros(shape),
        }
    }

    /// Assembles the table from rows in object order. Objects outside the
    /// footprint carry an empty row and stay at zero.
    pub fn from_rows(overlap: Vec<bool>, rows: &[Vec<ApertureOutput>], n_radii: usize) -> Self {
        let mut table = FilterTable::zeros(overlap.len(), n_radii);
        for (i, row) in rows.iter().enumerate() {
            for (j, out) in row.iter().enumerate().take(n_radii) {
                table.filtered_temperature[[i, j]] = out.filtered_temperature;
                table.contamination[[i, j]] = out.contamination;
                table.noise_std_dev[[i, j]] = out.noise_std_dev;
                table.disk_area[[i, j]] = out.disk_area;
            }
        }
        table.overlap = overlap;
        table
    }

    pub fn n_objects(&self) -> usize {
        self.overlap.len()
    }

    pub fn n_radii(&self) -> usize {
        self.filtered_temperature.ncols()
    }

    pub fn save(&self, dir: &Path, fingerprint: &TableFingerprint) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create table dir {:?}", dir))?;

        let overlap = Array2::from_shape_fn((self.n_objects(), 1), |(i, _)| {
            if self.overlap[i] {
                1.0
            } else {
                0.0
            }
        });
        write_table(&dir.join(OVERLAP_FILE), &overlap)?;
        write_table(&dir.join(FILTERED_FILE), &self.filtered_temperature)?;
        write_table(&dir.join(CONTAMINATION_FILE), &self.contamination)?;
        write_table(&dir.join(NOISE_FILE), &self.noise_std_dev)?;
        write_table(&dir.join(DISK_AREA_FILE), &self.disk_area)?;

        let stored = StoredFingerprint {
            hash: fingerprint.hash().context("Failed to hash fingerprint")?,
            inputs: fingerprint.clone(),
        };
        let json = serde_json::to_string_pretty(&stored).context("Failed to serialize fingerprint")?;
        let path = dir.join(FINGERPRINT_FILE);
        fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;

        log::info!("Saved filter tables to {:?}", dir);
        Ok(())
    }

    /// Loads tables written by [`FilterTable::save`]. Tables without a
    /// fingerprint, or with one that does not match `expected`, are rejected.
    pub fn load(dir: &Path, expected: &TableFingerprint) -> Result<Self, TableError> {
        let fp_path = dir.join(FINGERPRINT_FILE);
        let text = read_file(&fp_path)?;
        let stored: StoredFingerprint =
            serde_json::from_str(&text).map_err(|e| TableError::Parse {
                path: fp_path.clone(),
                line: e.line(),
                message: e.to_string(),
            })?;
        let current = expected.hash()?;
        if stored.hash != current {
            return Err(TableError::Stale {
                stored: stored.hash,
                current,
            });
        }

        let n = expected.n_objects;
        let r = expected.radii.len();
        let overlap = read_table(&dir.join(OVERLAP_FILE), (n, 1))?;
        Ok(FilterTable {
            overlap: overlap.iter().map(|&v| v != 0.0).collect(),
            filtered_temperature: read_table(&dir.join(FILTERED_FILE), (n, r))?,
            contamination: read_table(&dir.join(CONTAMINATION_FILE), (n, r))?,
            noise_std_dev: read_table(&dir.join(NOISE_FILE), (n, r))?,
            disk_area: read_table(&dir.join(DISK_AREA_FILE), (n, r))?,
        })
    }
}

fn write_table(path: &Path, table: &Array2<f64>) -> Result<()> {
    let mut out = String::with_capacity(table.len() * 26);
    for row in table.rows() {
        let line: Vec<String> = row.iter().map(|v| format!("{:.18e}", v)).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("Failed to write {:?}", path))
}

fn read_file(path: &Path) -> Result<String, TableError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            TableError::Missing(path.to_path_buf())
        } else {
            TableError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn read_table(path: &Path, expected: (usize, usize)) -> Result<Array2<f64>, TableError> {
    let text = read_file(path)?;
    let mut values = Vec::with_capacity(expected.0 * expected.1);
    let mut rows = 0usize;
    let mut cols: Option<usize> = None;

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let before = values.len();
        for token in line.split_whitespace() {
            let v: f64 = token.parse().map_err(|_| TableError::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                message: format!("not a number: {:?}", token),
            })?;
            values.push(v);
        }
        let width = values.len() - before;
        match cols {
            None => cols = Some(width),
            Some(c) if c != width => {
                return Err(TableError::Parse {
                    path: path.to_path_buf(),
                    line: i + 1,
                    message: format!("{} columns, previous rows have {}", width, c),
                })
            }
            _ => {}
        }
        rows += 1;
    }

    let found = (rows, cols.unwrap_or(0));
    // an empty catalog writes an empty file
    if found != expected && !(rows == 0 && expected.0 == 0) {
        return Err(TableError::Shape {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }
    Array2::from_shape_vec(expected, values).map_err(|e| TableError::Parse {
        path: path.to_path_buf(),
        line: 0,
        message: e.to_string(),
    })
}
