use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::config_manager::AnalysisConfig;
use crate::domain::selection::{catalog_mask, SelectionMask};
use crate::domain::filter_table::FilterTable;
use crate::model::catalog::Catalog;

pub fn resolve_output_dir(output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir {:?}", output_dir))?;
    let resolved = std::fs::canonicalize(output_dir).unwrap_or_else(|_| output_dir.to_path_buf());
    Ok(resolved)
}

/// Pretty-prints `report` to `<table dir>/<file_name>` and returns the path.
pub fn write_report(config: &AnalysisConfig, file_name: &str, report: &serde_json::Value) -> Result<PathBuf> {
    let dir = resolve_output_dir(&config.table_dir())?;
    let path = dir.join(file_name);
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write report {:?}", path))?;
    log::info!("Wrote {:?}", path);
    Ok(path)
}

pub fn selection(config: &AnalysisConfig, catalog: &Catalog, table: &FilterTable) -> Result<SelectionMask> {
    let mask = catalog_mask(catalog, table, &config.selection).context("Selection failed")?;
    log::info!("{} of {} objects selected", mask.selected(), catalog.len());
    Ok(mask)
}
