use std::time::Instant;

use anyhow::{Context, Result};

use crate::domain::config_manager::AnalysisConfig;
use crate::domain::pipeline::load_tables;
use crate::domain::stacking::{stack, tsz_profile};

use super::helpers::{selection, write_report};

pub const STACK_REPORT: &str = "stack.json";

/// Uniform-weight stacks of the filter tables plus the inverse-variance
/// tSZ profile of the selected objects.
pub fn run_stack(config: &AnalysisConfig) -> Result<serde_json::Value> {
    let start = Instant::now();
    let (catalog, table) = load_tables(config)?;
    let mask = selection(config, &catalog, &table)?;
    let ones = vec![1.0; catalog.len()];

    let mean_temperature = stack(&table.filtered_temperature, &mask, &ones, true)
        .context("Failed to stack filtered temperature")?;
    let mean_noise = stack(&table.noise_std_dev, &mask, &ones, true)?;
    let mean_disk_area = stack(&table.disk_area, &mask, &ones, true)?;
    let radii = config.radii.values();
    let tsz = tsz_profile(&table.filtered_temperature, &table.noise_std_dev, &mask, &radii)
        .context("Failed to build tSZ profile")?;

    let mut report = serde_json::json!({
        "name": config.name,
        "radii": radii,
        "radius_unit": config.radii.unit,
        "selected": mask.selected(),
        "total_objects": catalog.len(),
        "mean_filtered_temperature": mean_temperature.values,
        "mean_noise_std_dev": mean_noise.values,
        "mean_disk_area": mean_disk_area.values,
        "tsz": tsz,
    });
    let path = write_report(config, STACK_REPORT, &report)?;
    report["report_path"] = serde_json::json!(path);
    report["elapsed_ms"] = serde_json::json!(start.elapsed().as_millis() as u64);
    Ok(report)
}
