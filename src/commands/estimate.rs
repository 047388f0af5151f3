use std::time::Instant;

use anyhow::{Context, Result};

use crate::domain::config_manager::AnalysisConfig;
use crate::domain::estimator::{measure_all, measure_ksz, KszEstimator};
use crate::domain::noise::NoiseCalibration;
use crate::domain::pipeline::load_tables;

use super::helpers::{selection, write_report};

pub const NOISE_REPORT: &str = "noise_calibration.json";
pub const KSZ_REPORT: &str = "ksz_estimates.json";

/// Calibrates the filter noise and runs the kSZ estimators. With no
/// estimator given, every one the catalog supports is run.
pub fn run_estimate(config: &AnalysisConfig, estimator: Option<KszEstimator>) -> Result<serde_json::Value> {
    let start = Instant::now();
    let (catalog, table) = load_tables(config)?;
    let mask = selection(config, &catalog, &table)?;

    let calibration = NoiseCalibration::fit(
        &table.filtered_temperature,
        &table.noise_std_dev,
        &mask,
        config.noise_bins,
    )
    .context("Noise calibration failed")?;
    write_report(config, NOISE_REPORT, &serde_json::json!({
        "radii": config.radii.values(),
        "models": calibration.models,
    }))?;

    let measurements = match estimator {
        Some(e) => vec![measure_ksz(
            e,
            &catalog,
            &table.filtered_temperature,
            &table.noise_std_dev,
            &mask,
            &calibration,
        )?],
        None => measure_all(
            &catalog,
            &table.filtered_temperature,
            &table.noise_std_dev,
            &mask,
            &calibration,
        )?,
    };
    for m in &measurements {
        log::info!("{:?}: SNR {:?}", m.estimator, m.snr);
    }

    let mut report = serde_json::json!({
        "name": config.name,
        "radii": config.radii.values(),
        "radius_unit": config.radii.unit,
        "selected": mask.selected(),
        "estimates": measurements,
    });
    let path = write_report(config, KSZ_REPORT, &report)?;
    report["report_path"] = serde_json::json!(path);
    report["elapsed_ms"] = serde_json::json!(start.elapsed().as_millis() as u64);
    Ok(report)
}
