use anyhow::Result;

use crate::domain::config_manager::AnalysisConfig;
use crate::domain::pipeline::{run_or_load, AnalysisContext};

use super::helpers::resolve_output_dir;

/// Filters every catalog object, or reuses matching cached tables.
pub fn run_filter(config: &AnalysisConfig, force: bool) -> Result<serde_json::Value> {
    let ctx = AnalysisContext::from_config(config)?;
    let dir = resolve_output_dir(&config.table_dir())?;
    let result = run_or_load(&ctx, &dir, force)?;
    let fingerprint = ctx.fingerprint().hash()?;

    Ok(serde_json::json!({
        "name": ctx.name,
        "table_dir": dir,
        "total_objects": result.total_objects,
        "overlapping": result.overlapping,
        "radii": ctx.radii.values(),
        "radius_unit": ctx.radii.unit,
        "from_cache": result.from_cache,
        "fingerprint": fingerprint,
        "elapsed_ms": result.elapsed_ms,
    }))
}
