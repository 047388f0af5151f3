use std::path::Path;

use anyhow::Result;

use crate::domain::config_manager::{self, AnalysisConfig};

pub fn init_config(path: &Path) -> Result<serde_json::Value> {
    let created = config_manager::init_config(path)?;
    Ok(serde_json::json!({
        "path": path,
        "created": created,
    }))
}

pub fn show_config(config: &AnalysisConfig) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "config": config,
        "radii": config.radii.values(),
        "stamp_shape": config.stamp.shape(),
        "table_dir": config.table_dir(),
    }))
}
