pub mod commands;
pub mod domain;
pub mod model;
pub mod utils;

pub use crate::domain::config_manager::{load_config, AnalysisConfig};
pub use crate::domain::pipeline::{run_or_load, AnalysisContext};
