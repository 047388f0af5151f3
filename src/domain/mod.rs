pub mod aperture;
pub mod config_manager;
pub mod cosmology;
pub mod estimator;
pub mod filter_table;
pub mod filtering;
pub mod fits_writer;
pub mod noise;
pub mod pipeline;
pub mod radii;
pub mod selection;
pub mod sky_map;
pub mod stacking;
pub mod stamp;
pub mod stats;
pub mod wcs;
