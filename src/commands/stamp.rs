use std::path::Path;

use anyhow::{bail, Result};

use crate::domain::aperture::apply_disk_ring;
use crate::domain::config_manager::AnalysisConfig;
use crate::domain::fits_writer::write_stamp_cube;
use crate::domain::pipeline::AnalysisContext;

/// Extracts the stamp of one object, writes it as a FITS cube and reports
/// the filter outputs at each radius.
pub fn dump_stamp(config: &AnalysisConfig, index: usize, output: &Path) -> Result<serde_json::Value> {
    let ctx = AnalysisContext::from_config(config)?;
    let catalog = &ctx.catalog;
    if index >= catalog.len() {
        bail!("Object index {} out of range, catalog has {} objects", index, catalog.len());
    }

    let (ra, dec) = (catalog.ra[index], catalog.dec[index]);
    let stamp = ctx.extractor.extract(&ctx.maps, ra, dec);
    let wcs = ctx.extractor.geometry().approximate_wcs(ra, dec);
    write_stamp_cube(&stamp, &wcs, output, index)?;

    let apertures: Vec<serde_json::Value> = ctx
        .radii
        .angular(catalog.z[index], &ctx.cosmology)
        .into_iter()
        .zip(ctx.radii.values())
        .map(|((r0, r1), radius)| match apply_disk_ring(&stamp, r0, r1) {
            Ok(out) => serde_json::json!({
                "radius": radius,
                "r0_arcmin": r0.to_degrees() * 60.0,
                "filtered_temperature": out.filtered_temperature,
                "contamination": out.contamination,
                "noise_std_dev": out.noise_std_dev,
                "disk_area": out.disk_area,
            }),
            Err(e) => serde_json::json!({
                "radius": radius,
                "error": e.to_string(),
            }),
        })
        .collect();

    Ok(serde_json::json!({
        "index": index,
        "ra": ra,
        "dec": dec,
        "z": catalog.z[index],
        "shape": stamp.temperature.dim(),
        "pixel_area_sr": stamp.pixel_area,
        "output": output,
        "apertures": apertures,
    }))
}
