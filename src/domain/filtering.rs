use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::domain::aperture::{apply_disk_ring, ApertureOutput, FilterError};
use crate::domain::filter_table::FilterTable;
use crate::domain::pipeline::AnalysisContext;
use crate::domain::sky_map::{Interpolation, SkyMap};
use crate::model::catalog::Catalog;

/// Per-object footprint flag: nearest-pixel hit count above `threshold`.
pub fn compute_overlap_flags(hits: &SkyMap, catalog: &Catalog, threshold: f64) -> Vec<bool> {
    (0..catalog.len())
        .into_par_iter()
        .map(|i| hits.value_at(catalog.ra[i], catalog.dec[i], Interpolation::Nearest) > threshold)
        .collect()
}

/// Extracts the stamp of object `index` and applies the disk-ring filter at
/// every aperture radius.
pub fn filter_object(ctx: &AnalysisContext, index: usize) -> Result<Vec<ApertureOutput>, FilterError> {
    let catalog = &ctx.catalog;
    let stamp = ctx
        .extractor
        .extract(&ctx.maps, catalog.ra[index], catalog.dec[index]);
    let half_width = ctx.extractor.geometry().half_width_rad();

    ctx.radii
        .angular(catalog.z[index], &ctx.cosmology)
        .into_iter()
        .map(|(r0, r1)| {
            if r1 > half_width {
                return Err(FilterError::ApertureExceedsStamp { r1, half_width });
            }
            apply_disk_ring(&stamp, r0, r1)
        })
        .collect()
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ETA: {eta}")
            .context("Invalid progress bar template")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

/// Overlap pass followed by the filtering pass. Rows come back in catalog
/// order whatever the worker count.
pub fn run_filtering(ctx: &AnalysisContext) -> Result<FilterTable> {
    let n = ctx.catalog.len();
    let n_radii = ctx.radii.len();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.workers)
        .build()
        .context("Failed to build worker pool")?;
    log::info!(
        "Filtering {} objects at {} radii on {} workers",
        n,
        n_radii,
        pool.current_num_threads()
    );

    let start = Instant::now();
    let overlap = pool.install(|| compute_overlap_flags(&ctx.maps.hits, &ctx.catalog, ctx.overlap_threshold));
    let overlapping = overlap.iter().filter(|&&o| o).count();
    log::info!(
        "Overlap pass: {} of {} objects in footprint ({} ms)",
        overlapping,
        n,
        start.elapsed().as_millis()
    );

    let pb = progress_bar(overlapping)?;
    pb.set_message("Filtering stamps");

    let start = Instant::now();
    let rows: Vec<Vec<ApertureOutput>> = pool.install(|| {
        (0..n)
            .into_par_iter()
            .map(|i| {
                if !overlap[i] {
                    return Ok(Vec::new());
                }
                let row = filter_object(ctx, i).with_context(|| {
                    format!(
                        "Object {} (ra={:.5}, dec={:.5}, z={:.3})",
                        i, ctx.catalog.ra[i], ctx.catalog.dec[i], ctx.catalog.z[i]
                    )
                })?;
                pb.inc(1);
                Ok(row)
            })
            .collect::<Result<Vec<_>>>()
    })?;
    pb.finish_and_clear();

    log::info!(
        "Filtering pass: {} stamps in {} ms",
        overlapping,
        start.elapsed().as_millis()
    );
    Ok(FilterTable::from_rows(overlap, &rows, n_radii))
}
