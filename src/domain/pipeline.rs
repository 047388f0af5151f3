use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use crate::domain::config_manager::AnalysisConfig;
use crate::domain::cosmology::FlatLcdm;
use crate::domain::filter_table::{FilterTable, TableError, TableFingerprint};
use crate::domain::filtering::run_filtering;
use crate::domain::radii::{ApertureRadii, RadiusUnit, EQUAL_AREA_RING_RATIO};
use crate::domain::sky_map::{Interpolation, SkyMap};
use crate::domain::stamp::{MapSet, StampExtractor};
use crate::model::catalog::Catalog;

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub table: FilterTable,
    pub total_objects: usize,
    pub overlapping: usize,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

/// Everything a filtering run reads. Built once, then shared read-only by
/// all workers.
#[derive(Debug)]
pub struct AnalysisContext {
    pub name: String,
    pub maps: MapSet,
    pub catalog: Catalog,
    pub radii: ApertureRadii,
    pub extractor: StampExtractor,
    pub interpolation: Interpolation,
    pub overlap_threshold: f64,
    pub cosmology: FlatLcdm,
    pub workers: usize,
    fingerprint: TableFingerprint,
}

impl AnalysisContext {
    pub fn new(maps: MapSet, catalog: Catalog, config: &AnalysisConfig) -> Result<Self> {
        check_same_grid(&maps)?;
        validate_radii(config)?;
        if catalog.is_empty() {
            bail!("Catalog is empty");
        }

        if config.temperature_interpolation == Interpolation::CubicSpline {
            let start = Instant::now();
            maps.temperature.prefilter();
            log::info!("Spline prefilter done in {} ms", start.elapsed().as_millis());
        }

        let fingerprint = TableFingerprint::new(&catalog, &maps, config);
        Ok(AnalysisContext {
            name: config.name.clone(),
            maps,
            catalog,
            radii: config.radii.clone(),
            extractor: StampExtractor::new(config.stamp, config.temperature_interpolation),
            interpolation: config.temperature_interpolation,
            overlap_threshold: config.overlap_threshold,
            cosmology: config.cosmology,
            workers: config.workers,
            fingerprint,
        })
    }

    /// Loads the three maps and the catalog named in `config`.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let start = Instant::now();
        let maps = load_maps(config)?;
        let catalog = Catalog::from_csv(&config.catalog)?;
        log::info!("Inputs loaded in {} ms", start.elapsed().as_millis());
        Self::new(maps, catalog, config)
    }

    pub fn fingerprint(&self) -> &TableFingerprint {
        &self.fingerprint
    }
}

/// Loads the catalog and its persisted filter tables. The maps are read only
/// to confirm the tables were computed from them. Downstream stacking and
/// estimation start here.
pub fn load_tables(config: &AnalysisConfig) -> Result<(Catalog, FilterTable)> {
    let catalog = Catalog::from_csv(&config.catalog)?;
    let maps = load_maps(config)?;
    let fingerprint = TableFingerprint::new(&catalog, &maps, config);
    let dir = config.table_dir();
    let table = FilterTable::load(&dir, &fingerprint)
        .with_context(|| format!("No usable filter tables in {:?}; run the filter step first", dir))?;
    Ok((catalog, table))
}

pub fn load_maps(config: &AnalysisConfig) -> Result<MapSet> {
    let maps = MapSet {
        temperature: SkyMap::from_fits(&config.temperature_map)
            .context("Failed to load temperature map")?,
        mask: SkyMap::from_fits(&config.mask_map).context("Failed to load mask map")?,
        hits: SkyMap::from_fits(&config.hit_map).context("Failed to load hit map")?,
    };
    log::info!(
        "Loaded maps {:?}, {:?}, {:?} with shape {:?}",
        config.temperature_map,
        config.mask_map,
        config.hit_map,
        maps.temperature.dim()
    );
    Ok(maps)
}

fn check_same_grid(maps: &MapSet) -> Result<()> {
    let shape = maps.temperature.dim();
    for (name, map) in [("mask", &maps.mask), ("hit", &maps.hits)] {
        if map.dim() != shape {
            bail!(
                "The {} map has shape {:?}, temperature map has {:?}",
                name,
                map.dim(),
                shape
            );
        }
        if map.wcs() != maps.temperature.wcs() {
            bail!("The {} map does not share the temperature map's WCS", name);
        }
    }
    Ok(())
}

fn validate_radii(config: &AnalysisConfig) -> Result<()> {
    let radii = &config.radii;
    if radii.is_empty() {
        bail!("At least one aperture radius is required");
    }
    if !(radii.min > 0.0) || radii.max < radii.min {
        bail!("Invalid aperture radius range [{}, {}]", radii.min, radii.max);
    }
    if radii.unit == RadiusUnit::Arcmin {
        let outer = radii.max * EQUAL_AREA_RING_RATIO;
        let half = config.stamp.half_width_rad().to_degrees() * 60.0;
        if outer > half {
            bail!(
                "Outer ring radius {:.3} arcmin does not fit in the {:.3} arcmin stamp half-width",
                outer,
                half
            );
        }
    }
    Ok(())
}

/// Loads cached tables from `dir` when their fingerprint matches `ctx`,
/// otherwise (or when `force` is set) filters the catalog and writes the
/// tables. Tables that exist but do not match are reported, not silently
/// replaced, unless `force` is set.
pub fn run_or_load(ctx: &AnalysisContext, dir: &Path, force: bool) -> Result<PipelineResult> {
    let start = Instant::now();
    let fingerprint = ctx.fingerprint();

    if !force {
        match FilterTable::load(dir, fingerprint) {
            Ok(table) => {
                log::info!("Reusing filter tables from {:?}", dir);
                return Ok(result(table, true, start));
            }
            Err(TableError::Missing(path)) => {
                log::info!("No cached table at {:?}, filtering", path);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Cached tables in {:?} are unusable; rerun with force to recompute", dir)
                });
            }
        }
    }

    let table = run_filtering(ctx)?;
    table.save(dir, fingerprint)?;
    Ok(result(table, false, start))
}

fn result(table: FilterTable, from_cache: bool, start: Instant) -> PipelineResult {
    let overlapping = table.overlap.iter().filter(|&&o| o).count();
    PipelineResult {
        total_objects: table.n_objects(),
        overlapping,
        from_cache,
        elapsed_ms: start.elapsed().as_millis() as u64,
        table,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stamp::StampGeometry;
    use crate::domain::wcs::{Projection, WcsTransform};
    use ndarray::Array2;

    fn wcs(crval1: f64) -> WcsTransform {
        WcsTransform::new(Projection::Car, (40.5, 40.5), (crval1, 0.0), (-0.25 / 60.0, 0.25 / 60.0))
    }

    fn maps(shape: (usize, usize)) -> MapSet {
        MapSet {
            temperature: SkyMap::new(Array2::from_elem((80, 80), 1.0), wcs(10.0)),
            mask: SkyMap::new(Array2::from_elem((80, 80), 1.0), wcs(10.0)),
            hits: SkyMap::new(Array2::from_elem(shape, 1.0), wcs(10.0)),
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![10.0, 10.02], vec![0.0, 0.01], vec![0.3, 0.3], vec![1e13, 1e14], None, None).unwrap()
    }

    #[test]
    fn test_mismatched_grids_rejected() {
        let err = AnalysisContext::new(maps((80, 81)), catalog(), &AnalysisConfig::default()).unwrap_err();
        assert!(err.to_string().contains("hit map"));

        let mut shifted = maps((80, 80));
        shifted.mask = SkyMap::new(Array2::from_elem((80, 80), 1.0), wcs(11.0));
        assert!(AnalysisContext::new(shifted, catalog(), &AnalysisConfig::default()).is_err());
    }

    #[test]
    fn test_radii_must_fit_stamp() {
        let mut config = AnalysisConfig::default();
        config.radii.max = 6.0;
        let err = AnalysisContext::new(maps((80, 80)), catalog(), &config).unwrap_err();
        assert!(err.to_string().contains("half-width"));

        config.stamp = StampGeometry {
            width_deg: 0.5,
            height_deg: 0.5,
            ..Default::default()
        };
        assert!(AnalysisContext::new(maps((80, 80)), catalog(), &config).is_ok());
    }

    #[test]
    fn test_spline_context_is_prefiltered() {
        let config = AnalysisConfig {
            temperature_interpolation: Interpolation::CubicSpline,
            ..Default::default()
        };
        let ctx = AnalysisContext::new(maps((80, 80)), catalog(), &config).unwrap();
        assert!(ctx.maps.temperature.is_prefiltered());
        assert!(!ctx.maps.hits.is_prefiltered());
    }

    #[test]
    fn test_run_or_load_uses_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = AnalysisContext::new(maps((80, 80)), catalog(), &AnalysisConfig::default()).unwrap();

        let first = run_or_load(&ctx, tmp.path(), false).unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.overlapping, 2);

        let second = run_or_load(&ctx, tmp.path(), false).unwrap();
        assert!(second.from_cache);
        assert_eq!(second.table, first.table);

        let forced = run_or_load(&ctx, tmp.path(), true).unwrap();
        assert!(!forced.from_cache);
    }

    #[test]
    fn test_run_or_load_rejects_stale_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = AnalysisContext::new(maps((80, 80)), catalog(), &AnalysisConfig::default()).unwrap();
        run_or_load(&ctx, tmp.path(), false).unwrap();

        let config = AnalysisConfig {
            overlap_threshold: 0.5,
            ..Default::default()
        };
        let changed = AnalysisContext::new(maps((80, 80)), catalog(), &config).unwrap();
        let err = run_or_load(&changed, tmp.path(), false).unwrap_err();
        assert!(format!("{:#}", err).contains("different inputs"));
        assert!(run_or_load(&changed, tmp.path(), true).is_ok());
    }

    #[test]
    fn test_swapped_temperature_map_invalidates_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AnalysisConfig::default();
        let ctx = AnalysisContext::new(maps((80, 80)), catalog(), &config).unwrap();
        run_or_load(&ctx, tmp.path(), false).unwrap();

        let mut swapped = maps((80, 80));
        swapped.temperature = SkyMap::new(Array2::from_elem((80, 80), 100.0), wcs(10.0));
        let changed = AnalysisContext::new(swapped, catalog(), &config).unwrap();
        assert_ne!(changed.fingerprint().maps.temperature, ctx.fingerprint().maps.temperature);
        assert_eq!(changed.fingerprint().maps.hits, ctx.fingerprint().maps.hits);

        let err = run_or_load(&changed, tmp.path(), false).unwrap_err();
        assert!(matches!(err.downcast_ref::<TableError>(), Some(TableError::Stale { .. })));

        let fresh = run_or_load(&changed, tmp.path(), true).unwrap();
        assert!(!fresh.from_cache);
        let reused = run_or_load(&changed, tmp.path(), false).unwrap();
        assert_eq!(reused.table, fresh.table);
    }
}
