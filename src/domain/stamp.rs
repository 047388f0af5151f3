use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::domain::sky_map::{Interpolation, SkyMap};
use crate::domain::wcs::{Projection, WcsTransform};
use crate::utils::constants::{ARCMIN, DEGREE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StampProjection {
    /// Equal-area pixels, latitude steps uniform in sin(dec).
    Cea,
    /// Equally spaced coordinates, pixels not equal area.
    Car,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampGeometry {
    pub width_deg: f64,
    pub height_deg: f64,
    pub resolution_arcmin: f64,
    pub projection: StampProjection,
}

impl Default for StampGeometry {
    fn default() -> Self {
        Self {
            width_deg: 0.25,
            height_deg: 0.25,
            resolution_arcmin: 0.25,
            projection: StampProjection::Cea,
        }
    }
}

impl StampGeometry {
    fn half_sin_height(&self) -> f64 {
        (0.5 * self.height_deg * DEGREE).sin()
    }

    /// (rows, cols) of the stamp grid.
    pub fn shape(&self) -> (usize, usize) {
        let res = self.resolution_arcmin * ARCMIN;
        let nx = ((self.width_deg * DEGREE / res).round() as usize).max(1);
        let ny = match self.projection {
            StampProjection::Cea => 2.0 * self.half_sin_height() / res,
            StampProjection::Car => self.height_deg * DEGREE / res,
        };
        ((ny.round() as usize).max(1), nx)
    }

    /// Largest radius in radians that fits inside the stamp around its center.
    pub fn half_width_rad(&self) -> f64 {
        0.5 * self.width_deg.min(self.height_deg) * DEGREE
    }

    /// Mean pixel solid angle in steradians: exact box area over pixel count.
    pub fn pixel_area_sr(&self) -> f64 {
        let (rows, cols) = self.shape();
        let area = self.width_deg * DEGREE * 2.0 * self.half_sin_height();
        area / (rows * cols) as f64
    }

    /// Local angular offsets (radians) of every pixel center, as
    /// (latitude, longitude) grids centered on (0, 0).
    pub fn local_grid(&self) -> (Array2<f64>, Array2<f64>) {
        let (rows, cols) = self.shape();
        let width = self.width_deg * DEGREE;
        let dx = width / cols as f64;

        let lat_of_row: Vec<f64> = match self.projection {
            StampProjection::Cea => {
                let s = self.half_sin_height();
                let dy = 2.0 * s / rows as f64;
                (0..rows)
                    .map(|j| (-s + (j as f64 + 0.5) * dy).asin())
                    .collect()
            }
            StampProjection::Car => {
                let height = self.height_deg * DEGREE;
                let dy = height / rows as f64;
                (0..rows)
                    .map(|j| -0.5 * height + (j as f64 + 0.5) * dy)
                    .collect()
            }
        };

        let lat = Array2::from_shape_fn((rows, cols), |(j, _)| lat_of_row[j]);
        let lon = Array2::from_shape_fn((rows, cols), |(_, i)| -0.5 * width + (i as f64 + 0.5) * dx);
        (lat, lon)
    }

    /// Approximate plate-carree WCS of a stamp centered on (ra, dec). The
    /// stamp grid itself is a rotated projection, so this header is only
    /// exact at the center; it is meant for inspecting dumped stamps.
    pub fn approximate_wcs(&self, ra_deg: f64, dec_deg: f64) -> WcsTransform {
        let (rows, cols) = self.shape();
        let dy_deg = match self.projection {
            StampProjection::Cea => (2.0 * self.half_sin_height() / rows as f64).to_degrees(),
            StampProjection::Car => self.height_deg / rows as f64,
        };
        WcsTransform::new(
            Projection::Car,
            (cols as f64 / 2.0 + 0.5, rows as f64 / 2.0 + 0.5),
            (ra_deg, dec_deg),
            (-self.width_deg / cols as f64, dy_deg),
        )
    }
}

/// Rotates local coordinates so that (0, 0) lands on (ra0, dec0).
/// All angles in radians. Returns (ra, dec) in degrees, ra in [0, 360).
pub fn recenter(lon: f64, lat: f64, ra0: f64, dec0: f64) -> (f64, f64) {
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let x = cos_lat * cos_lon;
    let y = cos_lat * sin_lon;
    let z = sin_lat;

    let (sin_d, cos_d) = dec0.sin_cos();
    let x1 = x * cos_d - z * sin_d;
    let z1 = x * sin_d + z * cos_d;

    let (sin_a, cos_a) = ra0.sin_cos();
    let x2 = x1 * cos_a - y * sin_a;
    let y2 = x1 * sin_a + y * cos_a;

    let mut ra = y2.atan2(x2).to_degrees();
    if ra < 0.0 {
        ra += 360.0;
    }
    let dec = z1.clamp(-1.0, 1.0).asin().to_degrees();
    (ra, dec)
}

/// Cutout around one object. Offsets in radians from the stamp center.
#[derive(Debug, Clone)]
pub struct Stamp {
    pub lat_offset: Array2<f64>,
    pub lon_offset: Array2<f64>,
    pub temperature: Array2<f64>,
    pub mask: Array2<f64>,
    pub hits: Array2<f64>,
    pub pixel_area: f64,
}

impl Stamp {
    /// Flat-sky distance of every pixel from the stamp center, in radians.
    pub fn radius(&self) -> Array2<f64> {
        let mut r = self.lat_offset.mapv(|v| v * v);
        r.zip_mut_with(&self.lon_offset, |acc, &lon| *acc = (*acc + lon * lon).sqrt());
        r
    }
}

/// Temperature, coverage mask and hit count maps sharing one pixel grid.
#[derive(Debug)]
pub struct MapSet {
    pub temperature: SkyMap,
    pub mask: SkyMap,
    pub hits: SkyMap,
}

/// Resamples the global maps onto a fixed stamp grid. The local grid is
/// computed once and shared read-only by every extraction.
#[derive(Debug, Clone)]
pub struct StampExtractor {
    geometry: StampGeometry,
    temperature_interpolation: Interpolation,
    lat: Array2<f64>,
    lon: Array2<f64>,
    pixel_area: f64,
}

impl StampExtractor {
    pub fn new(geometry: StampGeometry, temperature_interpolation: Interpolation) -> Self {
        let (lat, lon) = geometry.local_grid();
        StampExtractor {
            geometry,
            temperature_interpolation,
            lat,
            lon,
            pixel_area: geometry.pixel_area_sr(),
        }
    }

    pub fn geometry(&self) -> &StampGeometry {
        &self.geometry
    }

    pub fn extract(&self, maps: &MapSet, ra_deg: f64, dec_deg: f64) -> Stamp {
        let (rows, cols) = self.lat.dim();
        let ra0 = ra_deg * DEGREE;
        let dec0 = dec_deg * DEGREE;

        let mut temperature = Array2::<f64>::zeros((rows, cols));
        let mut mask = Array2::<f64>::zeros((rows, cols));
        let mut hits = Array2::<f64>::zeros((rows, cols));

        for j in 0..rows {
            for i in 0..cols {
                let (ra, dec) = recenter(self.lon[[j, i]], self.lat[[j, i]], ra0, dec0);
                temperature[[j, i]] =
                    maps.temperature.value_at(ra, dec, self.temperature_interpolation);
                let m = maps.mask.value_at(ra, dec, Interpolation::Nearest);
                mask[[j, i]] = if m > 0.5 { 1.0 } else { 0.0 };
                hits[[j, i]] = maps.hits.value_at(ra, dec, Interpolation::Nearest);
            }
        }

        Stamp {
            lat_offset: self.lat.clone(),
            lon_offset: self.lon.clone(),
            temperature,
            mask,
            hits,
            pixel_area: self.pixel_area,
        }
    }
}
