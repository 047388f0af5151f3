use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::domain::wcs::WcsTransform;
use crate::utils::mmap::read_fits_image;

const SPLINE_POLE: f64 = -0.267_949_192_431_122_7;
const SPLINE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    Bilinear,
    CubicSpline,
}

impl Default for Interpolation {
    fn default() -> Self {
        Interpolation::Nearest
    }
}

/// A pixelized sky map with its world coordinate system. Lookups outside the
/// pixel domain return 0.
#[derive(Debug)]
pub struct SkyMap {
    data: Array2<f32>,
    wcs: WcsTransform,
    spline: OnceLock<Array2<f64>>,
}

impl SkyMap {
    pub fn new(data: Array2<f32>, wcs: WcsTransform) -> Self {
        SkyMap {
            data,
            wcs,
            spline: OnceLock::new(),
        }
    }

    pub fn from_fits(path: &Path) -> Result<Self> {
        let loaded = read_fits_image(path)?;
        let wcs = WcsTransform::from_header(&loaded.header)
            .with_context(|| format!("Invalid WCS in {:?}", path))?;
        Ok(SkyMap::new(loaded.image, wcs))
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn wcs(&self) -> &WcsTransform {
        &self.wcs
    }

    /// Computes the cubic B-spline coefficients once. Later spline lookups
    /// reuse them; calling this before sharing the map across threads keeps
    /// the workers from racing to build them.
    pub fn prefilter(&self) {
        self.spline_coefficients();
    }

    pub fn is_prefiltered(&self) -> bool {
        self.spline.get().is_some()
    }

    fn spline_coefficients(&self) -> &Array2<f64> {
        self.spline.get_or_init(|| {
            let mut coeffs = self.data.mapv(|v| if v.is_finite() { v as f64 } else { 0.0 });
            for mut row in coeffs.rows_mut() {
                let mut line: Vec<f64> = row.to_vec();
                prefilter_line(&mut line);
                row.iter_mut().zip(line).for_each(|(dst, src)| *dst = src);
            }
            for mut col in coeffs.columns_mut() {
                let mut line: Vec<f64> = col.to_vec();
                prefilter_line(&mut line);
                col.iter_mut().zip(line).for_each(|(dst, src)| *dst = src);
            }
            coeffs
        })
    }

    /// Hex MD5 of the shape, WCS cards and pixel values. Identifies the map
    /// contents independently of the file it was read from.
    pub fn digest(&self) -> String {
        let mut ctx = md5::Context::new();
        let (rows, cols) = self.data.dim();
        ctx.consume(format!("{}x{}\n", rows, cols));
        for (key, value) in self.wcs.header_cards() {
            ctx.consume(format!("{}={}\n", key, value));
        }
        for row in self.data.rows() {
            let bytes: Vec<u8> = row.iter().flat_map(|v| v.to_le_bytes()).collect();
            ctx.consume(&bytes);
        }
        format!("{:x}", ctx.compute())
    }

    pub fn value_at(&self, ra_deg: f64, dec_deg: f64, interpolation: Interpolation) -> f64 {
        let (rows, cols) = self.data.dim();
        let center = ((cols as f64 - 1.0) / 2.0, (rows as f64 - 1.0) / 2.0);
        let (x, y) = self.wcs.world_to_pixel_near(ra_deg, dec_deg, center.0, center.1);
        self.pixel_value(x, y, interpolation)
    }

    pub fn pixel_value(&self, x: f64, y: f64, interpolation: Interpolation) -> f64 {
        let (rows, cols) = self.data.dim();
        if !x.is_finite() || !y.is_finite() {
            return 0.0;
        }
        if x < -0.5 || y < -0.5 || x >= cols as f64 - 0.5 || y >= rows as f64 - 0.5 {
            return 0.0;
        }

        let value = match interpolation {
            Interpolation::Nearest => {
                let ix = (x.round() as usize).min(cols - 1);
                let iy = (y.round() as usize).min(rows - 1);
                self.data[[iy, ix]] as f64
            }
            Interpolation::Bilinear => self.bilinear(x, y),
            Interpolation::CubicSpline => self.cubic_spline(x, y),
        };

        if value.is_finite() {
            value
        } else {
            0.0
        }
    }

    fn bilinear(&self, x: f64, y: f64) -> f64 {
        let (rows, cols) = self.data.dim();
        let x = x.clamp(0.0, (cols - 1) as f64);
        let y = y.clamp(0.0, (rows - 1) as f64);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(cols - 1);
        let y1 = (y0 + 1).min(rows - 1);
        let tx = x - x0 as f64;
        let ty = y - y0 as f64;

        let v00 = self.data[[y0, x0]] as f64;
        let v01 = self.data[[y0, x1]] as f64;
        let v10 = self.data[[y1, x0]] as f64;
        let v11 = self.data[[y1, x1]] as f64;

        (1.0 - ty) * ((1.0 - tx) * v00 + tx * v01) + ty * ((1.0 - tx) * v10 + tx * v11)
    }

    fn cubic_spline(&self, x: f64, y: f64) -> f64 {
        let coeffs = self.spline_coefficients();
        let (rows, cols) = coeffs.dim();

        let fx = x.floor();
        let fy = y.floor();
        let wx = bspline_weights(x - fx);
        let wy = bspline_weights(y - fy);

        let mut sum = 0.0;
        for (j, wyj) in wy.iter().enumerate() {
            let iy = mirror_index(fy as i64 - 1 + j as i64, rows);
            let mut row_sum = 0.0;
            for (i, wxi) in wx.iter().enumerate() {
                let ix = mirror_index(fx as i64 - 1 + i as i64, cols);
                row_sum += wxi * coeffs[[iy, ix]];
            }
            sum += wyj * row_sum;
        }
        sum
    }
}

fn bspline_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let one_minus = 1.0 - t;
    [
        one_minus * one_minus * one_minus / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

fn mirror_index(i: i64, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as i64 - 1);
    let mut k = i.rem_euclid(period);
    if k >= n as i64 {
        k = period - k;
    }
    k as usize
}

/// In-place cubic B-spline prefilter of one line with mirror boundaries.
fn prefilter_line(line: &mut [f64]) {
    let n = line.len();
    if n < 2 {
        return;
    }
    let z = SPLINE_POLE;
    let gain = (1.0 - z) * (1.0 - 1.0 / z);
    line.iter_mut().for_each(|v| *v *= gain);

    let horizon = ((SPLINE_TOLERANCE.ln() / z.abs().ln()).ceil() as usize).min(n);
    let mut zk = z;
    let mut sum = line[0];
    for value in line.iter().take(horizon).skip(1) {
        sum += zk * value;
        zk *= z;
    }
    line[0] = sum;
    for k in 1..n {
        line[k] += z * line[k - 1];
    }

    line[n - 1] = (z / (z * z - 1.0)) * (line[n - 1] + z * line[n - 2]);
    for k in (0..n - 1).rev() {
        line[k] = z * (line[k + 1] - line[k]);
    }
}
