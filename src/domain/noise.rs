use ndarray::Array2;
use serde::Serialize;
use thiserror::Error;

use crate::domain::selection::SelectionMask;
use crate::domain::stats::{binned_means, interp_clamped, logspace, mean, BinnedMean};

pub const DEFAULT_NOISE_BINS: usize = 20;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NoiseError {
    #[error("No selected object with a positive noise proxy at radius index {radius}")]
    EmptySelection { radius: usize },
    #[error("No populated noise bin at radius index {radius}")]
    NoPopulatedBins { radius: usize },
    #[error("Table has {found} rows, selection has {expected}")]
    LengthMismatch { expected: usize, found: usize },
}

/// Empirical map from hit-count noise variance to measured filter variance
/// for one aperture radius. Linear between bin centers, flat outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarianceModel {
    pub bins: Vec<BinnedMean>,
}

impl VarianceModel {
    /// Fits the model from noise proxies `sigma2` (squared hit-count noise)
    /// and filter outputs `filtered` of the selected objects.
    pub fn fit(sigma2: &[f64], filtered: &[f64], nbins: usize, radius: usize) -> Result<Self, NoiseError> {
        let (x, t): (Vec<f64>, Vec<f64>) = sigma2
            .iter()
            .zip(filtered)
            .filter(|(&s, &f)| s.is_finite() && s > 0.0 && f.is_finite())
            .map(|(&s, &f)| (s, f))
            .unzip();
        if x.is_empty() {
            return Err(NoiseError::EmptySelection { radius });
        }

        let t_mean = mean(&t);
        let y: Vec<f64> = t.iter().map(|v| (v - t_mean).powi(2)).collect();

        let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if lo == hi {
            let mean_y = mean(&y);
            return Ok(VarianceModel {
                bins: vec![BinnedMean {
                    mean_x: lo,
                    mean_y,
                    std_error_y: 0.0,
                    count: x.len(),
                }],
            });
        }

        let edges = logspace(lo, hi, nbins.max(1) + 1);
        let bins = binned_means(&x, &y, &edges);
        if bins.is_empty() {
            return Err(NoiseError::NoPopulatedBins { radius });
        }
        Ok(VarianceModel { bins })
    }

    /// Model returning `variance` for every proxy value.
    pub fn constant(variance: f64) -> Self {
        VarianceModel {
            bins: vec![BinnedMean {
                mean_x: 1.0,
                mean_y: variance,
                std_error_y: 0.0,
                count: 0,
            }],
        }
    }

    pub fn evaluate(&self, sigma2: f64) -> f64 {
        let xs: Vec<f64> = self.bins.iter().map(|b| b.mean_x).collect();
        let ys: Vec<f64> = self.bins.iter().map(|b| b.mean_y).collect();
        interp_clamped(sigma2, &xs, &ys)
    }
}

/// One variance model per aperture radius.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoiseCalibration {
    pub models: Vec<VarianceModel>,
}

impl NoiseCalibration {
    pub fn fit(
        filtered: &Array2<f64>,
        noise_std_dev: &Array2<f64>,
        mask: &SelectionMask,
        nbins: usize,
    ) -> Result<Self, NoiseError> {
        if filtered.nrows() != mask.len() || noise_std_dev.dim() != filtered.dim() {
            return Err(NoiseError::LengthMismatch {
                expected: mask.len(),
                found: filtered.nrows(),
            });
        }
        let rows: Vec<usize> = mask.indices().collect();
        let models = (0..filtered.ncols())
            .map(|j| {
                let sigma2: Vec<f64> = rows.iter().map(|&i| noise_std_dev[[i, j]].powi(2)).collect();
                let t: Vec<f64> = rows.iter().map(|&i| filtered[[i, j]]).collect();
                VarianceModel::fit(&sigma2, &t, nbins, j)
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!(
            "Noise calibration: {} radii, {} objects, {} bins",
            models.len(),
            rows.len(),
            nbins
        );
        Ok(NoiseCalibration { models })
    }

    pub fn calibrated_variance(&self, radius: usize, sigma2: f64) -> f64 {
        self.models
            .get(radius)
            .map(|m| m.evaluate(sigma2))
            .unwrap_or(0.0)
    }
}
