use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::noise::NoiseCalibration;
use crate::domain::selection::SelectionMask;
use crate::domain::stats::mean;
use crate::model::catalog::Catalog;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("No object passes the selection")]
    EmptySelection,
    #[error("Catalog has no {0} column")]
    MissingColumn(&'static str),
    #[error("Object {index} has non-positive noise variance {variance:e} at radius index {radius}")]
    NonPositiveVariance {
        index: usize,
        radius: usize,
        variance: f64,
    },
    #[error("Estimator denominator vanishes at radius index {radius}")]
    ZeroDenominator { radius: usize },
    #[error("Table has {found} rows, catalog has {expected}")]
    LengthMismatch { expected: usize, found: usize },
}

/// Linear kSZ amplitude estimators, fitting filtered temperature against the
/// predicted integrated kSZ signal k of each object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum KszEstimator {
    /// Velocity-weighted, template v = -v_r, hit-count noise weights.
    Raw,
    HitNoiseWeighted,
    /// Hit-count weights on mean-subtracted T and k.
    MeanSubtracted,
    /// Mean-subtracted, weighted by the calibrated noise variance.
    CalibratedNoiseWeighted,
}

impl KszEstimator {
    pub const ALL: [KszEstimator; 4] = [
        KszEstimator::Raw,
        KszEstimator::HitNoiseWeighted,
        KszEstimator::MeanSubtracted,
        KszEstimator::CalibratedNoiseWeighted,
    ];

    fn subtracts_mean(self) -> bool {
        matches!(self, KszEstimator::MeanSubtracted | KszEstimator::CalibratedNoiseWeighted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KszMeasurement {
    pub estimator: KszEstimator,
    pub amplitude: Vec<f64>,
    pub std_error: Vec<f64>,
    pub snr: Vec<f64>,
    pub selected: usize,
}

/// Amplitude and standard error for one radius. `t`, `k`, `v` are the
/// selected objects; `s2_hit` the hit-count variance and `s2_cal` the
/// calibrated one.
fn estimate_radius(
    estimator: KszEstimator,
    t: &[f64],
    k: &[f64],
    v: &[f64],
    s2_hit: &[f64],
    s2_cal: &[f64],
    radius: usize,
) -> Result<(f64, f64), EstimatorError> {
    let (mut num, mut den, mut var_num) = (0.0, 0.0, 0.0);

    match estimator {
        KszEstimator::Raw => {
            for i in 0..t.len() {
                let w = v[i] / s2_hit[i];
                num += t[i] * w;
                den += k[i] * w;
                var_num += s2_cal[i] * w * w;
            }
        }
        KszEstimator::HitNoiseWeighted | KszEstimator::MeanSubtracted => {
            for i in 0..t.len() {
                let w = k[i] / s2_hit[i];
                num += t[i] * w;
                den += k[i] * w;
                var_num += s2_cal[i] * w * w;
            }
        }
        KszEstimator::CalibratedNoiseWeighted => {
            for i in 0..t.len() {
                let w = k[i] / s2_cal[i];
                num += t[i] * w;
                den += k[i] * w;
            }
            var_num = den;
        }
    }

    if den == 0.0 || !den.is_finite() {
        return Err(EstimatorError::ZeroDenominator { radius });
    }
    Ok((num / den, var_num.sqrt() / den.abs()))
}

fn centered(values: Vec<f64>) -> Vec<f64> {
    let m = mean(&values);
    values.into_iter().map(|v| v - m).collect()
}

pub fn measure_ksz(
    estimator: KszEstimator,
    catalog: &Catalog,
    filtered: &Array2<f64>,
    noise_std_dev: &Array2<f64>,
    mask: &SelectionMask,
    calibration: &NoiseCalibration,
) -> Result<KszMeasurement, EstimatorError> {
    let n = catalog.len();
    if filtered.nrows() != n || noise_std_dev.nrows() != n || mask.len() != n {
        return Err(EstimatorError::LengthMismatch {
            expected: n,
            found: filtered.nrows().min(noise_std_dev.nrows()).min(mask.len()),
        });
    }
    if mask.selected() == 0 {
        return Err(EstimatorError::EmptySelection);
    }
    let ksz = catalog
        .integrated_ksz
        .as_ref()
        .ok_or(EstimatorError::MissingColumn("integrated_ksz"))?;
    let v_r = match estimator {
        KszEstimator::Raw => Some(catalog.v_r.as_ref().ok_or(EstimatorError::MissingColumn("v_r"))?),
        _ => None,
    };

    let rows: Vec<usize> = mask.indices().collect();
    let v: Vec<f64> = match v_r {
        Some(v_r) => rows.iter().map(|&i| -v_r[i]).collect(),
        None => Vec::new(),
    };
    let mut k: Vec<f64> = rows.iter().map(|&i| ksz[i]).collect();
    if estimator.subtracts_mean() {
        k = centered(k);
    }

    let n_radii = filtered.ncols();
    let mut amplitude = Vec::with_capacity(n_radii);
    let mut std_error = Vec::with_capacity(n_radii);
    for j in 0..n_radii {
        let mut t: Vec<f64> = rows.iter().map(|&i| filtered[[i, j]]).collect();
        if estimator.subtracts_mean() {
            t = centered(t);
        }

        let mut s2_hit = Vec::with_capacity(rows.len());
        let mut s2_cal = Vec::with_capacity(rows.len());
        for &i in &rows {
            let hit = noise_std_dev[[i, j]].powi(2);
            let cal = calibration.calibrated_variance(j, hit);
            let needed = match estimator {
                KszEstimator::CalibratedNoiseWeighted => cal,
                _ => hit,
            };
            if !(needed > 0.0) {
                return Err(EstimatorError::NonPositiveVariance {
                    index: i,
                    radius: j,
                    variance: needed,
                });
            }
            s2_hit.push(hit);
            s2_cal.push(cal);
        }

        let (a, e) = estimate_radius(estimator, &t, &k, &v, &s2_hit, &s2_cal, j)?;
        amplitude.push(a);
        std_error.push(e);
    }

    let snr = amplitude
        .iter()
        .zip(&std_error)
        .map(|(a, e)| if *e > 0.0 { a / e } else { 0.0 })
        .collect();

    Ok(KszMeasurement {
        estimator,
        amplitude,
        std_error,
        snr,
        selected: rows.len(),
    })
}

/// Runs every estimator that the catalog has columns for.
pub fn measure_all(
    catalog: &Catalog,
    filtered: &Array2<f64>,
    noise_std_dev: &Array2<f64>,
    mask: &SelectionMask,
    calibration: &NoiseCalibration,
) -> Result<Vec<KszMeasurement>, EstimatorError> {
    KszEstimator::ALL
        .iter()
        .filter(|&&e| e != KszEstimator::Raw || catalog.v_r.is_some())
        .map(|&e| measure_ksz(e, catalog, filtered, noise_std_dev, mask, calibration))
        .collect()
}
