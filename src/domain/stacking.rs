use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use thiserror::Error;

use crate::domain::selection::SelectionMask;
use crate::domain::stats::MeanSummary;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StackError {
    #[error("No object passes the selection")]
    EmptySelection,
    #[error("Selected weights sum to zero, cannot normalize")]
    ZeroWeightSum,
    #[error("{what} has {found} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stack {
    pub values: Vec<f64>,
    pub selected: usize,
    pub weight_sum: f64,
}

fn check_inputs(n: usize, mask: &SelectionMask, weights: &[f64]) -> Result<(), StackError> {
    if mask.len() != n {
        return Err(StackError::LengthMismatch {
            what: "selection mask",
            expected: n,
            found: mask.len(),
        });
    }
    if weights.len() != n {
        return Err(StackError::LengthMismatch {
            what: "weights",
            expected: n,
            found: weights.len(),
        });
    }
    if mask.selected() == 0 {
        return Err(StackError::EmptySelection);
    }
    Ok(())
}

/// Weighted sum over the selected rows of an N×R quantity, optionally
/// divided by the selected weight sum.
pub fn stack(
    quantity: &Array2<f64>,
    mask: &SelectionMask,
    weights: &[f64],
    normalize: bool,
) -> Result<Stack, StackError> {
    check_inputs(quantity.nrows(), mask, weights)?;

    let mut values = Array1::<f64>::zeros(quantity.ncols());
    let mut weight_sum = 0.0;
    for i in mask.indices() {
        values.scaled_add(weights[i], &quantity.index_axis(Axis(0), i));
        weight_sum += weights[i];
    }

    if normalize {
        if weight_sum == 0.0 {
            return Err(StackError::ZeroWeightSum);
        }
        values /= weight_sum;
    }

    Ok(Stack {
        values: values.to_vec(),
        selected: mask.selected(),
        weight_sum,
    })
}

/// [`stack`] for one value per object.
pub fn stack_scalar(
    quantity: &[f64],
    mask: &SelectionMask,
    weights: &[f64],
    normalize: bool,
) -> Result<f64, StackError> {
    let column = Array2::from_shape_vec((quantity.len(), 1), quantity.to_vec())
        .map_err(|_| StackError::LengthMismatch {
            what: "quantity",
            expected: mask.len(),
            found: quantity.len(),
        })?;
    Ok(stack(&column, mask, weights, normalize)?.values[0])
}

/// Inverse-variance weights 1/σ² for one radius, rescaled to unit mean over
/// the selected objects. Unselected objects and non-positive σ get weight 0.
pub fn inverse_variance_weights(sigma: &[f64], mask: &SelectionMask) -> Result<Vec<f64>, StackError> {
    if sigma.len() != mask.len() {
        return Err(StackError::LengthMismatch {
            what: "noise column",
            expected: mask.len(),
            found: sigma.len(),
        });
    }
    let mut weights: Vec<f64> = sigma
        .iter()
        .zip(mask.as_slice())
        .map(|(&s, &m)| if m && s > 0.0 && s.is_finite() { 1.0 / (s * s) } else { 0.0 })
        .collect();

    let selected = mask.selected();
    if selected == 0 {
        return Err(StackError::EmptySelection);
    }
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return Err(StackError::ZeroWeightSum);
    }
    let scale = selected as f64 / total;
    weights.iter_mut().for_each(|w| *w *= scale);
    Ok(weights)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TszProfile {
    pub radii: Vec<f64>,
    pub per_radius: Vec<MeanSummary>,
}

/// tSZ summary per radius: inverse-variance weighted filter outputs of the
/// selected objects, reduced to mean, standard error of the mean and SNR.
/// Objects without a usable noise estimate at a radius are left out of that
/// radius's summary.
pub fn tsz_profile(
    filtered: &Array2<f64>,
    noise: &Array2<f64>,
    mask: &SelectionMask,
    radii: &[f64],
) -> Result<TszProfile, StackError> {
    if noise.dim() != filtered.dim() {
        return Err(StackError::LengthMismatch {
            what: "noise table",
            expected: filtered.len(),
            found: noise.len(),
        });
    }
    if mask.len() != filtered.nrows() {
        return Err(StackError::LengthMismatch {
            what: "selection mask",
            expected: filtered.nrows(),
            found: mask.len(),
        });
    }
    if filtered.ncols() != radii.len() {
        return Err(StackError::LengthMismatch {
            what: "radius list",
            expected: filtered.ncols(),
            found: radii.len(),
        });
    }

    let mut per_radius = Vec::with_capacity(radii.len());
    for j in 0..filtered.ncols() {
        let sigma = noise.column(j).to_vec();
        let weights = inverse_variance_weights(&sigma, mask)?;
        let usable: Vec<usize> = mask
            .indices()
            .filter(|&i| sigma[i] > 0.0 && sigma[i].is_finite())
            .collect();
        // weights have unit mean over all selected objects; restore it over the usable ones
        let scale = usable.len() as f64 / mask.selected() as f64;
        let values: Vec<f64> = usable
            .iter()
            .map(|&i| scale * weights[i] * filtered[[i, j]])
            .collect();
        per_radius.push(MeanSummary::of(&values));
    }

    Ok(TszProfile {
        radii: radii.to_vec(),
        per_radius,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_normalized_stack_of_constant_rows() {
        let row = [1.5, -2.0, 7.0];
        let q = Array2::from_shape_fn((5, 3), |(_, j)| row[j]);
        let mask = SelectionMask::from_vec(vec![true, false, true, true, false]);
        let weights = [0.3, 100.0, 2.0, 5.5, 0.0];
        let s = stack(&q, &mask, &weights, true).unwrap();
        for (v, r) in s.values.iter().zip(row) {
            assert_relative_eq!(*v, r, max_relative = 1e-12);
        }
        assert_eq!(s.selected, 3);
        assert_relative_eq!(s.weight_sum, 7.8);
    }

    #[test]
    fn test_unnormalized_stack_is_weighted_sum() {
        let q = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mask = SelectionMask::from_vec(vec![true, true, false]);
        let s = stack(&q, &mask, &[2.0, 1.0, 9.0], false).unwrap();
        assert_eq!(s.values, vec![5.0, 8.0]);
    }

    #[test]
    fn test_empty_selection_and_zero_weights() {
        let q = array![[1.0], [2.0]];
        let none = SelectionMask::from_vec(vec![false, false]);
        assert_eq!(stack(&q, &none, &[1.0, 1.0], false), Err(StackError::EmptySelection));

        let all = SelectionMask::all(2);
        assert_eq!(stack(&q, &all, &[0.0, 0.0], true), Err(StackError::ZeroWeightSum));
        assert!(stack(&q, &all, &[0.0, 0.0], false).is_ok());
        assert!(matches!(
            stack(&q, &all, &[1.0], false),
            Err(StackError::LengthMismatch { what: "weights", .. })
        ));
    }

    #[test]
    fn test_stack_scalar() {
        let mask = SelectionMask::from_vec(vec![true, false, true]);
        let v = stack_scalar(&[2.0, 50.0, 4.0], &mask, &[1.0, 1.0, 3.0], true).unwrap();
        assert_eq!(v, 3.5);
    }

    #[test]
    fn test_inverse_variance_weights_have_unit_mean() {
        let mask = SelectionMask::from_vec(vec![true, true, false, true]);
        let w = inverse_variance_weights(&[1.0, 2.0, 0.5, 0.0], &mask).unwrap();
        assert_eq!(w[2], 0.0);
        assert_eq!(w[3], 0.0);
        assert_relative_eq!(w[0] + w[1] + w[3], 3.0);
        assert_relative_eq!(w[0] / w[1], 4.0);
    }

    #[test]
    fn test_tsz_profile_uniform_noise() {
        let filtered = array![[1.0, -1.0], [3.0, -3.0], [100.0, 0.0]];
        let noise = Array2::from_elem((3, 2), 0.2);
        let mask = SelectionMask::from_vec(vec![true, true, false]);
        let p = tsz_profile(&filtered, &noise, &mask, &[1.0, 2.0]).unwrap();
        assert_relative_eq!(p.per_radius[0].mean, 2.0, max_relative = 1e-12);
        assert_relative_eq!(p.per_radius[1].mean, -2.0, max_relative = 1e-12);
        assert_relative_eq!(p.per_radius[0].std_error, 1.0 / 2f64.sqrt(), max_relative = 1e-12);
        assert_eq!(p.per_radius[0].count, 2);
    }

    #[test]
    fn test_tsz_profile_skips_objects_without_noise() {
        let filtered = array![[2.0], [4.0], [50.0], [7.0]];
        let noise = array![[0.1], [0.1], [0.0], [f64::NAN]];
        let mask = SelectionMask::all(4);
        let p = tsz_profile(&filtered, &noise, &mask, &[1.0]).unwrap();
        assert_eq!(p.per_radius[0].count, 2);
        assert_relative_eq!(p.per_radius[0].mean, 3.0, max_relative = 1e-12);
        assert_relative_eq!(p.per_radius[0].std_error, 1.0 / 2f64.sqrt(), max_relative = 1e-12);
    }
}
