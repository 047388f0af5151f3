use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::filter_table::FilterTable;
use crate::model::catalog::Catalog;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SelectionError {
    #[error("Selection vector has {found} entries, catalog has {expected}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("Filter table has {found} objects, catalog has {expected}")]
    TableMismatch { expected: usize, found: usize },
}

/// Per-object cuts, combined with AND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCriteria {
    /// Closed mass interval.
    pub mass_range: Option<(f64, f64)>,
    pub require_overlap: bool,
    /// Keep objects with |contamination at the largest radius| below this.
    pub point_source_cut: Option<f64>,
    pub extra: Option<Vec<bool>>,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            mass_range: Some((1.0e6, 1.0e17)),
            require_overlap: true,
            point_source_cut: Some(1.0),
            extra: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionMask {
    mask: Vec<bool>,
    selected: usize,
}

impl SelectionMask {
    pub fn from_vec(mask: Vec<bool>) -> Self {
        let selected = mask.iter().filter(|&&m| m).count();
        SelectionMask { mask, selected }
    }

    pub fn all(n: usize) -> Self {
        Self::from_vec(vec![true; n])
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.mask
    }

    pub fn len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter().enumerate().filter(|(_, &m)| m).map(|(i, _)| i)
    }

    pub fn and(&self, other: &SelectionMask) -> Result<SelectionMask, SelectionError> {
        if other.len() != self.len() {
            return Err(SelectionError::LengthMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        Ok(Self::from_vec(
            self.mask.iter().zip(&other.mask).map(|(&a, &b)| a && b).collect(),
        ))
    }
}

pub fn catalog_mask(
    catalog: &Catalog,
    table: &FilterTable,
    criteria: &SelectionCriteria,
) -> Result<SelectionMask, SelectionError> {
    let n = catalog.len();
    if table.n_objects() != n {
        return Err(SelectionError::TableMismatch {
            expected: n,
            found: table.n_objects(),
        });
    }
    if let Some(extra) = &criteria.extra {
        if extra.len() != n {
            return Err(SelectionError::LengthMismatch {
                expected: n,
                found: extra.len(),
            });
        }
    }

    let last = table.n_radii().checked_sub(1);
    let mask = (0..n)
        .map(|i| {
            if let Some((lo, hi)) = criteria.mass_range {
                let m = catalog.mass[i];
                if !(m >= lo && m <= hi) {
                    return false;
                }
            }
            if criteria.require_overlap && !table.overlap[i] {
                return false;
            }
            if let (Some(cut), Some(j)) = (criteria.point_source_cut, last) {
                if table.contamination[[i, j]].abs() >= cut {
                    return false;
                }
            }
            if let Some(extra) = &criteria.extra {
                if !extra[i] {
                    return false;
                }
            }
            true
        })
        .collect();

    let mask = SelectionMask::from_vec(mask);
    log::debug!("Selected {} of {} objects", mask.selected(), n);
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(masses: &[f64]) -> Catalog {
        let n = masses.len();
        Catalog::new(
            vec![0.0; n],
            vec![0.0; n],
            vec![0.5; n],
            masses.to_vec(),
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_mass_range_is_closed() {
        let cat = catalog(&[1e12, 2e12, 3e12, 4e12]);
        let mut table = FilterTable::zeros(4, 2);
        table.overlap = vec![true; 4];
        let criteria = SelectionCriteria {
            mass_range: Some((2e12, 3e12)),
            ..Default::default()
        };
        let mask = catalog_mask(&cat, &table, &criteria).unwrap();
        assert_eq!(mask.as_slice(), &[false, true, true, false]);
        assert_eq!(mask.selected(), 2);
    }

    #[test]
    fn test_overlap_and_point_sources() {
        let cat = catalog(&[1e13; 4]);
        let mut table = FilterTable::zeros(4, 3);
        table.overlap = vec![true, false, true, true];
        table.contamination[[2, 2]] = 1.0;
        table.contamination[[3, 0]] = 5.0;
        let mask = catalog_mask(&cat, &table, &SelectionCriteria::default()).unwrap();
        assert_eq!(mask.as_slice(), &[true, false, false, true]);

        let relaxed = SelectionCriteria {
            require_overlap: false,
            point_source_cut: None,
            ..Default::default()
        };
        assert_eq!(catalog_mask(&cat, &table, &relaxed).unwrap().selected(), 4);
    }

    #[test]
    fn test_extra_vector() {
        let cat = catalog(&[1e13; 3]);
        let mut table = FilterTable::zeros(3, 1);
        table.overlap = vec![true; 3];
        let criteria = SelectionCriteria {
            extra: Some(vec![true, false, true]),
            ..Default::default()
        };
        let mask = catalog_mask(&cat, &table, &criteria).unwrap();
        assert_eq!(mask.indices().collect::<Vec<_>>(), vec![0, 2]);

        let bad = SelectionCriteria {
            extra: Some(vec![true]),
            ..Default::default()
        };
        assert_eq!(
            catalog_mask(&cat, &table, &bad).unwrap_err(),
            SelectionError::LengthMismatch { expected: 3, found: 1 }
        );
    }

    #[test]
    fn test_mask_and() {
        let a = SelectionMask::from_vec(vec![true, true, false]);
        let b = SelectionMask::from_vec(vec![false, true, true]);
        assert_eq!(a.and(&b).unwrap().as_slice(), &[false, true, false]);
        assert!(a.and(&SelectionMask::all(2)).is_err());
    }
}
