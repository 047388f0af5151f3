use serde::{Deserialize, Serialize};

use crate::domain::cosmology::FlatLcdm;
use crate::utils::constants::ARCMIN;

/// Ring outer radius over disk radius giving equal disk and ring areas.
pub const EQUAL_AREA_RING_RATIO: f64 = std::f64::consts::SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiusUnit {
    Arcmin,
    /// Comoving Mpc/h, converted to an angle at each object's redshift.
    ComovingMpch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApertureRadii {
    pub unit: RadiusUnit,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl Default for ApertureRadii {
    fn default() -> Self {
        Self {
            unit: RadiusUnit::Arcmin,
            min: 1.0,
            max: 4.0,
            count: 4,
        }
    }
}

impl ApertureRadii {
    pub fn values(&self) -> Vec<f64> {
        linspace(self.min, self.max, self.count)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Disk and ring radii in radians for every aperture, at redshift `z`.
    pub fn angular(&self, z: f64, cosmology: &FlatLcdm) -> Vec<(f64, f64)> {
        let scale = match self.unit {
            RadiusUnit::Arcmin => ARCMIN,
            RadiusUnit::ComovingMpch => {
                let distance = cosmology.comoving_transverse_distance(z);
                if distance > 0.0 {
                    1.0 / distance
                } else {
                    f64::INFINITY
                }
            }
        };
        self.values()
            .into_iter()
            .map(|r| {
                let r0 = r * scale;
                (r0, r0 * EQUAL_AREA_RING_RATIO)
            })
            .collect()
    }
}

pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_radii() {
        let radii = ApertureRadii::default();
        assert_eq!(radii.values(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_arcmin_ring_is_equal_area() {
        let radii = ApertureRadii::default();
        let angular = radii.angular(0.5, &FlatLcdm::default());
        let (r0, r1) = angular[3];
        assert_relative_eq!(r0, 4.0 * ARCMIN);
        assert_relative_eq!(r1 * r1 - r0 * r0, r0 * r0, max_relative = 1e-12);
    }

    #[test]
    fn test_comoving_radius_shrinks_with_redshift() {
        let radii = ApertureRadii {
            unit: RadiusUnit::ComovingMpch,
            min: 1.0,
            max: 5.0,
            count: 7,
        };
        let cosmo = FlatLcdm::default();
        let near = radii.angular(0.3, &cosmo);
        let far = radii.angular(0.6, &cosmo);
        assert_eq!(near.len(), 7);
        assert!(far[0].0 < near[0].0);
        assert_relative_eq!(near[0].0, 1.0 / cosmo.comoving_distance(0.3));
    }

    #[test]
    fn test_linspace_edges() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
        assert_eq!(linspace(1.0, 5.0, 5), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}
