use serde::{Deserialize, Serialize};

/// Hubble distance c/H0 in Mpc/h.
pub const HUBBLE_DISTANCE_MPCH: f64 = 2997.924_58;

const SIMPSON_STEPS: usize = 512;

/// Flat LCDM background, enough to turn comoving aperture sizes into angles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatLcdm {
    pub omega_m: f64,
}

impl Default for FlatLcdm {
    fn default() -> Self {
        Self { omega_m: 0.3 }
    }
}

impl FlatLcdm {
    fn inverse_e(&self, z: f64) -> f64 {
        let a3 = (1.0 + z).powi(3);
        1.0 / (self.omega_m * a3 + 1.0 - self.omega_m).sqrt()
    }

    /// Line-of-sight comoving distance to redshift z, Mpc/h.
    pub fn comoving_distance(&self, z: f64) -> f64 {
        if z <= 0.0 {
            return 0.0;
        }
        let h = z / SIMPSON_STEPS as f64;
        let mut sum = self.inverse_e(0.0) + self.inverse_e(z);
        for i in 1..SIMPSON_STEPS {
            let w = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += w * self.inverse_e(i as f64 * h);
        }
        HUBBLE_DISTANCE_MPCH * sum * h / 3.0
    }

    /// Transverse comoving distance; equal to the line-of-sight one in a flat
    /// universe.
    pub fn comoving_transverse_distance(&self, z: f64) -> f64 {
        self.comoving_distance(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_low_redshift_is_hubble_law() {
        let c = FlatLcdm::default();
        assert_relative_eq!(c.comoving_distance(0.001), HUBBLE_DISTANCE_MPCH * 0.001, max_relative = 1e-3);
    }

    #[test]
    fn test_known_distance_at_unit_redshift() {
        let c = FlatLcdm { omega_m: 0.3 };
        assert_relative_eq!(c.comoving_distance(1.0), 2312.7, max_relative = 2e-3);
    }

    #[test]
    fn test_einstein_de_sitter_closed_form() {
        let c = FlatLcdm { omega_m: 1.0 };
        let z = 2.0f64;
        let expected = 2.0 * HUBBLE_DISTANCE_MPCH * (1.0 - 1.0 / (1.0 + z).sqrt());
        assert_relative_eq!(c.comoving_distance(z), expected, max_relative = 1e-8);
    }

    #[test]
    fn test_non_positive_redshift() {
        assert_eq!(FlatLcdm::default().comoving_transverse_distance(0.0), 0.0);
    }
}
