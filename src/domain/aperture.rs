use ndarray::Array2;
use thiserror::Error;

use crate::domain::stamp::Stamp;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("No observed pixel inside disk of radius {r0:.3e} rad")]
    EmptyDisk { r0: f64 },
    #[error("No observed pixel in ring between {r0:.3e} and {r1:.3e} rad")]
    EmptyRing { r0: f64, r1: f64 },
    #[error("Ring radius {r1:.3e} rad exceeds stamp half-width {half_width:.3e} rad")]
    ApertureExceedsStamp { r1: f64, half_width: f64 },
}

/// Disk-minus-ring outputs for one object and one radius.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ApertureOutput {
    /// Σ pixel area × kernel × temperature, in temperature × sr.
    pub filtered_temperature: f64,
    /// Pixels within the ring radius flagged invalid by the coverage mask.
    pub contamination: f64,
    /// sqrt(Σ (pixel area × kernel)² / hits).
    pub noise_std_dev: f64,
    pub disk_area: f64,
}

#[derive(Debug, Clone)]
pub struct DiskRingKernel {
    pub weights: Array2<f64>,
    pub disk_pixels: usize,
    pub ring_pixels: usize,
}

/// Builds the compensated kernel: +1 in the disk, -N_disk/N_ring in the ring,
/// 0 elsewhere. Pixels with no hits are left out of both regions.
pub fn disk_ring_kernel(stamp: &Stamp, r0: f64, r1: f64) -> Result<DiskRingKernel, FilterError> {
    let radius = stamp.radius();

    let mut disk_pixels = 0usize;
    let mut ring_pixels = 0usize;
    let mut region = Array2::<u8>::zeros(radius.dim());
    ndarray::Zip::from(&mut region)
        .and(&radius)
        .and(&stamp.hits)
        .for_each(|reg, &r, &h| {
            if h <= 0.0 {
                return;
            }
            if r <= r0 {
                *reg = 1;
                disk_pixels += 1;
            } else if r <= r1 {
                *reg = 2;
                ring_pixels += 1;
            }
        });

    if disk_pixels == 0 {
        return Err(FilterError::EmptyDisk { r0 });
    }
    if ring_pixels == 0 {
        return Err(FilterError::EmptyRing { r0, r1 });
    }

    let ring_weight = -(disk_pixels as f64) / ring_pixels as f64;
    let weights = region.mapv(|reg| match reg {
        1 => 1.0,
        2 => ring_weight,
        _ => 0.0,
    });

    Ok(DiskRingKernel {
        weights,
        disk_pixels,
        ring_pixels,
    })
}

pub fn apply_disk_ring(stamp: &Stamp, r0: f64, r1: f64) -> Result<ApertureOutput, FilterError> {
    let kernel = disk_ring_kernel(stamp, r0, r1)?;
    let pix_area = stamp.pixel_area;
    let radius = stamp.radius();

    let mut filtered = 0.0;
    let mut variance = 0.0;
    ndarray::Zip::from(&kernel.weights)
        .and(&stamp.temperature)
        .and(&stamp.hits)
        .for_each(|&w, &t, &h| {
            if w == 0.0 {
                return;
            }
            filtered += pix_area * w * t;
            variance += (pix_area * w).powi(2) / h;
        });

    let contamination = ndarray::Zip::from(&radius)
        .and(&stamp.mask)
        .fold(0usize, |acc, &r, &m| if r <= r1 && m < 0.5 { acc + 1 } else { acc });

    Ok(ApertureOutput {
        filtered_temperature: filtered,
        contamination: contamination as f64,
        noise_std_dev: variance.sqrt(),
        disk_area: kernel.disk_pixels as f64 * pix_area,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stamp::StampGeometry;
    use crate::utils::constants::ARCMIN;
    use approx::assert_relative_eq;

    fn uniform_stamp(temperature: f64, hits: f64) -> Stamp {
        let g = StampGeometry::default();
        let (lat, lon) = g.local_grid();
        let shape = g.shape();
        Stamp {
            lat_offset: lat,
            lon_offset: lon,
            temperature: Array2::from_elem(shape, temperature),
            mask: Array2::from_elem(shape, 1.0),
            hits: Array2::from_elem(shape, hits),
            pixel_area: g.pixel_area_sr(),
        }
    }

    #[test]
    fn test_kernel_sums_to_zero() {
        let stamp = uniform_stamp(0.0, 1.0);
        for r0_arcmin in [0.6, 1.0, 2.5, 4.0, 5.0] {
            let r0 = r0_arcmin * ARCMIN;
            let kernel = disk_ring_kernel(&stamp, r0, r0 * 2f64.sqrt()).unwrap();
            let sum: f64 = kernel.weights.sum();
            assert!(sum.abs() < 1e-9, "r0={} sum={}", r0_arcmin, sum);
            assert!(kernel.ring_pixels > 0);
        }
    }

    #[test]
    fn test_uniform_map_filters_to_zero() {
        let t0 = 42.0;
        let stamp = uniform_stamp(t0, 1.0);
        let r0 = 3.0 * ARCMIN;
        let out = apply_disk_ring(&stamp, r0, r0 * 2f64.sqrt()).unwrap();
        assert!(out.filtered_temperature.abs() < 1e-12 * t0);

        let kernel = disk_ring_kernel(&stamp, r0, r0 * 2f64.sqrt()).unwrap();
        let expected = (kernel.weights.mapv(|w| w * w).sum() * stamp.pixel_area.powi(2)).sqrt();
        assert_relative_eq!(out.noise_std_dev, expected, max_relative = 1e-12);
        assert_eq!(out.contamination, 0.0);
    }

    #[test]
    fn test_disk_area_tracks_geometry() {
        let stamp = uniform_stamp(0.0, 1.0);
        let r0 = 4.0 * ARCMIN;
        let out = apply_disk_ring(&stamp, r0, r0 * 2f64.sqrt()).unwrap();
        let continuous = std::f64::consts::PI * r0 * r0;
        assert_relative_eq!(out.disk_area, continuous, max_relative = 0.03);
    }

    #[test]
    fn test_masked_pixel_counts_as_contamination() {
        let mut stamp = uniform_stamp(0.0, 1.0);
        stamp.mask[[30, 30]] = 0.0;
        stamp.mask[[0, 0]] = 0.0;
        let r0 = 2.0 * ARCMIN;
        let out = apply_disk_ring(&stamp, r0, r0 * 2f64.sqrt()).unwrap();
        assert_eq!(out.contamination, 1.0);
    }

    #[test]
    fn test_zero_hit_pixels_are_excluded() {
        let mut stamp = uniform_stamp(1.0, 4.0);
        for i in 25..35 {
            stamp.hits[[30, i]] = 0.0;
            stamp.temperature[[30, i]] = 1.0e6;
        }
        let r0 = 2.0 * ARCMIN;
        let out = apply_disk_ring(&stamp, r0, r0 * 2f64.sqrt()).unwrap();
        assert!(out.noise_std_dev.is_finite());
        assert!(out.filtered_temperature.abs() < 1e-9);

        let kernel = disk_ring_kernel(&stamp, r0, r0 * 2f64.sqrt()).unwrap();
        assert_eq!(kernel.weights[[30, 30]], 0.0);
        assert!(kernel.weights.sum().abs() < 1e-9);
    }

    #[test]
    fn test_ring_thinner_than_pixel_is_rejected() {
        let stamp = uniform_stamp(0.0, 1.0);
        let r0 = 0.1 * ARCMIN;
        let err = disk_ring_kernel(&stamp, r0, r0 * 1.0001).unwrap_err();
        assert!(matches!(err, FilterError::EmptyDisk { .. } | FilterError::EmptyRing { .. }));
    }

    #[test]
    fn test_unobserved_stamp_has_empty_disk() {
        let stamp = uniform_stamp(0.0, 0.0);
        let r0 = 2.0 * ARCMIN;
        let err = apply_disk_ring(&stamp, r0, r0 * 2f64.sqrt()).unwrap_err();
        assert_eq!(err, FilterError::EmptyDisk { r0 });
    }
}
