use anyhow::{bail, Context, Result};

use crate::model::HduHeader;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Gnomonic, about (CRVAL1, CRVAL2).
    Tan,
    /// Plate carree; CRVAL2 shifts the reference latitude.
    Car,
    /// Cylindrical equal area with PV2_1 = lambda, reference latitude 0.
    Cea { lambda: f64 },
}

impl Projection {
    /// Reads the projection code from CTYPE1 ("RA---CEA" and the like).
    /// Anything unrecognised is treated as plate carree.
    fn from_header(header: &HduHeader) -> Projection {
        let ctype = header.get("CTYPE1").unwrap_or("");
        match ctype.get(5..8).unwrap_or("") {
            "TAN" => Projection::Tan,
            "CEA" => Projection::Cea {
                lambda: header.get_f64("PV2_1").unwrap_or(1.0),
            },
            _ => Projection::Car,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Projection::Tan => "TAN",
            Projection::Car => "CAR",
            Projection::Cea { .. } => "CEA",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CelestialCoord {
    pub ra: f64,
    pub dec: f64,
}

/// Linear pixel-to-intermediate mapping followed by a sky projection.
/// Pixel coordinates are 0-based; FITS CRPIX is stored 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct WcsTransform {
    crpix: [f64; 2],
    crval: [f64; 2],
    cd: [[f64; 2]; 2],
    projection: Projection,
}

/// Angle difference in degrees, wrapped into (-180, 180].
fn wrap_degrees(delta: f64) -> f64 {
    let d = delta.rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

fn normalize_ra(ra: f64) -> f64 {
    ra.rem_euclid(360.0)
}

fn cd_matrix(header: &HduHeader) -> Result<[[f64; 2]; 2]> {
    let cd = ["CD1_1", "CD1_2", "CD2_1", "CD2_2"].map(|k| header.get_f64(k));
    if let [Some(a), Some(b), Some(c), Some(d)] = cd {
        return Ok([[a, b], [c, d]]);
    }

    let cdelt1 = header.get_f64("CDELT1").context("Missing CD matrix and CDELT1")?;
    let cdelt2 = header.get_f64("CDELT2").context("Missing CD matrix and CDELT2")?;
    let (sin_r, cos_r) = header.get_f64("CROTA2").unwrap_or(0.0).to_radians().sin_cos();
    Ok([
        [cdelt1 * cos_r, -cdelt2 * sin_r],
        [cdelt1 * sin_r, cdelt2 * cos_r],
    ])
}

impl WcsTransform {
    /// Diagonal CD matrix from `cdelt` (degrees per pixel). `crpix` is 1-based.
    pub fn new(projection: Projection, crpix: (f64, f64), crval: (f64, f64), cdelt: (f64, f64)) -> Self {
        WcsTransform {
            crpix: [crpix.0, crpix.1],
            crval: [crval.0, crval.1],
            cd: [[cdelt.0, 0.0], [0.0, cdelt.1]],
            projection,
        }
    }

    pub fn from_header(header: &HduHeader) -> Result<Self> {
        let mut crpix = [0.0; 2];
        let mut crval = [0.0; 2];
        for axis in 0..2 {
            let n = axis + 1;
            crpix[axis] = header
                .get_f64(&format!("CRPIX{}", n))
                .with_context(|| format!("Missing CRPIX{}", n))?;
            crval[axis] = header
                .get_f64(&format!("CRVAL{}", n))
                .with_context(|| format!("Missing CRVAL{}", n))?;
        }

        let projection = Projection::from_header(header);
        if matches!(projection, Projection::Cea { .. }) && crval[1].abs() > 1e-12 {
            bail!("CEA maps must use a reference latitude of 0, got CRVAL2 = {}", crval[1]);
        }

        Ok(WcsTransform {
            crpix,
            crval,
            cd: cd_matrix(header)?,
            projection,
        })
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn pixel_to_world(&self, x: f64, y: f64) -> CelestialCoord {
        let dx = x + 1.0 - self.crpix[0];
        let dy = y + 1.0 - self.crpix[1];
        let u = self.cd[0][0] * dx + self.cd[0][1] * dy;
        let v = self.cd[1][0] * dx + self.cd[1][1] * dy;
        let (ra, dec) = self.sky_from_plane(u, v);
        CelestialCoord {
            ra: normalize_ra(ra),
            dec,
        }
    }

    /// 0-based (column, row) of a sky position, NaN where the projection
    /// has no image of it. Cylindrical longitudes land on the branch within
    /// 180 degrees of the reference pixel.
    pub fn world_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        self.world_to_pixel_near(ra, dec, self.crpix[0] - 1.0, self.crpix[1] - 1.0)
    }

    /// Like [`world_to_pixel`](Self::world_to_pixel), but cylindrical
    /// longitudes land on the branch within 180 degrees of pixel
    /// `(x_ref, y_ref)`. Maps pass their central pixel so that every pixel
    /// inverts to itself even when CRVAL1 lies far outside the footprint.
    pub fn world_to_pixel_near(&self, ra: f64, dec: f64, x_ref: f64, y_ref: f64) -> (f64, f64) {
        let [[a, b], [c, d]] = self.cd;
        let det = a * d - b * c;
        if det.abs() < 1e-30 {
            return (f64::NAN, f64::NAN);
        }

        let u_ref = self.cd[0][0] * (x_ref + 1.0 - self.crpix[0]) + self.cd[0][1] * (y_ref + 1.0 - self.crpix[1]);
        let (u, v) = self.plane_from_sky(ra, dec, u_ref);
        let dx = (d * u - b * v) / det;
        let dy = (a * v - c * u) / det;
        (dx + self.crpix[0] - 1.0, dy + self.crpix[1] - 1.0)
    }

    /// Intermediate world coordinates (degrees) to (ra, dec).
    fn sky_from_plane(&self, u: f64, v: f64) -> (f64, f64) {
        let [ra0, dec0] = self.crval;
        match self.projection {
            Projection::Car => (ra0 + u, dec0 + v),
            Projection::Cea { lambda } => {
                let s = lambda * v.to_radians();
                let dec = if s.abs() <= 1.0 { s.asin().to_degrees() } else { f64::NAN };
                (ra0 + u, dec)
            }
            Projection::Tan => {
                let (xi, eta) = (u.to_radians(), v.to_radians());
                let (sin_d0, cos_d0) = dec0.to_radians().sin_cos();
                let denom = cos_d0 - eta * sin_d0;
                let ra = ra0 + xi.atan2(denom).to_degrees();
                let dec = (sin_d0 + eta * cos_d0).atan2(xi.hypot(denom)).to_degrees();
                (ra, dec)
            }
        }
    }

    /// (ra, dec) to intermediate world coordinates in degrees. For the
    /// cylindrical projections `u` is unwound to within 180 of `u_ref`.
    fn plane_from_sky(&self, ra: f64, dec: f64, u_ref: f64) -> (f64, f64) {
        let [ra0, dec0] = self.crval;
        let unwound = |ra: f64| u_ref + wrap_degrees(ra - ra0 - u_ref);
        match self.projection {
            Projection::Car => (unwound(ra), dec - dec0),
            Projection::Cea { lambda } => (unwound(ra), (dec.to_radians().sin() / lambda).to_degrees()),
            Projection::Tan => {
                let (sin_d, cos_d) = dec.to_radians().sin_cos();
                let (sin_d0, cos_d0) = dec0.to_radians().sin_cos();
                let (sin_da, cos_da) = (ra - ra0).to_radians().sin_cos();
                let cos_c = sin_d * sin_d0 + cos_d * cos_d0 * cos_da;
                if cos_c < 1e-15 {
                    return (f64::NAN, f64::NAN);
                }
                let xi = cos_d * sin_da / cos_c;
                let eta = (sin_d * cos_d0 - cos_d * sin_d0 * cos_da) / cos_c;
                (xi.to_degrees(), eta.to_degrees())
            }
        }
    }

    /// Header cards describing this transform, for writing FITS files.
    pub fn header_cards(&self) -> Vec<(String, String)> {
        let code = self.projection.code();
        let mut cards = vec![
            ("CTYPE1".to_string(), format!("RA---{}", code)),
            ("CTYPE2".to_string(), format!("DEC--{}", code)),
        ];
        for axis in 0..2 {
            cards.push((format!("CRPIX{}", axis + 1), format!("{}", self.crpix[axis])));
            cards.push((format!("CRVAL{}", axis + 1), format!("{}", self.crval[axis])));
        }
        for (i, row) in self.cd.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                cards.push((format!("CD{}_{}", i + 1, j + 1), format!("{:e}", value)));
            }
        }
        if let Projection::Cea { lambda } = self.projection {
            cards.push(("PV2_1".to_string(), format!("{}", lambda)));
        }
        cards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn header(pairs: &[(&str, &str)]) -> HduHeader {
        HduHeader::from_cards(pairs)
    }

    #[test]
    fn test_tan_reference_pixel() {
        let h = header(&[
            ("CRPIX1", "512"),
            ("CRPIX2", "512"),
            ("CRVAL1", "180.0"),
            ("CRVAL2", "45.0"),
            ("CDELT1", "-0.001"),
            ("CDELT2", "0.001"),
            ("CTYPE1", "RA---TAN"),
            ("CTYPE2", "DEC--TAN"),
        ]);
        let wcs = WcsTransform::from_header(&h).unwrap();
        assert_eq!(wcs.projection(), Projection::Tan);

        let coord = wcs.pixel_to_world(511.0, 511.0);
        assert_abs_diff_eq!(coord.ra, 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(coord.dec, 45.0, epsilon = 1e-9);

        let (x, y) = wcs.world_to_pixel(180.3, 45.2);
        let back = wcs.pixel_to_world(x, y);
        assert_abs_diff_eq!(back.ra, 180.3, epsilon = 1e-9);
        assert_abs_diff_eq!(back.dec, 45.2, epsilon = 1e-9);
    }

    #[test]
    fn test_car_wraps_across_ra_zero() {
        let wcs = WcsTransform::new(Projection::Car, (101.0, 51.0), (0.0, 0.0), (-0.01, 0.01));
        let (x, y) = wcs.world_to_pixel(359.5, 0.2);
        assert_abs_diff_eq!(x, 150.0, epsilon = 1e-9);
        assert_abs_diff_eq!(y, 70.0, epsilon = 1e-9);
        let back = wcs.pixel_to_world(x, y);
        assert_abs_diff_eq!(back.ra, 359.5, epsilon = 1e-9);
        assert_abs_diff_eq!(back.dec, 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_car_footprint_far_from_reference_longitude() {
        // CRVAL1 = 0 with the footprint at RA 190..200: column 0 sits at 200.
        let wcs = WcsTransform::new(Projection::Car, (20001.0, 51.0), (0.0, 0.0), (-0.01, 0.01));
        let (cols, rows) = (1000.0, 100.0);
        let (xc, yc) = ((cols - 1.0) / 2.0, (rows - 1.0) / 2.0);

        let p = wcs.pixel_to_world(500.0, 50.0);
        assert_abs_diff_eq!(p.ra, 195.0, epsilon = 1e-9);
        let (x, y) = wcs.world_to_pixel_near(p.ra, p.dec, xc, yc);
        assert_abs_diff_eq!(x, 500.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 50.0, epsilon = 1e-6);

        for col in [0.0, 1.0, 250.0, 998.0, 999.0] {
            let p = wcs.pixel_to_world(col, 10.0);
            let (x, _) = wcs.world_to_pixel_near(p.ra, p.dec, xc, yc);
            assert_abs_diff_eq!(x, col, epsilon = 1e-6);
        }

        // Wrapping around CRVAL1 alone sends the same position off the map.
        assert!(wcs.world_to_pixel(195.0, 0.0).0 > cols);
    }

    #[test]
    fn test_cea_from_header() {
        let h = header(&[
            ("CRPIX1", "200"),
            ("CRPIX2", "100"),
            ("CRVAL1", "30.0"),
            ("CRVAL2", "0.0"),
            ("CDELT1", "-0.00833333"),
            ("CDELT2", "0.00833333"),
            ("CTYPE1", "RA---CEA"),
            ("CTYPE2", "DEC--CEA"),
            ("PV2_1", "1"),
        ]);
        let wcs = WcsTransform::from_header(&h).unwrap();
        assert_eq!(wcs.projection(), Projection::Cea { lambda: 1.0 });

        let (x, y) = wcs.world_to_pixel(29.7, -0.35);
        let back = wcs.pixel_to_world(x, y);
        assert_abs_diff_eq!(back.ra, 29.7, epsilon = 1e-9);
        assert_abs_diff_eq!(back.dec, -0.35, epsilon = 1e-9);
    }

    #[test]
    fn test_cea_rejects_offset_reference() {
        let h = header(&[
            ("CRPIX1", "1"),
            ("CRPIX2", "1"),
            ("CRVAL1", "0.0"),
            ("CRVAL2", "10.0"),
            ("CDELT1", "-0.01"),
            ("CDELT2", "0.01"),
            ("CTYPE1", "RA---CEA"),
        ]);
        assert!(WcsTransform::from_header(&h).is_err());
    }

    #[test]
    fn test_crota_rotates_cdelt() {
        let h = header(&[
            ("CRPIX1", "1"),
            ("CRPIX2", "1"),
            ("CRVAL1", "0.0"),
            ("CRVAL2", "0.0"),
            ("CDELT1", "0.01"),
            ("CDELT2", "0.01"),
            ("CROTA2", "90"),
            ("CTYPE1", "RA---CAR"),
        ]);
        let wcs = WcsTransform::from_header(&h).unwrap();
        let p = wcs.pixel_to_world(0.0, 1.0);
        assert_abs_diff_eq!(wcs.world_to_pixel(p.ra, p.dec).1, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.dec, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_reference_is_an_error() {
        let h = header(&[("CRPIX1", "1"), ("CDELT1", "0.01"), ("CDELT2", "0.01")]);
        let err = WcsTransform::from_header(&h).unwrap_err();
        assert!(err.to_string().contains("CRVAL1"));
    }

    #[test]
    fn test_tan_far_side_is_nan() {
        let wcs = WcsTransform::new(Projection::Tan, (1.0, 1.0), (0.0, 0.0), (-0.01, 0.01));
        let (x, y) = wcs.world_to_pixel(180.0, 0.0);
        assert!(x.is_nan() && y.is_nan());
    }

    #[test]
    fn test_header_cards_roundtrip() {
        let wcs = WcsTransform::new(
            Projection::Cea { lambda: 1.0 },
            (30.5, 30.5),
            (12.0, 0.0),
            (-0.004166, 0.004166),
        );
        let cards = wcs.header_cards();
        let pairs: Vec<(&str, &str)> = cards.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let parsed = WcsTransform::from_header(&HduHeader::from_cards(&pairs)).unwrap();
        assert_eq!(parsed, wcs);
    }
}
