use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array2;

use crate::domain::stamp::Stamp;
use crate::domain::wcs::WcsTransform;
use crate::utils::constants::BLOCK_SIZE;

const SOFTWARE: &str = concat!("thumbstack ", env!("CARGO_PKG_VERSION"));

/// Writes a single-plane BITPIX -32 image with the given WCS.
pub fn write_fits_map(
    image: &Array2<f32>,
    wcs: &WcsTransform,
    path: &Path,
    extra_cards: &[(String, String)],
) -> Result<()> {
    write_planes(&[image], wcs, path, extra_cards)
}

/// Dumps a stamp as a three-plane cube: temperature, mask, hits.
pub fn write_stamp_cube(stamp: &Stamp, wcs: &WcsTransform, path: &Path, object: usize) -> Result<()> {
    let to_f32 = |a: &Array2<f64>| a.mapv(|v| v as f32);
    let planes = [to_f32(&stamp.temperature), to_f32(&stamp.mask), to_f32(&stamp.hits)];
    let extra = vec![
        ("OBJECT".to_string(), format!("catalog index {}", object)),
        ("PLANE1".to_string(), "TEMPERATURE".to_string()),
        ("PLANE2".to_string(), "MASK".to_string()),
        ("PLANE3".to_string(), "HITS".to_string()),
        ("PIXAREA".to_string(), format!("{:e}", stamp.pixel_area)),
    ];
    write_planes(&[&planes[0], &planes[1], &planes[2]], wcs, path, &extra)
}

fn write_planes(
    planes: &[&Array2<f32>],
    wcs: &WcsTransform,
    path: &Path,
    extra_cards: &[(String, String)],
) -> Result<()> {
    let Some(first) = planes.first() else {
        bail!("Nothing to write to {:?}", path);
    };
    let (rows, cols) = first.dim();
    if planes.iter().any(|p| p.dim() != (rows, cols)) {
        bail!("Planes written to {:?} differ in shape", path);
    }

    let mut cards: Vec<(String, String)> = vec![
        ("SIMPLE".into(), "T".into()),
        ("BITPIX".into(), "-32".into()),
        ("NAXIS".into(), if planes.len() > 1 { "3" } else { "2" }.into()),
        ("NAXIS1".into(), cols.to_string()),
        ("NAXIS2".into(), rows.to_string()),
    ];
    if planes.len() > 1 {
        cards.push(("NAXIS3".into(), planes.len().to_string()));
    }
    cards.extend(wcs.header_cards());
    for (k, v) in extra_cards {
        cards.retain(|(ck, _)| ck != k);
        cards.push((k.clone(), v.clone()));
    }
    cards.push(("HISTORY".into(), format!("Written by {}", SOFTWARE)));

    let file = std::fs::File::create(path).with_context(|| format!("Cannot create {:?}", path))?;
    let mut writer = BufWriter::new(file);

    let mut header: Vec<u8> = cards
        .iter()
        .flat_map(|(k, v)| format_card(k, v).into_bytes())
        .collect();
    header.extend(format!("{:<80}", "END").into_bytes());
    pad_to_block(&mut header, b' ');
    writer.write_all(&header)?;

    let mut data = Vec::with_capacity(planes.len() * rows * cols * 4);
    for plane in planes {
        // Row-major iteration matches FITS axis order: NAXIS1 varies fastest.
        for value in plane.iter() {
            data.extend_from_slice(&value.to_be_bytes());
        }
    }
    pad_to_block(&mut data, 0);
    writer.write_all(&data)?;

    writer.flush()?;
    log::debug!("Wrote {} plane(s) of {}x{} to {:?}", planes.len(), rows, cols, path);
    Ok(())
}

fn pad_to_block(bytes: &mut Vec<u8>, fill: u8) {
    let padded = bytes.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    bytes.resize(padded, fill);
}

/// One 80-byte header card. Numbers and logicals are right-aligned in
/// columns 11-30; anything else becomes a quoted string.
fn format_card(key: &str, value: &str) -> String {
    let key = &key[..key.len().min(8)];
    let card = if key == "HISTORY" || key == "COMMENT" {
        format!("{:<8}{}", key, value)
    } else {
        let value = value.trim();
        let literal = value == "T" || value == "F" || value.parse::<f64>().is_ok();
        if literal {
            format!("{:<8}= {:>20}", key, value)
        } else {
            format!("{:<8}= '{:<8}'", key, value.replace('\'', "''"))
        }
    };
    format!("{:<80.80}", card)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sky_map::{Interpolation, SkyMap};
    use crate::domain::stamp::StampGeometry;
    use crate::domain::wcs::Projection;
    use crate::utils::mmap::read_fits_image;

    #[test]
    fn test_format_card_numeric() {
        let card = format_card("BITPIX", "-32");
        assert_eq!(card.len(), 80);
        assert!(card.starts_with("BITPIX  = "));
        assert!(card.contains("-32"));
    }

    #[test]
    fn test_format_card_string() {
        let card = format_card("CTYPE1", "RA---CEA");
        assert_eq!(card.len(), 80);
        assert!(card.contains("'RA---CEA'"));
    }

    #[test]
    fn test_map_roundtrip_keeps_wcs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("map.fits");
        let wcs = WcsTransform::new(
            Projection::Cea { lambda: 1.0 },
            (32.5, 16.5),
            (150.0, 0.0),
            (-0.5 / 60.0, 0.5 / 60.0),
        );
        let image = Array2::from_shape_fn((32, 64), |(r, c)| (r * 64 + c) as f32);
        write_fits_map(&image, &wcs, &path, &[]).unwrap();

        let size = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(size % BLOCK_SIZE, 0);

        let map = SkyMap::from_fits(&path).unwrap();
        assert_eq!(map.dim(), (32, 64));
        assert_eq!(map.wcs(), &wcs);
        assert_eq!(map.pixel_value(5.0, 3.0, Interpolation::Nearest), (3 * 64 + 5) as f64);
    }

    #[test]
    fn test_stamp_cube_has_three_planes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stamp.fits");
        let g = StampGeometry::default();
        let (lat, lon) = g.local_grid();
        let stamp = Stamp {
            lat_offset: lat,
            lon_offset: lon,
            temperature: Array2::from_elem(g.shape(), 2.5),
            mask: Array2::from_elem(g.shape(), 1.0),
            hits: Array2::from_elem(g.shape(), 7.0),
            pixel_area: g.pixel_area_sr(),
        };
        write_stamp_cube(&stamp, &g.approximate_wcs(150.0, 2.0), &path, 12).unwrap();

        let loaded = read_fits_image(&path).unwrap();
        assert_eq!(loaded.header.get_i64("NAXIS3"), Some(3));
        assert_eq!(loaded.image.dim(), (60, 60));
        assert_eq!(loaded.image[[10, 10]], 2.5);
        assert_eq!(loaded.header.get("PLANE3"), Some("HITS"));
    }
}
