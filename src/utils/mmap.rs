use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use memmap2::{Mmap, MmapOptions};
use ndarray::Array2;

use crate::model::HduHeader;
use crate::utils::constants::BLOCK_SIZE;

const CARD_LEN: usize = 80;

pub struct MmapImageResult {
    pub header: HduHeader,
    pub image: Array2<f32>,
}

/// Big-endian sample layouts allowed by BITPIX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    fn from_bitpix(bitpix: i64) -> Result<Self> {
        Ok(match bitpix {
            8 => SampleFormat::U8,
            16 => SampleFormat::I16,
            32 => SampleFormat::I32,
            -32 => SampleFormat::F32,
            -64 => SampleFormat::F64,
            other => bail!("Unsupported BITPIX {}", other),
        })
    }

    fn width(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }

    fn read(self, b: &[u8]) -> f64 {
        match self {
            SampleFormat::U8 => b[0] as f64,
            SampleFormat::I16 => i16::from_be_bytes([b[0], b[1]]) as f64,
            SampleFormat::I32 => i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
            SampleFormat::F32 => f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
            SampleFormat::F64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&b[..8]);
                f64::from_be_bytes(raw)
            }
        }
    }
}

/// Physical values `bzero + bscale * stored` of a raw data segment.
fn decode_samples(data: &[u8], format: SampleFormat, bscale: f64, bzero: f64) -> Vec<f32> {
    data.chunks_exact(format.width())
        .map(|chunk| (bzero + bscale * format.read(chunk)) as f32)
        .collect()
}

/// Value field of a card: quoted strings unquoted, inline comments dropped.
fn card_value(field: &str) -> String {
    let field = field.trim();
    if let Some(rest) = field.strip_prefix('\'') {
        let end = rest.find('\'').unwrap_or(rest.len());
        return rest[..end].trim_end().to_string();
    }
    field
        .split_once('/')
        .map_or(field, |(value, _)| value)
        .trim()
        .to_string()
}

/// Parses the header starting at `offset`. Returns it with the offset of the
/// first data byte.
fn read_header(bytes: &[u8], offset: usize) -> Result<(HduHeader, usize)> {
    let mut header = HduHeader::default();
    let mut block_start = offset;

    loop {
        let block = bytes
            .get(block_start..block_start + BLOCK_SIZE)
            .with_context(|| format!("Truncated header at byte {}", offset))?;
        block_start += BLOCK_SIZE;

        for card in block.chunks_exact(CARD_LEN) {
            let keyword = String::from_utf8_lossy(&card[..8]);
            let keyword = keyword.trim_end();
            if keyword == "END" {
                return Ok((header, block_start));
            }
            if &card[8..10] == b"= " {
                header.insert(keyword, &card_value(&String::from_utf8_lossy(&card[10..])));
            }
        }
    }
}

fn map_file(file: &File) -> Result<Mmap> {
    // SAFETY: the map is read-only and dropped before this module returns.
    let mmap = unsafe { MmapOptions::new().map(file) }.context("mmap failed")?;
    #[cfg(unix)]
    {
        let _ = mmap.advise(memmap2::Advice::Sequential);
    }
    Ok(mmap)
}

/// Finds the first HDU holding an image of at least two axes and decodes
/// its first plane. For Stokes cubes that plane is the intensity.
fn first_image(bytes: &[u8]) -> Result<MmapImageResult> {
    let mut offset = 0;
    while offset < bytes.len() {
        let (header, data_start) = read_header(bytes, offset)?;
        let naxis = header.get_i64("NAXIS").unwrap_or(0);
        let width = header.get_i64("NAXIS1").unwrap_or(0);
        let height = header.get_i64("NAXIS2").unwrap_or(0);

        if naxis >= 2 && width > 1 && height > 1 {
            let bitpix = header.get_i64("BITPIX").context("Missing BITPIX in image HDU")?;
            let format = SampleFormat::from_bitpix(bitpix)?;
            let (width, height) = (width as usize, height as usize);
            let plane = bytes
                .get(data_start..data_start + width * height * format.width())
                .context("Image data exceeds file size")?;

            let bscale = header.get_f64("BSCALE").unwrap_or(1.0);
            let bzero = header.get_f64("BZERO").unwrap_or(0.0);
            let image = Array2::from_shape_vec((height, width), decode_samples(plane, format, bscale, bzero))
                .context("Failed to reshape image pixels")?;
            return Ok(MmapImageResult { header, image });
        }

        offset = data_start + header.padded_data_bytes();
    }
    bail!("No 2D image block found")
}

pub fn read_fits_image(path: &Path) -> Result<MmapImageResult> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mmap = map_file(&file)?;
    first_image(&mmap).with_context(|| format!("Failed to load {:?}", path))
}
