use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    ra: f64,
    dec: f64,
    z: f64,
    mvir: f64,
    #[serde(default)]
    v_r: Option<f64>,
    #[serde(default)]
    integrated_ksz: Option<f64>,
}

/// Object catalog in column layout. Positions in degrees, masses in the
/// catalog's own units (Msun for the default selection range).
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub ra: Vec<f64>,
    pub dec: Vec<f64>,
    pub z: Vec<f64>,
    pub mass: Vec<f64>,
    pub v_r: Option<Vec<f64>>,
    pub integrated_ksz: Option<Vec<f64>>,
}

impl Catalog {
    pub fn new(
        ra: Vec<f64>,
        dec: Vec<f64>,
        z: Vec<f64>,
        mass: Vec<f64>,
        v_r: Option<Vec<f64>>,
        integrated_ksz: Option<Vec<f64>>,
    ) -> Result<Self> {
        let n = ra.len();
        if dec.len() != n || z.len() != n || mass.len() != n {
            bail!(
                "Catalog columns differ in length: ra={} dec={} z={} mass={}",
                n,
                dec.len(),
                z.len(),
                mass.len()
            );
        }
        for (name, column) in [("v_r", &v_r), ("integrated_ksz", &integrated_ksz)] {
            if let Some(values) = column {
                if values.len() != n {
                    bail!("Catalog column {} has {} rows, expected {}", name, values.len(), n);
                }
            }
        }
        if let Some(i) = dec.iter().position(|d| !(-90.0..=90.0).contains(d)) {
            bail!("Object {} has declination {} outside [-90, 90]", i, dec[i]);
        }
        Ok(Catalog {
            ra,
            dec,
            z,
            mass,
            v_r,
            integrated_ksz,
        })
    }

    /// Reads a CSV with a header row. `ra,dec,z,mvir` are required;
    /// `v_r` and `integrated_ksz` are optional but must be filled on every
    /// row when present.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open catalog {:?}", path))?;

        let mut ra = Vec::new();
        let mut dec = Vec::new();
        let mut z = Vec::new();
        let mut mass = Vec::new();
        let mut v_r = Vec::new();
        let mut ksz = Vec::new();

        for (i, record) in reader.deserialize::<CatalogRow>().enumerate() {
            let row = record.with_context(|| format!("Bad catalog row {} in {:?}", i, path))?;
            ra.push(row.ra);
            dec.push(row.dec);
            z.push(row.z);
            mass.push(row.mvir);
            v_r.push(row.v_r);
            ksz.push(row.integrated_ksz);
        }

        let v_r = complete_column("v_r", v_r)?;
        let ksz = complete_column("integrated_ksz", ksz)?;
        let catalog = Catalog::new(ra, dec, z, mass, v_r, ksz)?;
        log::info!("Loaded {} objects from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.ra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ra.is_empty()
    }

    /// MD5 over the positional columns; identifies the catalog in cached
    /// filter tables.
    pub fn digest(&self) -> String {
        let mut ctx = md5::Context::new();
        for column in [&self.ra, &self.dec, &self.z, &self.mass] {
            for v in column {
                ctx.consume(v.to_le_bytes());
            }
        }
        format!("{:x}", ctx.compute())
    }
}

fn complete_column(name: &str, values: Vec<Option<f64>>) -> Result<Option<Vec<f64>>> {
    let present = values.iter().filter(|v| v.is_some()).count();
    if present == 0 {
        return Ok(None);
    }
    if present != values.len() {
        bail!(
            "Catalog column {} is filled on {} of {} rows",
            name,
            present,
            values.len()
        );
    }
    Ok(Some(values.into_iter().flatten().collect()))
}
