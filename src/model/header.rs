use std::collections::HashMap;

use crate::utils::constants::BLOCK_SIZE;

/// Keyword/value cards of one HDU, in file order, with a keyword index.
/// Repeated keywords keep every card; lookups return the last one.
#[derive(Debug, Clone, Default)]
pub struct HduHeader {
    pub cards: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl HduHeader {
    pub fn from_cards(pairs: &[(&str, &str)]) -> Self {
        let mut header = HduHeader::default();
        for (key, value) in pairs {
            header.insert(key, value);
        }
        header
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.index.insert(key.to_string(), self.cards.len());
        self.cards.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let &i = self.index.get(key)?;
        Some(self.cards[i].1.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }

    /// Size of the data segment following this header, rounded up to whole
    /// FITS blocks. Zero when NAXIS is 0 or absent.
    pub fn padded_data_bytes(&self) -> usize {
        let naxis = self.get_i64("NAXIS").unwrap_or(0).max(0) as usize;
        if naxis == 0 {
            return 0;
        }
        let sample = self.get_i64("BITPIX").unwrap_or(0).unsigned_abs() as usize / 8;
        let samples: usize = (1..=naxis)
            .map(|n| self.get_i64(&format!("NAXIS{}", n)).unwrap_or(1).max(0) as usize)
            .product();
        (samples * sample).div_ceil(BLOCK_SIZE) * BLOCK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_data_bytes() {
        let h = HduHeader::from_cards(&[
            ("NAXIS", "2"),
            ("BITPIX", "-32"),
            ("NAXIS1", "10"),
            ("NAXIS2", "10"),
        ]);
        assert_eq!(h.padded_data_bytes(), BLOCK_SIZE);

        let cube = HduHeader::from_cards(&[
            ("NAXIS", "3"),
            ("BITPIX", "-64"),
            ("NAXIS1", "30"),
            ("NAXIS2", "20"),
            ("NAXIS3", "3"),
        ]);
        assert_eq!(cube.padded_data_bytes(), 5 * BLOCK_SIZE);
        assert_eq!(HduHeader::from_cards(&[("NAXIS", "0")]).padded_data_bytes(), 0);
    }

    #[test]
    fn test_lookup() {
        let h = HduHeader::from_cards(&[("CRVAL1", " 83.5 "), ("CTYPE1", "RA---CEA"), ("CRVAL1", "84.0")]);
        assert_eq!(h.get_f64("CRVAL1"), Some(84.0));
        assert_eq!(h.get("CTYPE1"), Some("RA---CEA"));
        assert!(h.get_f64("CTYPE1").is_none());
        assert_eq!(h.cards.len(), 3);
    }
}
