pub const BLOCK_SIZE: usize = 2880;

pub const ARCMIN: f64 = std::f64::consts::PI / (180.0 * 60.0);

pub const DEGREE: f64 = std::f64::consts::PI / 180.0;
