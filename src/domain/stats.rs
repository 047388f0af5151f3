use rayon::prelude::*;
use serde::Serialize;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// `n` points evenly spaced in log10 between `start` and `stop` (both > 0).
pub fn logspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    let (a, b) = (start.log10(), stop.log10());
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (b - a) / (n - 1) as f64;
            let mut out: Vec<f64> = (0..n).map(|i| 10f64.powf(a + step * i as f64)).collect();
            out[0] = start;
            out[n - 1] = stop;
            out
        }
    }
}

/// Index of the bin holding `x` for ascending `edges`. Bins are half-open
/// except the last, which includes its upper edge.
pub fn bin_index(x: f64, edges: &[f64]) -> Option<usize> {
    let nbins = edges.len().checked_sub(1)?;
    if nbins == 0 || !(x >= edges[0] && x <= edges[nbins]) {
        return None;
    }
    if x == edges[nbins] {
        return Some(nbins - 1);
    }
    let pos = edges.partition_point(|&e| e <= x);
    Some(pos - 1)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinnedMean {
    pub mean_x: f64,
    pub mean_y: f64,
    /// Standard deviation of y in the bin over sqrt(count).
    pub std_error_y: f64,
    pub count: usize,
}

/// Per-bin mean of x, mean of y and the standard error of y. Empty bins are
/// dropped, so the output may be shorter than `edges.len() - 1`.
pub fn binned_means(x: &[f64], y: &[f64], edges: &[f64]) -> Vec<BinnedMean> {
    let nbins = edges.len().saturating_sub(1);
    if nbins == 0 {
        return Vec::new();
    }

    #[derive(Clone)]
    struct Accum {
        n: usize,
        sx: f64,
        sy: f64,
        syy: f64,
    }
    let empty = || vec![Accum { n: 0, sx: 0.0, sy: 0.0, syy: 0.0 }; nbins];

    let acc = x
        .par_iter()
        .zip(y.par_iter())
        .fold(empty, |mut acc, (&xi, &yi)| {
            if let Some(b) = bin_index(xi, edges) {
                let a = &mut acc[b];
                a.n += 1;
                a.sx += xi;
                a.sy += yi;
                a.syy += yi * yi;
            }
            acc
        })
        .reduce(empty, |mut a, b| {
            for (l, r) in a.iter_mut().zip(b) {
                l.n += r.n;
                l.sx += r.sx;
                l.sy += r.sy;
                l.syy += r.syy;
            }
            a
        });

    acc.into_iter()
        .filter(|a| a.n > 0)
        .map(|a| {
            let n = a.n as f64;
            let mean_y = a.sy / n;
            let var = (a.syy / n - mean_y * mean_y).max(0.0);
            BinnedMean {
                mean_x: a.sx / n,
                mean_y,
                std_error_y: var.sqrt() / n.sqrt(),
                count: a.n,
            }
        })
        .collect()
}

/// Piecewise-linear interpolation through ascending `xs`, held flat beyond
/// the first and last points.
pub fn interp_clamped(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    if n == 1 || x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let idx = xs[..n].partition_point(|&v| v <= x);
    let (x1, x2) = (xs[idx - 1], xs[idx]);
    let (y1, y2) = (ys[idx - 1], ys[idx]);
    if x2 == x1 {
        return y1;
    }
    let t = (x - x1) / (x2 - x1);
    y1 + t * (y2 - y1)
}

/// Mean with its standard error and signal-to-noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeanSummary {
    pub mean: f64,
    pub std_error: f64,
    pub snr: f64,
    pub count: usize,
}

impl MeanSummary {
    pub fn of(values: &[f64]) -> Self {
        let n = values.len();
        let m = mean(values);
        let err = if n > 0 { std_dev(values) / (n as f64).sqrt() } else { 0.0 };
        MeanSummary {
            mean: m,
            std_error: err,
            snr: if err > 0.0 { m / err } else { 0.0 },
            count: n,
        }
    }
}
