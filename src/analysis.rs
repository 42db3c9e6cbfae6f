//! N-JFET parameter extraction.
//!
//! Drain current as a function of gate voltage is approximated by
//!
//! ```text
//! Id(Vg) = 0                               Vg <= Voff
//!          Yfs * (Vg - Voff)^2 / (2*Vsat)  Voff <= Vg <= Voff + Vsat
//!          Yfs * (Vg - Voff - Vsat/2)      Vg >= Voff + Vsat
//! ```
//!
//! `Idss` and `Yfs` come from a straight-line fit near `Vg = 0`; `Voff` from
//! walking a square-law fit down through the last conducting samples; `Vsat`
//! follows from the other three.

use serde::Serialize;
use thiserror::Error;

use crate::result_set::ResultSet;

/// Fewer conducting samples than this means the device is not a working N-JFET.
pub const MIN_SAMPLES: usize = 10;
/// Samples nearest `Vg = 0` used for the linear fit.
pub const LINEAR_FIT_SAMPLES: usize = 7;
/// Samples nearest cutoff considered for the square-law fit (the very last is skipped).
pub const CUTOFF_WINDOW: usize = 8;
/// Below this the drain is considered off, mA.
pub const CONDUCTION_THRESHOLD_MA: f64 = 0.01;

const CUTOFF_STEP_V: f64 = 0.01;
const MAX_CUTOFF_ITERATIONS: usize = 2000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("bad transistor: {0} conducting samples, need at least {MIN_SAMPLES}")]
    TooFewSamples(usize),
    #[error("degenerate fit")]
    Degenerate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JfetParameters {
    /// Zero-gate-voltage drain current, mA.
    pub idss: f64,
    /// Gate-source cutoff voltage, V.
    pub voff: f64,
    /// Forward transfer admittance, mA/V.
    pub yfs: f64,
    /// Saturation voltage offset, V.
    pub vsat: f64,
}

/// Coefficients `(a, b)` of the least-squares line `y = a*x + b`.
pub fn least_squares(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let k = x.len().min(y.len()) as f64;
    if k < 2.0 {
        return None;
    }
    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    let sum_x2: f64 = x.iter().map(|a| a * a).sum();
    let denominator = k * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return None;
    }
    let a = (k * sum_xy - sum_x * sum_y) / denominator;
    let b = (sum_y - a * sum_x) / k;
    Some((a, b))
}

/// Squared error of the best square law `y = c * (x - x0)^2` through the points.
fn quadratic_error(x0: f64, x: &[f64], y: &[f64]) -> f64 {
    let k = x.len() as f64;
    let log_c = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| yi.ln() - 2.0 * (xi - x0).ln())
        .sum::<f64>()
        / k;
    let c = log_c.exp();
    x.iter()
        .zip(y)
        .map(|(xi, yi)| {
            let err = yi - (xi - x0).powi(2) * c;
            err * err
        })
        .sum()
}

/// Step `x0` down while the square-law error keeps shrinking.
fn refine_cutoff(mut x0: f64, x: &[f64], y: &[f64]) -> f64 {
    let mut e0 = quadratic_error(x0, x, y);
    for _ in 0..MAX_CUTOFF_ITERATIONS {
        let e1 = quadratic_error(x0 - CUTOFF_STEP_V, x, y);
        if !(e1 <= e0) {
            break;
        }
        x0 -= CUTOFF_STEP_V;
        e0 = e1;
    }
    x0
}

/// Extract JFET parameters. Works on either sweep direction: samples are
/// ordered from the highest gate voltage down before fitting.
pub fn fit(results: &ResultSet) -> Result<JfetParameters, AnalysisError> {
    let mut points: Vec<(f64, f64)> = results
        .samples()
        .iter()
        .map(|s| (s.stimulus as f64, s.response as f64))
        .collect();
    points.sort_by(|a, b| b.0.total_cmp(&a.0));
    let (vg, id): (Vec<f64>, Vec<f64>) = points
        .into_iter()
        .take_while(|&(_, i)| i > CONDUCTION_THRESHOLD_MA)
        .unzip();

    let n = vg.len();
    if n < MIN_SAMPLES {
        return Err(AnalysisError::TooFewSamples(n));
    }

    let (yfs, idss) =
        least_squares(&vg[..LINEAR_FIT_SAMPLES], &id[..LINEAR_FIT_SAMPLES]).ok_or(AnalysisError::Degenerate)?;
    if yfs <= 0.0 {
        return Err(AnalysisError::Degenerate);
    }

    // First guess: one centivolt below the last conducting sample.
    let first_guess = (vg[n - 1] * 100.0 - 1.0).trunc() * 0.01;
    let window = n - CUTOFF_WINDOW..n - 1;
    let voff = refine_cutoff(first_guess, &vg[window.clone()], &id[window]);

    let vsat = 2.0 * (-voff - idss / yfs);
    let params = JfetParameters { idss, voff, yfs, vsat };
    if ![idss, voff, yfs, vsat].iter().all(|v| v.is_finite()) {
        return Err(AnalysisError::Degenerate);
    }
    tracing::debug!("Fitted parameters: {:?}", params);
    Ok(params)
}

/// Round to two decimals, as reported.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
