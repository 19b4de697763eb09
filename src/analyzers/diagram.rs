//! Fundamental diagram fit over the FCD records of a zone.
//!
//! Samples with implausible density or flow are dropped before fitting.

use crate::analyzers::types::DiagramFit;
use crate::analyzers::utility::{mean, stddev};
use crate::model::{FlowDensityRecord, ZoneId};
use std::collections::BTreeMap;

pub const MAX_DENSITY: f64 = 150.0;
pub const MAX_FLOW: f64 = 3600.0;

/// Least-squares polynomial coefficients, highest degree first.
/// Returns `None` with fewer samples than coefficients or a singular system.
pub fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Option<Vec<f64>> {
    let n = degree + 1;
    if xs.len() != ys.len() || xs.len() < n {
        return None;
    }

    // normal equations: (X^T X) c = X^T y, c in ascending powers
    let mut a = vec![vec![0.0; n + 1]; n];
    for (&x, &y) in xs.iter().zip(ys) {
        let powers: Vec<f64> = (0..2 * n - 1).map(|p| x.powi(p as i32)).collect();
        for (row, coeffs) in a.iter_mut().enumerate() {
            for col in 0..n {
                coeffs[col] += powers[row + col];
            }
            coeffs[n] += powers[row] * y;
        }
    }

    let ascending = solve(a)?;
    Some(ascending.into_iter().rev().collect())
}

/// Gaussian elimination with partial pivoting on an augmented matrix.
fn solve(mut a: Vec<Vec<f64>>) -> Option<Vec<f64>> {
    let n = a.len();
    let scale = a
        .iter()
        .flat_map(|row| row[..n].iter())
        .fold(0.0_f64, |m, v| m.max(v.abs()));
    let tolerance = scale * 1e-10;
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= tolerance {
            return None;
        }
        a.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..=n {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * out[k]).sum();
        out[row] = (a[row][n] - tail) / a[row][row];
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}

/// Fits one zone. `None` when too few plausible samples remain or the
/// samples do not determine the curves.
pub fn fit_zone(zone_id: ZoneId, records: &[FlowDensityRecord]) -> Option<DiagramFit> {
    let kept: Vec<&FlowDensityRecord> = records
        .iter()
        .filter(|r| r.fcd_density <= MAX_DENSITY && r.fcd_flow <= MAX_FLOW)
        .collect();
    let density: Vec<f64> = kept.iter().map(|r| r.fcd_density).collect();
    let flow: Vec<f64> = kept.iter().map(|r| r.fcd_flow).collect();
    let speed: Vec<f64> = kept.iter().map(|r| r.fcd_speed).collect();

    let flow_fit = polyfit(&density, &flow, 2)?;
    let speed_fit = polyfit(&density, &speed, 1)?;
    let (a, b, c) = (flow_fit[0], flow_fit[1], flow_fit[2]);
    let (m, q) = (speed_fit[0], speed_fit[1]);

    let critical_density = (a < 0.0).then(|| -b / (2.0 * a));
    let capacity = critical_density.map(|k| a * k * k + b * k + c);
    let jam_density = (m < 0.0).then(|| -q / m);

    let residuals: Vec<f64> = density
        .iter()
        .zip(&flow)
        .map(|(k, f)| f - (a * k * k + b * k + c))
        .collect();
    let flow_residual_stddev = stddev(&residuals, mean(&residuals));

    Some(DiagramFit {
        zone_id,
        samples: kept.len(),
        flow_a: a,
        flow_b: b,
        flow_c: c,
        flow_residual_stddev,
        speed_slope: m,
        speed_intercept: q,
        critical_density,
        capacity,
        jam_density,
    })
}

/// Fits every zone present in `records`, in zone id order.
pub fn fit_all(records: &[FlowDensityRecord]) -> Vec<DiagramFit> {
    let mut by_zone: BTreeMap<ZoneId, Vec<FlowDensityRecord>> = BTreeMap::new();
    for record in records {
        by_zone.entry(record.zone_id).or_default().push(record.clone());
    }
    by_zone
        .into_iter()
        .filter_map(|(zone_id, rows)| fit_zone(zone_id, &rows))
        .collect()
}
