//! Time-aligned concentration series.
//!
//! Merges the individual prediction, population prediction, measured levels
//! and an optional comparison curve onto a single time axis for display.

use crate::evaluator::ConcentrationPoint;
use serde::Serialize;
use std::collections::BTreeMap;

/// Time keys are rounded to this many steps per hour before merging
const TIME_KEY_SCALE: f64 = 10_000.0;

/// One merged time point
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MergedPoint {
    pub time: f64,
    pub predicted: f64,
    pub population: f64,
    /// Measured level at this time, if any
    pub observed: Option<f64>,
    /// Comparison curve value; absent when no comparison was supplied
    pub comparison: Option<f64>,
}

fn time_key(time: f64) -> i64 {
    (time * TIME_KEY_SCALE).round() as i64
}

fn index(series: &[(f64, f64)]) -> BTreeMap<i64, f64> {
    series.iter().map(|(t, v)| (time_key(*t), *v)).collect()
}

/// Convert evaluator curve points into (time, concentration) pairs
pub fn from_points(points: &[ConcentrationPoint]) -> Vec<(f64, f64)> {
    points.iter().map(|p| (p.time, p.ipred)).collect()
}

/// Merge series by time
///
/// The output covers the union of all time points in ascending order. Model
/// curves read 0 where they have no point; measured levels read None.
pub fn merge_series(
    predicted: &[(f64, f64)],
    population: &[(f64, f64)],
    observed: &[(f64, f64)],
    comparison: Option<&[(f64, f64)]>,
) -> Vec<MergedPoint> {
    let predicted = index(predicted);
    let population = index(population);
    let observed = index(observed);
    let comparison = comparison.map(index);

    let mut keys: Vec<i64> = predicted
        .keys()
        .chain(population.keys())
        .chain(observed.keys())
        .chain(comparison.iter().flat_map(|c| c.keys()))
        .copied()
        .collect();
    keys.sort_unstable();
    keys.dedup();

    keys.into_iter()
        .map(|key| MergedPoint {
            time: key as f64 / TIME_KEY_SCALE,
            predicted: predicted.get(&key).copied().unwrap_or(0.0),
            population: population.get(&key).copied().unwrap_or(0.0),
            observed: observed.get(&key).copied(),
            comparison: comparison
                .as_ref()
                .map(|c| c.get(&key).copied().unwrap_or(0.0)),
        })
        .collect()
}

/// Time-averaged concentration by the trapezoidal rule
///
/// Points are taken in time order. Returns None for fewer than two points or a
/// zero-length interval.
pub fn mean_concentration(series: &[(f64, f64)]) -> Option<f64> {
    if series.len() < 2 {
        return None;
    }
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let duration = sorted[sorted.len() - 1].0 - sorted[0].0;
    if duration <= 0.0 {
        return None;
    }
    let area: f64 = sorted
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0)
        .sum();
    Some(area / duration)
}
