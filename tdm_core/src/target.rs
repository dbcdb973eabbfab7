//! Target range parsing and evaluation.
//!
//! Ranges arrive as free text such as "10-20 mg/L" or "400~600 mg·h/L" and are
//! parsed once, at ingestion. A missing or unparsable range is treated as
//! always satisfied.

use crate::{TargetSpec, TargetType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// Closed exposure interval
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TargetRange {
    pub low: f64,
    pub high: f64,
}

/// Where a value sits relative to a target range
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RangeStatus {
    Within,
    /// Percent above the upper bound
    Above { percent: f64 },
    /// Percent below the lower bound
    Below { percent: f64 },
}

impl TargetRange {
    /// Parse the first two numeric tokens of a range string
    pub fn parse(text: &str) -> Option<Self> {
        let mut numbers = NUMBER
            .find_iter(text)
            .filter_map(|m| m.as_str().parse::<f64>().ok());
        let first = numbers.next()?;
        let second = numbers.next()?;
        Some(Self::ordered(first, second))
    }

    /// Build a range from optional bounds; a missing bound takes the present one
    pub fn from_bounds(low: Option<f64>, high: Option<f64>) -> Option<Self> {
        match (low, high) {
            (Some(low), Some(high)) => Some(Self::ordered(low, high)),
            (Some(bound), None) | (None, Some(bound)) => Some(Self {
                low: bound,
                high: bound,
            }),
            (None, None) => None,
        }
    }

    fn ordered(a: f64, b: f64) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    /// Distance to the nearest bound, zero inside the range
    pub fn distance(&self, value: f64) -> f64 {
        if self.contains(value) {
            0.0
        } else if value < self.low {
            self.low - value
        } else {
            value - self.high
        }
    }

    pub fn classify(&self, value: f64) -> RangeStatus {
        if self.contains(value) {
            RangeStatus::Within
        } else if value > self.high {
            RangeStatus::Above {
                percent: percent_off(value - self.high, self.high),
            }
        } else {
            RangeStatus::Below {
                percent: percent_off(self.low - value, self.low),
            }
        }
    }
}

fn percent_off(delta: f64, bound: f64) -> f64 {
    if bound == 0.0 {
        f64::INFINITY
    } else {
        delta / bound.abs() * 100.0
    }
}

impl TargetSpec {
    /// The usable range, if at least one bound is present
    pub fn range(&self) -> Option<TargetRange> {
        TargetRange::from_bounds(self.range_low, self.range_high)
    }

    /// Classify a predicted value against this target
    pub fn status(&self, value: f64) -> RangeStatus {
        evaluate(self.range().as_ref(), value)
    }
}

/// Classify a value against an optional range; no range means within
pub fn evaluate(range: Option<&TargetRange>, value: f64) -> RangeStatus {
    match range {
        Some(range) => range.classify(value),
        None => {
            tracing::warn!("No target range, reporting {} as within target", value);
            RangeStatus::Within
        }
    }
}

/// Map a free-text target type onto the metric it refers to
pub fn parse_target_type(text: &str) -> Option<TargetType> {
    let lowered = text.trim().to_lowercase();
    if lowered.contains("auc") {
        Some(TargetType::Auc)
    } else if lowered.contains("trough") {
        Some(TargetType::Trough)
    } else if lowered.contains("cmax") || lowered.contains("peak") {
        Some(TargetType::Peak)
    } else {
        tracing::warn!("Unrecognised target type {:?}", text);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_first_two_numbers() {
        assert_eq!(
            TargetRange::parse("10-20 mg/L"),
            Some(TargetRange {
                low: 10.0,
                high: 20.0
            })
        );
        assert_eq!(
            TargetRange::parse("400~600 mg·h/L (AUC24)"),
            Some(TargetRange {
                low: 400.0,
                high: 600.0
            })
        );
        assert_eq!(
            TargetRange::parse("0.5 - 1.5"),
            Some(TargetRange {
                low: 0.5,
                high: 1.5
            })
        );
    }

    #[test]
    fn test_parse_range_rejects_garbage() {
        assert_eq!(TargetRange::parse(""), None);
        assert_eq!(TargetRange::parse("15 mg/L"), None);
        assert_eq!(TargetRange::parse("therapeutic"), None);
    }

    #[test]
    fn test_single_bound_is_degenerate_point() {
        let range = TargetRange::from_bounds(Some(15.0), None).unwrap();
        assert_eq!(range.low, 15.0);
        assert_eq!(range.high, 15.0);
        assert_eq!(range.distance(17.0), 2.0);
        assert!(TargetRange::from_bounds(None, None).is_none());
    }

    #[test]
    fn test_classification_and_percent() {
        let range = TargetRange {
            low: 10.0,
            high: 20.0,
        };
        assert_eq!(range.classify(15.0), RangeStatus::Within);
        assert_eq!(range.classify(10.0), RangeStatus::Within);
        assert_eq!(range.classify(25.0), RangeStatus::Above { percent: 25.0 });
        assert_eq!(range.classify(8.0), RangeStatus::Below { percent: 20.0 });
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let range = TargetRange::parse("20-10").unwrap();
        assert!(range.contains(10.0));
        assert!(range.contains(20.0));
        assert!(!range.contains(9.99));
        assert!(!range.contains(20.01));
        assert_eq!(range.distance(10.0), 0.0);
        assert_eq!(range.distance(7.5), 2.5);
        assert_eq!(range.distance(23.0), 3.0);
    }

    #[test]
    fn test_missing_range_is_within() {
        assert_eq!(evaluate(None, 1_000_000.0), RangeStatus::Within);
    }

    #[test]
    fn test_parse_target_type() {
        assert_eq!(parse_target_type("AUC24"), Some(TargetType::Auc));
        assert_eq!(parse_target_type("Trough"), Some(TargetType::Trough));
        assert_eq!(parse_target_type("Cmax"), Some(TargetType::Peak));
        assert_eq!(parse_target_type("peak level"), Some(TargetType::Peak));
        assert_eq!(parse_target_type("MIC ratio"), None);
    }
}
