//! Concentration unit normalisation.

/// Factor converting one unit of `unit` into mg/L, for mass-per-volume units
fn to_mg_per_l(unit: &str) -> Option<f64> {
    let unit = unit.trim().to_lowercase().replace('μ', "µ");
    let factor = match unit.as_str() {
        "mg/l" | "ug/ml" | "µg/ml" | "mcg/ml" => 1.0,
        "ng/ml" | "ug/l" | "µg/l" | "mcg/l" => 0.001,
        "mg/dl" => 10.0,
        "g/l" => 1000.0,
        _ => return None,
    };
    Some(factor)
}

/// Convert a concentration into `canonical` units
///
/// Values in unrecognised units are passed through unchanged.
pub fn normalise_concentration(value: f64, unit: &str, canonical: &str) -> f64 {
    match (to_mg_per_l(unit), to_mg_per_l(canonical)) {
        (Some(from), Some(to)) => value * from / to,
        _ => {
            tracing::warn!(
                "Cannot convert {} from {:?} to {:?}, passing value through",
                value,
                unit,
                canonical
            );
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ng_per_ml_to_mg_per_l() {
        assert!((normalise_concentration(15000.0, "ng/mL", "mg/L") - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_equivalent_units_unchanged() {
        assert_eq!(normalise_concentration(12.5, "µg/mL", "mg/L"), 12.5);
        assert_eq!(normalise_concentration(12.5, "ug/mL", "mg/L"), 12.5);
        assert_eq!(normalise_concentration(180.0, "ng/mL", "ng/mL"), 180.0);
    }

    #[test]
    fn test_mg_per_l_to_ng_per_ml() {
        assert!((normalise_concentration(0.2, "mg/L", "ng/mL") - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_unit_passes_through() {
        assert_eq!(normalise_concentration(7.0, "mmol/L", "mg/L"), 7.0);
    }
}
