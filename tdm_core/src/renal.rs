//! Renal function estimation.
//!
//! Precedence:
//! 1. A positive pre-computed result on the assessment is returned verbatim
//! 2. A positive serum creatinine is run through the assessment's formula
//! 3. Otherwise CRCL defaults to 90 mL/min

use crate::{Patient, RenalAssessment, RenalFormula, RenalFunction};

/// CRCL used when no usable assessment exists, mL/min
pub const DEFAULT_CRCL: f64 = 90.0;

/// Source of stored renal assessments for one patient
pub trait AssessmentRepository {
    fn assessments(&self) -> &[RenalAssessment];

    /// The assessment the engine should use
    ///
    /// The first assessment flagged `selected` wins. Otherwise the most recent
    /// by `measured_at`; undated entries rank oldest and ties go to the later
    /// entry in the list.
    fn chosen(&self) -> Option<&RenalAssessment> {
        let all = self.assessments();
        if let Some(selected) = all.iter().find(|a| a.selected) {
            return Some(selected);
        }
        // max_by_key returns the last maximum, which gives list-order tie breaking
        all.iter().max_by_key(|a| a.measured_at)
    }
}

impl AssessmentRepository for Vec<RenalAssessment> {
    fn assessments(&self) -> &[RenalAssessment] {
        self
    }
}

/// Estimate renal function for a patient from an optional assessment
pub fn estimate_renal_function(
    patient: &Patient,
    assessment: Option<&RenalAssessment>,
) -> RenalFunction {
    let Some(assessment) = assessment else {
        tracing::info!("No renal assessment, defaulting to CRCL={}", DEFAULT_CRCL);
        return RenalFunction::Crcl(DEFAULT_CRCL);
    };

    if let Some(result) = assessment
        .result_override
        .as_deref()
        .and_then(|raw| parse_result_override(raw, assessment.formula))
    {
        tracing::info!("Using pre-computed renal result {:?}", result);
        return result;
    }

    match assessment.serum_creatinine {
        Some(scr) if scr > 0.0 && scr.is_finite() => {
            let derived = derive(patient, scr, assessment.formula);
            if derived.value().is_finite() {
                tracing::info!(
                    "Derived {:?} from Scr={} via {:?}",
                    derived,
                    scr,
                    assessment.formula
                );
                return derived;
            }
            tracing::warn!("Renal formula produced a non-finite value, using default");
            RenalFunction::Crcl(DEFAULT_CRCL)
        }
        _ => {
            tracing::info!(
                "No usable serum creatinine, defaulting to CRCL={}",
                DEFAULT_CRCL
            );
            RenalFunction::Crcl(DEFAULT_CRCL)
        }
    }
}

fn derive(patient: &Patient, scr: f64, formula: RenalFormula) -> RenalFunction {
    match formula {
        RenalFormula::CockcroftGault => RenalFunction::Crcl(cockcroft_gault(patient, scr)),
        RenalFormula::Mdrd => RenalFunction::Egfr(mdrd(patient, scr)),
        RenalFormula::CkdEpi => RenalFunction::Egfr(ckd_epi(patient, scr)),
    }
}

/// Parse "CRCL=55", "eGFR=40" or a bare number
///
/// A bare number takes the metric the formula would have produced.
/// Returns None unless the value is a positive number.
pub fn parse_result_override(raw: &str, formula: RenalFormula) -> Option<RenalFunction> {
    let raw = raw.trim();
    let (tag, number) = match raw.split_once('=') {
        Some((tag, number)) => (Some(tag.trim().to_lowercase()), number.trim()),
        None => (None, raw),
    };

    let value: f64 = number.parse().ok()?;
    if !(value > 0.0 && value.is_finite()) {
        return None;
    }

    match tag.as_deref() {
        Some("crcl") => Some(RenalFunction::Crcl(value)),
        Some("egfr") => Some(RenalFunction::Egfr(value)),
        Some(_) => None,
        None => Some(match formula {
            RenalFormula::CockcroftGault => RenalFunction::Crcl(value),
            RenalFormula::Mdrd | RenalFormula::CkdEpi => RenalFunction::Egfr(value),
        }),
    }
}

/// Mosteller body surface area in m2
pub fn body_surface_area(height_cm: f64, weight_kg: f64) -> f64 {
    (height_cm * weight_kg / 3600.0).sqrt()
}

/// Cockcroft-Gault creatinine clearance, mL/min
pub fn cockcroft_gault(patient: &Patient, scr: f64) -> f64 {
    let crcl = ((140.0 - patient.age_years) * patient.weight_kg) / (72.0 * scr);
    if patient.sex.is_female() {
        crcl * 0.85
    } else {
        crcl
    }
}

/// MDRD eGFR de-indexed to the patient's BSA
pub fn mdrd(patient: &Patient, scr: f64) -> f64 {
    let sex_factor = if patient.sex.is_female() { 0.742 } else { 1.0 };
    let indexed = 175.0 * scr.powf(-1.154) * patient.age_years.powf(-0.203) * sex_factor;
    indexed * body_surface_area(patient.height_cm, patient.weight_kg) / 1.73
}

/// CKD-EPI (2009) eGFR de-indexed to the patient's BSA
pub fn ckd_epi(patient: &Patient, scr: f64) -> f64 {
    let (k, a, sex_factor) = if patient.sex.is_female() {
        (0.7, -0.329, 1.018)
    } else {
        (0.9, -0.411, 1.0)
    };
    let ratio = scr / k;
    let indexed = 141.0
        * ratio.min(1.0).powf(a)
        * ratio.max(1.0).powf(-1.209)
        * 0.993_f64.powf(patient.age_years)
        * sex_factor;
    indexed * body_surface_area(patient.height_cm, patient.weight_kg) / 1.73
}
