//! Core domain types for the TDM dosing engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Patient covariates and renal assessments
//! - Dosing and observation history
//! - Therapy (drug x indication) and the structured dosing target
//! - Evaluator dataset rows and regimen parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Patient and Renal Types
// ============================================================================

/// Biological sex as used by the population models
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Covariate encoding on the wire: male = 1, female = 0
    pub fn covariate(self) -> u8 {
        match self {
            Sex::Male => 1,
            Sex::Female => 0,
        }
    }

    pub fn is_female(self) -> bool {
        self == Sex::Female
    }
}

/// Patient covariates
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patient {
    pub weight_kg: f64,
    pub age_years: f64,
    pub sex: Sex,
    pub height_cm: f64,
}

/// Formula used to derive renal function from serum creatinine
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenalFormula {
    #[default]
    CockcroftGault,
    Mdrd,
    CkdEpi,
}

/// A recorded renal assessment
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RenalAssessment {
    /// Serum creatinine in mg/dL
    #[serde(default)]
    pub serum_creatinine: Option<f64>,
    #[serde(default)]
    pub formula: RenalFormula,
    #[serde(default)]
    pub dialysis: bool,
    /// Renal replacement modality, e.g. "CRRT"
    #[serde(default)]
    pub renal_replacement: Option<String>,
    /// Pre-computed result such as "CRCL=55" or "eGFR=40"
    #[serde(default)]
    pub result_override: Option<String>,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub measured_at: Option<DateTime<Utc>>,
}

impl RenalAssessment {
    /// True when the patient is on continuous renal replacement therapy
    ///
    /// The modality matches when it mentions CRRT anywhere, e.g. "CRRT (CVVHDF)".
    pub fn on_crrt(&self) -> bool {
        self.dialysis
            && self
                .renal_replacement
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains("crrt"))
    }
}

/// Renal function metric. Exactly one of CRCL or eGFR is ever carried.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "metric", content = "value", rename_all = "snake_case")]
pub enum RenalFunction {
    /// Creatinine clearance, mL/min
    Crcl(f64),
    /// Estimated glomerular filtration rate, mL/min/1.73m2 scaled to the patient's BSA
    Egfr(f64),
}

impl RenalFunction {
    pub fn value(&self) -> f64 {
        match self {
            RenalFunction::Crcl(v) | RenalFunction::Egfr(v) => *v,
        }
    }

    pub fn crcl(&self) -> Option<f64> {
        match self {
            RenalFunction::Crcl(v) => Some(*v),
            RenalFunction::Egfr(_) => None,
        }
    }

    pub fn egfr(&self) -> Option<f64> {
        match self {
            RenalFunction::Egfr(v) => Some(*v),
            RenalFunction::Crcl(_) => None,
        }
    }
}

// ============================================================================
// Dosing and Observation History
// ============================================================================

/// Route of administration
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Oral,
    #[default]
    Iv,
    Sc,
    Im,
}

/// Pharmaceutical form of the product being dosed
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DosageForm {
    Capsule,
    Tablet,
    Solution,
    #[default]
    Injection,
}

/// A historical dose administration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseEvent {
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub route: Route,
    #[serde(default)]
    pub infusion_minutes: Option<f64>,
}

/// A measured drug concentration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ObservationEvent {
    pub timestamp: DateTime<Utc>,
    pub concentration: f64,
    pub unit: String,
}

// ============================================================================
// Therapy and Target Types
// ============================================================================

/// Drugs known to the engine
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Drug {
    Vancomycin,
    Cyclosporin,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VancomycinIndication {
    General,
    Neurosurgery,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CyclosporinIndication {
    KidneyTransplant,
    LiverTransplant,
}

/// Drug x indication, the key of model selection
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "drug", content = "indication", rename_all = "snake_case")]
pub enum Therapy {
    Vancomycin(VancomycinIndication),
    Cyclosporin(CyclosporinIndication),
}

impl Therapy {
    pub fn drug(&self) -> Drug {
        match self {
            Therapy::Vancomycin(_) => Drug::Vancomycin,
            Therapy::Cyclosporin(_) => Drug::Cyclosporin,
        }
    }
}

/// Post-operative day bucket used by transplant models
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostOpBucket {
    /// "~2"
    UpToDay2,
    /// "3~6"
    Days3To6,
    /// "7~"
    #[default]
    Day7Onward,
}

/// Structured form of the free-text "additional info" field
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ClinicalContext {
    pub post_op: Option<PostOpBucket>,
    /// Canonical name of a recognised nephrotoxic co-medication
    pub nephrotoxic_comedication: Option<String>,
}

/// Exposure metric a target range refers to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Auc,
    Trough,
    Peak,
}

/// Clinician-specified exposure target, produced once at ingestion
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TargetSpec {
    pub therapy: Therapy,
    pub context: ClinicalContext,
    pub target_type: Option<TargetType>,
    pub range_low: Option<f64>,
    pub range_high: Option<f64>,
}

// ============================================================================
// Regimen and Dataset Types
// ============================================================================

/// Caller-supplied regimen changes
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct RegimenOverride {
    #[serde(default)]
    pub amount: Option<f64>,
    /// Dosing interval in hours
    #[serde(default)]
    pub tau: Option<f64>,
    #[serde(default)]
    pub route: Option<Route>,
    #[serde(default)]
    pub infusion_minutes: Option<f64>,
}

/// Regimen parameters as sent to the evaluator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegimenParams {
    /// Dosing interval in hours; unknown with fewer than two doses
    pub tau: Option<f64>,
    pub amount: f64,
    pub rate: f64,
    pub cmt: u8,
}

/// Static covariates shared by every dataset row
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CovariateSnapshot {
    pub weight: f64,
    pub sex: u8,
    pub age: f64,
    pub renal: RenalFunction,
    pub toxicity: u8,
}

/// Event type of a dataset row
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Evid {
    Observation,
    Dose,
}

impl Evid {
    pub fn code(self) -> u8 {
        match self {
            Evid::Observation => 0,
            Evid::Dose => 1,
        }
    }
}

/// One row of the evaluator dataset
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub struct DatasetRow {
    pub id: u32,
    pub time: f64,
    pub dv: Option<f64>,
    pub amt: f64,
    pub rate: f64,
    pub cmt: u8,
    pub wt: f64,
    pub sex: u8,
    pub age: f64,
    pub crcl: Option<f64>,
    pub egfr: Option<f64>,
    pub toxi: u8,
    pub evid: u8,
}

impl DatasetRow {
    pub fn is_dose(&self) -> bool {
        self.evid == Evid::Dose.code()
    }
}

/// A scored candidate dose
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CandidateRegimen {
    pub amount: f64,
    /// Distance from target; 0 inside the range, infinite if evaluation failed
    pub score: f64,
    /// The predicted value the score was computed from
    pub predicted: Option<f64>,
}

/// Normalised forecasting-model code
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ModelVariant(String);

impl ModelVariant {
    /// Normalise a raw model code: first character lower-cased, every `-` replaced with `_`
    pub fn from_raw(raw: &str) -> Self {
        let mut chars = raw.chars();
        let normalised = match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        Self(normalised.replace('-', "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
