//! Patient case files.
//!
//! A case bundles everything the engine needs about one patient: covariates,
//! renal assessments, history, the free-text target as entered, and any
//! regimen overrides. Free text is parsed exactly once, in [`PatientCase::target_spec`].

use crate::catalog::get_default_catalog;
use crate::dataset::RegimenPlan;
use crate::renal::AssessmentRepository;
use crate::target::{parse_target_type, TargetRange};
use crate::units::normalise_concentration;
use crate::{
    DosageForm, DoseEvent, ObservationEvent, Patient, RenalAssessment, Result, TargetSpec,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One patient's dosing case
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatientCase {
    pub patient: Patient,

    #[serde(default)]
    pub assessments: Vec<RenalAssessment>,

    #[serde(default)]
    pub doses: Vec<DoseEvent>,

    #[serde(default)]
    pub observations: Vec<ObservationEvent>,

    pub drug_name: String,

    #[serde(default)]
    pub indication: Option<String>,

    /// Free text such as post-operative day or co-medication
    #[serde(default)]
    pub additional_info: Option<String>,

    /// e.g. "Trough", "AUC24"
    #[serde(default)]
    pub target_type: Option<String>,

    /// e.g. "10-20 mg/L"
    #[serde(default)]
    pub target_range: Option<String>,

    #[serde(default)]
    pub dosage_form: DosageForm,

    #[serde(default)]
    pub plan: RegimenPlan,
}

impl PatientCase {
    /// Load a case from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut case: PatientCase = serde_json::from_str(&contents)?;
        case.sort_history();
        tracing::info!(
            "Loaded case for {} from {:?} ({} doses, {} observations)",
            case.drug_name,
            path,
            case.doses.len(),
            case.observations.len()
        );
        Ok(case)
    }

    /// Keep dose and observation history in time order
    pub fn sort_history(&mut self) {
        self.doses.sort_by_key(|d| d.timestamp);
        self.observations.sort_by_key(|o| o.timestamp);
    }

    /// Parse the free-text target into its structured form
    ///
    /// Only an unknown drug is an error. An unrecognised target type or
    /// unparsable range leaves the corresponding fields empty.
    pub fn target_spec(&self) -> Result<TargetSpec> {
        let catalog = get_default_catalog();
        let therapy = catalog.resolve_therapy(&self.drug_name, self.indication.as_deref())?;
        let context = catalog.resolve_context(therapy.drug(), self.additional_info.as_deref());
        let target_type = self.target_type.as_deref().and_then(parse_target_type);

        let range = self.target_range.as_deref().and_then(|text| {
            let parsed = TargetRange::parse(text);
            if parsed.is_none() {
                tracing::warn!("Could not parse target range {:?}", text);
            }
            parsed
        });

        Ok(TargetSpec {
            therapy,
            context,
            target_type,
            range_low: range.as_ref().map(|r| r.low),
            range_high: range.as_ref().map(|r| r.high),
        })
    }

    /// The renal assessment the engine should use
    pub fn chosen_assessment(&self) -> Option<&RenalAssessment> {
        self.assessments.chosen()
    }

    /// Most recent measured level in the drug's canonical unit
    pub fn last_trough(&self) -> Result<Option<f64>> {
        let therapy = get_default_catalog().resolve_therapy(&self.drug_name, None)?;
        let canonical = get_default_catalog().profile(therapy.drug()).canonical_unit;
        Ok(self
            .observations
            .iter()
            .max_by_key(|o| o.timestamp)
            .map(|o| normalise_concentration(o.concentration, &o.unit, canonical)))
    }
}
