//! Default catalog of drugs, indications and model codes.
//!
//! This is the only place free-text drug, indication and co-medication names
//! are matched. Everything downstream works on [`Therapy`] and [`ClinicalContext`].

use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Static description of a supported drug
#[derive(Clone, Debug)]
pub struct DrugProfile {
    pub drug: Drug,
    pub display_name: &'static str,
    pub aliases: Vec<&'static str>,
    /// Indication aliases, matched case-insensitively against the whole field
    pub indications: Vec<(Therapy, Vec<&'static str>)>,
    /// Indication used when the field is missing or unrecognised
    pub default_therapy: Therapy,
    /// Unit the model expects observations in
    pub canonical_unit: &'static str,
    /// Compartment for parenteral doses and for observations
    pub central_cmt: u8,
    /// Co-medications that switch on the toxicity covariate
    pub nephrotoxic_agents: Vec<&'static str>,
}

/// The complete drug catalog
#[derive(Clone, Debug)]
pub struct Catalog {
    pub drugs: HashMap<Drug, DrugProfile>,
}

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

/// Builds the default catalog
pub fn build_default_catalog() -> Catalog {
    let mut drugs = HashMap::new();

    drugs.insert(
        Drug::Vancomycin,
        DrugProfile {
            drug: Drug::Vancomycin,
            display_name: "Vancomycin",
            aliases: vec!["vancomycin", "vanco", "vcm"],
            indications: vec![
                (
                    Therapy::Vancomycin(VancomycinIndication::General),
                    vec!["general", "adult", "infection", "sepsis"],
                ),
                (
                    Therapy::Vancomycin(VancomycinIndication::Neurosurgery),
                    vec!["neurosurgery", "neurosurgical", "neurosurgical patients", "ns"],
                ),
            ],
            default_therapy: Therapy::Vancomycin(VancomycinIndication::General),
            canonical_unit: "mg/L",
            central_cmt: 1,
            nephrotoxic_agents: vec![
                "amikacin",
                "gentamicin",
                "tobramycin",
                "amphotericin b",
                "piperacillin/tazobactam",
                "colistin",
                "cisplatin",
                "furosemide",
            ],
        },
    );

    drugs.insert(
        Drug::Cyclosporin,
        DrugProfile {
            drug: Drug::Cyclosporin,
            display_name: "Cyclosporin",
            aliases: vec!["cyclosporin", "cyclosporine", "ciclosporin", "csa"],
            indications: vec![
                (
                    Therapy::Cyclosporin(CyclosporinIndication::KidneyTransplant),
                    vec!["kidney transplant", "kidney transplantation", "renal transplant", "kt"],
                ),
                (
                    Therapy::Cyclosporin(CyclosporinIndication::LiverTransplant),
                    vec!["liver transplant", "liver transplantation", "lt"],
                ),
            ],
            default_therapy: Therapy::Cyclosporin(CyclosporinIndication::KidneyTransplant),
            canonical_unit: "ng/mL",
            central_cmt: 2,
            nephrotoxic_agents: vec![],
        },
    );

    Catalog { drugs }
}

impl Catalog {
    /// Look up a drug by any of its aliases
    pub fn resolve_drug(&self, name: &str) -> Option<Drug> {
        let needle = name.trim().to_lowercase();
        self.drugs
            .values()
            .find(|p| p.aliases.iter().any(|a| *a == needle))
            .map(|p| p.drug)
    }

    pub fn profile(&self, drug: Drug) -> &DrugProfile {
        // Every Drug variant is inserted by build_default_catalog
        &self.drugs[&drug]
    }

    /// Resolve drug + indication text into a therapy
    ///
    /// An unknown drug is an error; an unknown or missing indication falls back
    /// to the drug's default therapy.
    pub fn resolve_therapy(&self, drug_name: &str, indication: Option<&str>) -> Result<Therapy> {
        let drug = self
            .resolve_drug(drug_name)
            .ok_or_else(|| Error::UnsupportedDrug(drug_name.to_string()))?;
        let profile = self.profile(drug);

        let Some(text) = indication.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
        else {
            return Ok(profile.default_therapy);
        };

        match profile
            .indications
            .iter()
            .find(|(_, aliases)| aliases.iter().any(|a| *a == text))
        {
            Some((therapy, _)) => Ok(*therapy),
            None => {
                tracing::warn!(
                    "Unrecognised indication {:?} for {}, using default {:?}",
                    text,
                    profile.display_name,
                    profile.default_therapy
                );
                Ok(profile.default_therapy)
            }
        }
    }

    /// Parse the free-text additional info field into a clinical context
    pub fn resolve_context(&self, drug: Drug, additional_info: Option<&str>) -> ClinicalContext {
        let Some(text) = additional_info.map(str::trim).filter(|s| !s.is_empty()) else {
            return ClinicalContext::default();
        };

        let post_op = parse_post_op_bucket(text);
        let lowered = text.to_lowercase();
        let nephrotoxic_comedication = self
            .profile(drug)
            .nephrotoxic_agents
            .iter()
            .find(|agent| lowered.contains(*agent))
            .map(|agent| agent.to_string());

        ClinicalContext {
            post_op,
            nephrotoxic_comedication,
        }
    }

    /// Raw (un-normalised) model code for a therapy branch
    pub fn raw_model_code(&self, branch: ModelBranch) -> &'static str {
        match branch {
            ModelBranch::VancomycinCrrt => "Vancomycin2-1",
            ModelBranch::Vancomycin(VancomycinIndication::General) => "Vancomycin1-1",
            ModelBranch::VancomycinNeurosurgeryWithin72h => "Vancomycin1-2",
            ModelBranch::Vancomycin(VancomycinIndication::Neurosurgery) => "Vancomycin1-3",
            ModelBranch::Cyclosporin(indication, bucket) => {
                match (indication, bucket) {
                    (CyclosporinIndication::KidneyTransplant, PostOpBucket::UpToDay2) => {
                        "Cyclosporin1-1"
                    }
                    (CyclosporinIndication::KidneyTransplant, PostOpBucket::Days3To6) => {
                        "Cyclosporin1-2"
                    }
                    (CyclosporinIndication::KidneyTransplant, PostOpBucket::Day7Onward) => {
                        "Cyclosporin1-3"
                    }
                    (CyclosporinIndication::LiverTransplant, PostOpBucket::UpToDay2) => {
                        "Cyclosporin2-1"
                    }
                    (CyclosporinIndication::LiverTransplant, PostOpBucket::Days3To6) => {
                        "Cyclosporin2-2"
                    }
                    (CyclosporinIndication::LiverTransplant, PostOpBucket::Day7Onward) => {
                        "Cyclosporin2-3"
                    }
                }
            }
        }
    }

    /// Dose step used when generating candidate regimens
    pub fn step_size(&self, drug: Drug, route: Route, form: DosageForm) -> f64 {
        match (drug, route, form) {
            (Drug::Cyclosporin, Route::Oral, DosageForm::Capsule | DosageForm::Tablet) => 25.0,
            _ => 10.0,
        }
    }
}

/// Decision-table leaf chosen by model selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelBranch {
    VancomycinCrrt,
    VancomycinNeurosurgeryWithin72h,
    Vancomycin(VancomycinIndication),
    Cyclosporin(CyclosporinIndication, PostOpBucket),
}

/// Parse a post-op day bucket such as "~2", "3~6" or "7~"
pub fn parse_post_op_bucket(text: &str) -> Option<PostOpBucket> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '-' { '~' } else { c })
        .collect();
    match compact.to_lowercase().trim_end_matches("days").trim_end_matches('d') {
        "~2" | "0~2" => Some(PostOpBucket::UpToDay2),
        "3~6" => Some(PostOpBucket::Days3To6),
        "7~" => Some(PostOpBucket::Day7Onward),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_drug_aliases() {
        let catalog = get_default_catalog();
        assert_eq!(catalog.resolve_drug("Vancomycin"), Some(Drug::Vancomycin));
        assert_eq!(catalog.resolve_drug(" ciclosporin "), Some(Drug::Cyclosporin));
        assert_eq!(catalog.resolve_drug("amoxicillin"), None);
    }

    #[test]
    fn test_unknown_drug_is_error() {
        let catalog = get_default_catalog();
        let result = catalog.resolve_therapy("warfarin", None);
        assert!(matches!(result, Err(Error::UnsupportedDrug(_))));
    }

    #[test]
    fn test_unknown_indication_falls_back_to_default() {
        let catalog = get_default_catalog();
        let therapy = catalog
            .resolve_therapy("vancomycin", Some("orthopaedics"))
            .unwrap();
        assert_eq!(therapy, Therapy::Vancomycin(VancomycinIndication::General));

        let therapy = catalog
            .resolve_therapy("Vancomycin", Some("Neurosurgery"))
            .unwrap();
        assert_eq!(therapy, Therapy::Vancomycin(VancomycinIndication::Neurosurgery));
    }

    #[test]
    fn test_post_op_buckets() {
        assert_eq!(parse_post_op_bucket("~2"), Some(PostOpBucket::UpToDay2));
        assert_eq!(parse_post_op_bucket("3~6"), Some(PostOpBucket::Days3To6));
        assert_eq!(parse_post_op_bucket("3 - 6 days"), Some(PostOpBucket::Days3To6));
        assert_eq!(parse_post_op_bucket("7~"), Some(PostOpBucket::Day7Onward));
        assert_eq!(parse_post_op_bucket("yesterday"), None);
    }

    #[test]
    fn test_nephrotoxic_context() {
        let catalog = get_default_catalog();
        let ctx = catalog.resolve_context(Drug::Vancomycin, Some("Amikacin"));
        assert_eq!(ctx.nephrotoxic_comedication.as_deref(), Some("amikacin"));

        for text in ["none", "other", ""] {
            let ctx = catalog.resolve_context(Drug::Vancomycin, Some(text));
            assert!(ctx.nephrotoxic_comedication.is_none());
        }
    }

    #[test]
    fn test_step_size() {
        let catalog = get_default_catalog();
        assert_eq!(
            catalog.step_size(Drug::Cyclosporin, Route::Oral, DosageForm::Capsule),
            25.0
        );
        assert_eq!(
            catalog.step_size(Drug::Cyclosporin, Route::Oral, DosageForm::Solution),
            10.0
        );
        assert_eq!(
            catalog.step_size(Drug::Vancomycin, Route::Iv, DosageForm::Injection),
            10.0
        );
    }
}
