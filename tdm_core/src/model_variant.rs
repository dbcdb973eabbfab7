//! Forecasting-model selection.
//!
//! Vancomycin:
//! - CRRT active → CRRT model, regardless of indication or timing
//! - Neurosurgery and last dose ≤ 72h ago → within-72h model
//! - Otherwise → the indication's default model
//!
//! Cyclosporin: model chosen by post-op day bucket, `7~` when unknown.

use crate::catalog::{get_default_catalog, ModelBranch};
use crate::{DoseEvent, ModelVariant, TargetSpec, Therapy, VancomycinIndication};
use chrono::{DateTime, Utc};

/// Hours threshold for the neurosurgical early-phase model
pub const NEUROSURGERY_WINDOW_HOURS: f64 = 72.0;

/// Time- and renal-dependent inputs to model selection
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionContext {
    pub crrt_active: bool,
    pub hours_since_last_dose: Option<f64>,
}

impl SelectionContext {
    pub fn new(crrt_active: bool, doses: &[DoseEvent], now: DateTime<Utc>) -> Self {
        Self {
            crrt_active,
            hours_since_last_dose: hours_since_last_dose(doses, now),
        }
    }
}

/// Hours between the latest dose and `now`
pub fn hours_since_last_dose(doses: &[DoseEvent], now: DateTime<Utc>) -> Option<f64> {
    doses
        .iter()
        .map(|d| d.timestamp)
        .max()
        .map(|last| (now - last).num_seconds() as f64 / 3600.0)
}

/// Pick the decision-table leaf for a target
pub fn select_branch(target: &TargetSpec, ctx: &SelectionContext) -> ModelBranch {
    match target.therapy {
        Therapy::Vancomycin(_) if ctx.crrt_active => ModelBranch::VancomycinCrrt,
        Therapy::Vancomycin(VancomycinIndication::Neurosurgery)
            if ctx
                .hours_since_last_dose
                .is_some_and(|h| h <= NEUROSURGERY_WINDOW_HOURS) =>
        {
            ModelBranch::VancomycinNeurosurgeryWithin72h
        }
        Therapy::Vancomycin(indication) => ModelBranch::Vancomycin(indication),
        Therapy::Cyclosporin(indication) => {
            ModelBranch::Cyclosporin(indication, target.context.post_op.unwrap_or_default())
        }
    }
}

/// Select and normalise the model code for a target
pub fn select_model_variant(target: &TargetSpec, ctx: &SelectionContext) -> ModelVariant {
    let branch = select_branch(target, ctx);
    let raw = get_default_catalog().raw_model_code(branch);
    let variant = ModelVariant::from_raw(raw);
    tracing::info!("Selected model {} ({:?})", variant, branch);
    variant
}
