//! Dosing engine: ties a case to the evaluator.
//!
//! A request is assembled in three steps:
//! 1. Renal function from the chosen assessment
//! 2. Model variant from therapy, CRRT status and time since the last dose
//! 3. Regimen parameters and event dataset
//!
//! `forecast` sends one request; `recommend` fans out the candidate search.

use crate::case::PatientCase;
use crate::catalog::get_default_catalog;
use crate::config::Config;
use crate::dataset::{build_payload, default_route, ClinicalPayload, DatasetInput, RegimenPlan};
use crate::evaluator::{Evaluator, EvaluatorRequest, EvaluatorResponse, HttpEvaluator};
use crate::model_variant::{select_model_variant, SelectionContext};
use crate::renal::estimate_renal_function;
use crate::search::{search_regimens, Scoring, SearchParams};
use crate::target::RangeStatus;
use crate::timeseries::{from_points, mean_concentration, merge_series, MergedPoint};
use crate::{CandidateRegimen, ModelVariant, RenalFunction, Result, Route, TargetSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Everything derived from a case before the evaluator is called
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    pub target: TargetSpec,
    pub renal: RenalFunction,
    pub model: ModelVariant,
    pub payload: ClinicalPayload,
    pub request: EvaluatorRequest,
}

/// Result of a single forecast
#[derive(Clone, Debug, Serialize)]
pub struct Forecast {
    pub model: ModelVariant,
    pub response: EvaluatorResponse,
    pub series: Vec<MergedPoint>,
    /// Time-averaged individual prediction
    pub mean_concentration: Option<f64>,
    /// Predicted exposure on the current regimen against the target
    pub current_status: Option<RangeStatus>,
    /// Predicted exposure on the proposed regimen against the target
    pub status: Option<RangeStatus>,
}

/// A kept regimen with its target status
#[derive(Clone, Debug, Serialize)]
pub struct RankedRegimen {
    #[serde(flatten)]
    pub candidate: CandidateRegimen,
    pub status: Option<RangeStatus>,
}

/// Result of a candidate search
#[derive(Clone, Debug, Serialize)]
pub struct Recommendation {
    pub model: ModelVariant,
    pub baseline: f64,
    pub step: f64,
    pub regimens: Vec<RankedRegimen>,
}

/// Assemble the evaluator request for a case
///
/// Depends only on the case, the plan and `now`; no evaluator is involved.
pub fn prepare_request(
    case: &PatientCase,
    plan: &RegimenPlan,
    now: DateTime<Utc>,
) -> Result<PreparedRequest> {
    let target = case.target_spec()?;
    let chosen = case.chosen_assessment();
    let renal = estimate_renal_function(&case.patient, chosen);
    let crrt = chosen.is_some_and(|a| a.on_crrt());
    let model = select_model_variant(&target, &SelectionContext::new(crrt, &case.doses, now));

    let input = DatasetInput {
        patient: &case.patient,
        renal,
        target: &target,
        form: case.dosage_form,
        doses: &case.doses,
        observations: &case.observations,
        plan: plan.clone(),
    };
    let payload = build_payload(&input)?;
    let request = EvaluatorRequest::new(&payload, &model);

    Ok(PreparedRequest {
        target,
        renal,
        model,
        payload,
        request,
    })
}

/// Dosing engine
pub struct DosingEngine {
    evaluator: Arc<dyn Evaluator>,
    config: Config,
}

impl DosingEngine {
    pub fn new(evaluator: Arc<dyn Evaluator>, config: Config) -> Self {
        Self { evaluator, config }
    }

    /// Engine talking to the HTTP evaluator named in the config
    pub fn from_config(config: Config) -> Result<Self> {
        let evaluator = HttpEvaluator::new(&config.evaluator)?;
        tracing::info!("Using evaluator at {}", evaluator.url());
        Ok(Self::new(Arc::new(evaluator), config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// One evaluator round trip for the case's regimen
    pub async fn forecast(
        &self,
        case: &PatientCase,
        plan: &RegimenPlan,
        now: DateTime<Utc>,
    ) -> Result<Forecast> {
        let prepared = prepare_request(case, plan, now)?;
        let response = self.evaluator.evaluate(&prepared.request).await?;

        let predicted = from_points(&response.ipred_conc);
        let population = from_points(&response.pred_conc);
        let observed: Vec<(f64, f64)> = prepared
            .payload
            .dataset
            .iter()
            .filter(|row| !row.is_dose())
            .filter_map(|row| row.dv.map(|dv| (row.time, dv)))
            .collect();

        let target = &prepared.target;
        let classify = |value: Option<f64>| value.map(|v| target.status(v));
        let current_status =
            classify(target.target_type.and_then(|m| response.predicted_before(m)));
        let status = classify(target.target_type.and_then(|m| response.predicted_after(m)));

        Ok(Forecast {
            model: prepared.model,
            series: merge_series(&predicted, &population, &observed, None),
            mean_concentration: mean_concentration(&predicted),
            current_status,
            status,
            response,
        })
    }

    /// Search candidate doses around the case's current regimen
    pub async fn recommend(&self, case: &PatientCase, now: DateTime<Utc>) -> Result<Recommendation> {
        let prepared = prepare_request(case, &case.plan, now)?;
        let drug = prepared.target.therapy.drug();

        let route = self.current_route(case);
        let step = self
            .config
            .search
            .step_override
            .unwrap_or_else(|| get_default_catalog().step_size(drug, route, case.dosage_form));
        let baseline = prepared.payload.after.amount;

        let scoring = Scoring::for_target(&prepared.target, case.last_trough()?, baseline);
        let params = SearchParams {
            baseline,
            step,
            keep: self.config.search.keep,
        };

        let input = DatasetInput {
            patient: &case.patient,
            renal: prepared.renal,
            target: &prepared.target,
            form: case.dosage_form,
            doses: &case.doses,
            observations: &case.observations,
            plan: case.plan.clone(),
        };
        let candidates = search_regimens(
            Arc::clone(&self.evaluator),
            &input,
            &prepared.model,
            &scoring,
            &params,
        )
        .await?;

        let regimens = candidates
            .into_iter()
            .map(|candidate| RankedRegimen {
                status: candidate.predicted.map(|v| prepared.target.status(v)),
                candidate,
            })
            .collect();

        Ok(Recommendation {
            model: prepared.model,
            baseline,
            step,
            regimens,
        })
    }

    fn current_route(&self, case: &PatientCase) -> Route {
        case.plan
            .after
            .route
            .or(case.plan.before.route)
            .or(case.doses.last().map(|d| d.route))
            .unwrap_or_else(|| default_route(case.dosage_form))
    }
}
