//! Evaluator dataset assembly.
//!
//! Builds the before/after regimen parameters and the time-anchored event
//! dataset from a patient's dosing and observation history. Everything here is
//! a pure function of its inputs: the same input always yields the same payload.

use crate::catalog::get_default_catalog;
use crate::units::normalise_concentration;
use crate::{
    CovariateSnapshot, DatasetRow, DosageForm, DoseEvent, Error, Evid, ObservationEvent, Patient,
    RegimenOverride, RegimenParams, RenalFunction, Result, Route, TargetSpec, Therapy,
    VancomycinIndication,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject identifier written into every row
pub const SUBJECT_ID: u32 = 1;

/// Time of the synthetic forecast anchor when tau is unknown, in hours
pub const DEFAULT_ANCHOR_HOURS: f64 = 2.0;

/// Compartment receiving oral doses
const DEPOT_CMT: u8 = 1;

/// Caller overrides for the current ("before") and proposed ("after") regimens
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RegimenPlan {
    #[serde(default)]
    pub before: RegimenOverride,
    #[serde(default)]
    pub after: RegimenOverride,
}

/// Everything the builder reads
#[derive(Clone, Debug)]
pub struct DatasetInput<'a> {
    pub patient: &'a Patient,
    pub renal: RenalFunction,
    pub target: &'a TargetSpec,
    pub form: DosageForm,
    pub doses: &'a [DoseEvent],
    pub observations: &'a [ObservationEvent],
    pub plan: RegimenPlan,
}

impl<'a> DatasetInput<'a> {
    /// Copy of this input with the proposed dose replaced
    pub fn with_after_amount(&self, amount: f64) -> Self {
        let mut input = self.clone();
        input.plan.after.amount = Some(amount);
        input
    }
}

/// Builder output: regimen parameters, covariates and rows
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ClinicalPayload {
    pub before: RegimenParams,
    pub after: RegimenParams,
    pub covariates: CovariateSnapshot,
    pub dataset: Vec<DatasetRow>,
}

/// Fully resolved regimen, before it is flattened to wire parameters
#[derive(Clone, Debug, PartialEq)]
struct ResolvedRegimen {
    amount: f64,
    tau: Option<f64>,
    route: Route,
    infusion_minutes: Option<f64>,
}

impl ResolvedRegimen {
    fn params(&self, central_cmt: u8) -> RegimenParams {
        RegimenParams {
            tau: self.tau,
            amount: self.amount,
            rate: infusion_rate(self.amount, self.route, self.infusion_minutes),
            cmt: compartment(self.route, central_cmt),
        }
    }
}

/// Infusion rate in amount/h; zero unless an IV dose has a positive duration
pub fn infusion_rate(amount: f64, route: Route, infusion_minutes: Option<f64>) -> f64 {
    match (route, infusion_minutes) {
        (Route::Iv, Some(minutes)) if minutes > 0.0 => amount / (minutes / 60.0),
        _ => 0.0,
    }
}

fn compartment(route: Route, central_cmt: u8) -> u8 {
    match route {
        Route::Oral => DEPOT_CMT,
        Route::Iv | Route::Sc | Route::Im => central_cmt,
    }
}

/// Route implied by a dosage form when nothing else says
pub fn default_route(form: DosageForm) -> Route {
    match form {
        DosageForm::Capsule | DosageForm::Tablet | DosageForm::Solution => Route::Oral,
        DosageForm::Injection => Route::Iv,
    }
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

/// Interval between the two most recent doses, in hours
pub fn infer_tau(doses: &[DoseEvent]) -> Option<f64> {
    let mut times: Vec<_> = doses.iter().map(|d| d.timestamp).collect();
    times.sort();
    match times.as_slice() {
        [.., previous, last] => {
            let tau = hours_between(*previous, *last);
            (tau > 0.0).then_some(tau)
        }
        _ => None,
    }
}

/// Toxicity covariate: vancomycin in neurosurgery with a nephrotoxic co-medication
pub fn toxicity_flag(target: &TargetSpec) -> u8 {
    let flagged = matches!(
        target.therapy,
        Therapy::Vancomycin(VancomycinIndication::Neurosurgery)
    ) && target.context.nephrotoxic_comedication.is_some();
    u8::from(flagged)
}

fn resolve_before(input: &DatasetInput<'_>, last_dose: Option<&DoseEvent>) -> Result<ResolvedRegimen> {
    let overrides = &input.plan.before;

    let amount = overrides
        .amount
        .or(last_dose.map(|d| d.amount))
        .or(input.plan.after.amount)
        .ok_or_else(|| {
            Error::Regimen("no dose history and no dose amount supplied".to_string())
        })?;

    let route = overrides
        .route
        .or(last_dose.map(|d| d.route))
        .or(input.plan.after.route)
        .unwrap_or_else(|| default_route(input.form));

    let infusion_minutes = overrides
        .infusion_minutes
        .or(last_dose.and_then(|d| d.infusion_minutes))
        .or(input.plan.after.infusion_minutes);

    let tau = overrides.tau.or_else(|| infer_tau(input.doses));

    Ok(ResolvedRegimen {
        amount,
        tau,
        route,
        infusion_minutes,
    })
}

fn resolve_after(before: &ResolvedRegimen, overrides: &RegimenOverride) -> ResolvedRegimen {
    ResolvedRegimen {
        amount: overrides.amount.unwrap_or(before.amount),
        tau: overrides.tau.or(before.tau),
        route: overrides.route.unwrap_or(before.route),
        infusion_minutes: overrides.infusion_minutes.or(before.infusion_minutes),
    }
}

/// Build before/after regimens and the event dataset
pub fn build_payload(input: &DatasetInput<'_>) -> Result<ClinicalPayload> {
    let profile = get_default_catalog().profile(input.target.therapy.drug());

    let mut doses: Vec<&DoseEvent> = input.doses.iter().collect();
    doses.sort_by_key(|d| d.timestamp);
    let mut observations: Vec<&ObservationEvent> = input.observations.iter().collect();
    observations.sort_by_key(|o| o.timestamp);

    let before = resolve_before(input, doses.last().copied())?;
    let after = resolve_after(&before, &input.plan.after);

    let covariates = CovariateSnapshot {
        weight: input.patient.weight_kg,
        sex: input.patient.sex.covariate(),
        age: input.patient.age_years,
        renal: input.renal,
        toxicity: toxicity_flag(input.target),
    };

    let row = |time: f64, evid: Evid, dv: Option<f64>, amt: f64, rate: f64, cmt: u8| DatasetRow {
        id: SUBJECT_ID,
        time,
        dv,
        amt,
        rate,
        cmt,
        wt: covariates.weight,
        sex: covariates.sex,
        age: covariates.age,
        crcl: covariates.renal.crcl(),
        egfr: covariates.renal.egfr(),
        toxi: covariates.toxicity,
        evid: evid.code(),
    };

    // Time zero is the first dose, or the first observation when no dose exists
    let anchor = doses
        .first()
        .map(|d| d.timestamp)
        .or_else(|| observations.first().map(|o| o.timestamp));
    let relative = |ts: DateTime<Utc>| match anchor {
        Some(anchor) => hours_between(anchor, ts).max(0.0),
        None => 0.0,
    };

    let mut dose_rows: Vec<DatasetRow> = doses
        .iter()
        .map(|d| {
            row(
                relative(d.timestamp),
                Evid::Dose,
                None,
                d.amount,
                infusion_rate(d.amount, d.route, d.infusion_minutes),
                compartment(d.route, profile.central_cmt),
            )
        })
        .collect();

    if dose_rows.is_empty() {
        tracing::debug!("No dose history, synthesising dose of {} at t=0", before.amount);
        let params = before.params(profile.central_cmt);
        dose_rows.push(row(0.0, Evid::Dose, None, params.amount, params.rate, params.cmt));
    }

    let mut observation_rows: Vec<DatasetRow> = observations
        .iter()
        .map(|o| {
            let dv = normalise_concentration(o.concentration, &o.unit, profile.canonical_unit);
            row(
                relative(o.timestamp),
                Evid::Observation,
                Some(dv),
                0.0,
                0.0,
                profile.central_cmt,
            )
        })
        .collect();

    if observation_rows.is_empty() {
        let time = before.tau.unwrap_or(DEFAULT_ANCHOR_HOURS);
        tracing::debug!("No observations, adding forecast anchor at t={}", time);
        observation_rows.push(row(time, Evid::Observation, None, 0.0, 0.0, profile.central_cmt));
    }

    // Observations sort ahead of doses at the same time: a level drawn at dose time is pre-dose
    let mut dataset: Vec<DatasetRow> = observation_rows.into_iter().chain(dose_rows).collect();
    dataset.sort_by(|a, b| a.time.total_cmp(&b.time));

    tracing::debug!(
        "Built dataset with {} rows ({} doses)",
        dataset.len(),
        dataset.iter().filter(|r| r.is_dose()).count()
    );

    Ok(ClinicalPayload {
        before: before.params(profile.central_cmt),
        after: after.params(profile.central_cmt),
        covariates,
        dataset,
    })
}
