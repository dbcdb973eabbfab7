//! Candidate regimen search.
//!
//! Six doses around the baseline are evaluated concurrently. Each candidate is
//! scored by its distance from the target range; a failed evaluation scores
//! infinity without affecting the others. The lowest-scoring candidates are
//! returned in ascending dose order.

use crate::dataset::{build_payload, DatasetInput};
use crate::evaluator::{Evaluator, EvaluatorRequest, EvaluatorResponse};
use crate::target::TargetRange;
use crate::{CandidateRegimen, ModelVariant, Result, TargetSpec, TargetType};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Step multipliers applied to the baseline dose
pub const CANDIDATE_OFFSETS: [i32; 6] = [-3, -2, -1, 1, 2, 3];

/// Smallest dose a candidate may take
pub const MIN_CANDIDATE_DOSE: f64 = 1.0;

/// Generate the candidate doses around a baseline
pub fn candidate_doses(baseline: f64, step: f64) -> Vec<f64> {
    CANDIDATE_OFFSETS
        .iter()
        .map(|k| (baseline + f64::from(*k) * step).max(MIN_CANDIDATE_DOSE))
        .collect()
}

/// How a candidate's prediction is turned into a score
#[derive(Clone, Debug, PartialEq)]
pub enum Scoring {
    /// Distance of the predicted metric from the target range
    Range {
        metric: TargetType,
        range: TargetRange,
    },
    /// Distance of the predicted trough from the last measured level
    TrackTrough { reference: f64 },
    /// No target and no measurement: stay as close to the baseline as possible
    StayClose { baseline: f64 },
}

impl Scoring {
    /// Choose the scoring rule for a target
    ///
    /// A target needs both a recognised metric and at least one bound to be
    /// scored against its range; otherwise the last measured trough is tracked.
    pub fn for_target(target: &TargetSpec, last_trough: Option<f64>, baseline: f64) -> Self {
        match (target.target_type, target.range()) {
            (Some(metric), Some(range)) => Scoring::Range { metric, range },
            (metric, _) => {
                let reason = if metric.is_none() {
                    "unrecognised target type"
                } else {
                    "no target range"
                };
                match last_trough {
                    Some(reference) => {
                        tracing::info!("{}, tracking last trough {}", reason, reference);
                        Scoring::TrackTrough { reference }
                    }
                    None => {
                        tracing::info!("{} and no measured level, staying near baseline", reason);
                        Scoring::StayClose { baseline }
                    }
                }
            }
        }
    }

    /// Score one evaluated candidate, returning (score, predicted value)
    pub fn score(&self, amount: f64, response: &EvaluatorResponse) -> (f64, Option<f64>) {
        match self {
            Scoring::Range { metric, range } => match response.predicted_after(*metric) {
                Some(value) if value.is_finite() => (range.distance(value), Some(value)),
                _ => (f64::INFINITY, None),
            },
            Scoring::TrackTrough { reference } => match response.ctrough_after {
                Some(value) if value.is_finite() => ((value - reference).abs(), Some(value)),
                _ => (f64::INFINITY, None),
            },
            Scoring::StayClose { baseline } => {
                ((amount - baseline).abs(), response.ctrough_after)
            }
        }
    }
}

/// Search parameters
#[derive(Clone, Debug, PartialEq)]
pub struct SearchParams {
    pub baseline: f64,
    pub step: f64,
    /// Number of candidates kept
    pub keep: usize,
}

/// Keep the `keep` lowest scores, then order them by dose
///
/// Equal scores keep generation order.
pub fn rank_candidates(mut scored: Vec<CandidateRegimen>, keep: usize) -> Vec<CandidateRegimen> {
    scored.sort_by(|a, b| a.score.total_cmp(&b.score));
    scored.truncate(keep);
    scored.sort_by(|a, b| a.amount.total_cmp(&b.amount));
    scored
}

/// Evaluate every candidate concurrently and rank them
pub async fn search_regimens(
    evaluator: Arc<dyn Evaluator>,
    input: &DatasetInput<'_>,
    model: &ModelVariant,
    scoring: &Scoring,
    params: &SearchParams,
) -> Result<Vec<CandidateRegimen>> {
    let doses = candidate_doses(params.baseline, params.step);
    tracing::info!(
        "Searching {} candidates around {} (step {})",
        doses.len(),
        params.baseline,
        params.step
    );

    let mut outcomes: Vec<Option<Result<EvaluatorResponse>>> = doses.iter().map(|_| None).collect();
    let mut tasks = JoinSet::new();

    for (index, amount) in doses.iter().enumerate() {
        let request = match build_payload(&input.with_after_amount(*amount)) {
            Ok(payload) => EvaluatorRequest::new(&payload, model),
            Err(e) => {
                outcomes[index] = Some(Err(e));
                continue;
            }
        };
        let evaluator = Arc::clone(&evaluator);
        tasks.spawn(async move { (index, evaluator.evaluate(&request).await) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(e) => tracing::warn!("Candidate evaluation task failed: {}", e),
        }
    }

    let scored: Vec<CandidateRegimen> = doses
        .iter()
        .zip(outcomes)
        .map(|(amount, outcome)| {
            let (score, predicted) = match outcome {
                Some(Ok(response)) => scoring.score(*amount, &response),
                Some(Err(e)) => {
                    tracing::warn!("Candidate {} failed: {}", amount, e);
                    (f64::INFINITY, None)
                }
                None => (f64::INFINITY, None),
            };
            tracing::debug!("Candidate {} scored {} (predicted {:?})", amount, score, predicted);
            CandidateRegimen {
                amount: *amount,
                score,
                predicted,
            }
        })
        .collect();

    Ok(rank_candidates(scored, params.keep))
}
