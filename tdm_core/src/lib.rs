#![forbid(unsafe_code)]

//! Core domain model and dosing logic for therapeutic drug monitoring.
//!
//! This crate provides:
//! - Domain types (patients, renal assessments, history, targets)
//! - Drug catalog and model variant selection
//! - Evaluator dataset assembly and the HTTP evaluator client
//! - Candidate regimen search and forecast display series

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod units;
pub mod renal;
pub mod target;
pub mod model_variant;
pub mod dataset;
pub mod evaluator;
pub mod search;
pub mod timeseries;
pub mod case;
pub mod history;
pub mod request;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog, Catalog};
pub use config::Config;
pub use case::PatientCase;
pub use dataset::{build_payload, ClinicalPayload, DatasetInput, RegimenPlan};
pub use evaluator::{Evaluator, EvaluatorRequest, EvaluatorResponse, HttpEvaluator};
pub use history::{load_dose_events, load_observation_events};
pub use renal::{estimate_renal_function, AssessmentRepository};
pub use request::{RequestTicket, RequestTracker};
pub use engine::{prepare_request, DosingEngine, Forecast, Recommendation};
