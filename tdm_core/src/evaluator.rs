//! External forecasting evaluator: wire format and HTTP client.
//!
//! Request and response field names are a fixed wire contract with the
//! evaluator service and must not be renamed.

use crate::config::EvaluatorConfig;
use crate::dataset::ClinicalPayload;
use crate::{DatasetRow, Error, ModelVariant, Result, TargetType};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Request body sent to the evaluator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorRequest {
    #[serde(rename = "input_WT")]
    pub input_wt: f64,
    #[serde(rename = "input_CRCL", skip_serializing_if = "Option::is_none")]
    pub input_crcl: Option<f64>,
    #[serde(rename = "input_EGFR", skip_serializing_if = "Option::is_none")]
    pub input_egfr: Option<f64>,
    #[serde(rename = "input_AGE")]
    pub input_age: f64,
    #[serde(rename = "input_SEX")]
    pub input_sex: u8,
    #[serde(rename = "input_TOXI")]
    pub input_toxi: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tau_before: Option<f64>,
    pub input_amount_before: f64,
    pub input_rate_before: f64,
    pub input_cmt_before: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tau_after: Option<f64>,
    pub input_amount_after: f64,
    pub input_rate_after: f64,
    pub input_cmt_after: u8,
    pub model_name: String,
    pub dataset: Vec<DatasetRow>,
}

impl EvaluatorRequest {
    pub fn new(payload: &ClinicalPayload, model: &ModelVariant) -> Self {
        let covariates = &payload.covariates;
        Self {
            input_wt: covariates.weight,
            input_crcl: covariates.renal.crcl(),
            input_egfr: covariates.renal.egfr(),
            input_age: covariates.age,
            input_sex: covariates.sex,
            input_toxi: covariates.toxicity,
            input_tau_before: payload.before.tau,
            input_amount_before: payload.before.amount,
            input_rate_before: payload.before.rate,
            input_cmt_before: payload.before.cmt,
            input_tau_after: payload.after.tau,
            input_amount_after: payload.after.amount,
            input_rate_after: payload.after.rate,
            input_cmt_after: payload.after.cmt,
            model_name: model.as_str().to_string(),
            dataset: payload.dataset.clone(),
        }
    }
}

/// One point of a predicted concentration curve
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConcentrationPoint {
    pub time: f64,
    #[serde(rename = "IPRED")]
    pub ipred: f64,
}

/// Response body returned by the evaluator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct EvaluatorResponse {
    #[serde(rename = "AUC_before", default)]
    pub auc_before: Option<f64>,
    #[serde(rename = "CMAX_before", default)]
    pub cmax_before: Option<f64>,
    #[serde(rename = "CTROUGH_before", default)]
    pub ctrough_before: Option<f64>,
    #[serde(rename = "AUC_after", default)]
    pub auc_after: Option<f64>,
    #[serde(rename = "CMAX_after", default)]
    pub cmax_after: Option<f64>,
    #[serde(rename = "CTROUGH_after", default)]
    pub ctrough_after: Option<f64>,
    /// Individual prediction on the current regimen
    #[serde(rename = "IPRED_CONC", default)]
    pub ipred_conc: Vec<ConcentrationPoint>,
    /// Population prediction
    #[serde(rename = "PRED_CONC", default)]
    pub pred_conc: Vec<ConcentrationPoint>,
    #[serde(rename = "Steady_state", default, deserialize_with = "lenient_bool")]
    pub steady_state: Option<bool>,
}

impl EvaluatorResponse {
    /// Predicted exposure on the proposed regimen for a metric
    pub fn predicted_after(&self, metric: TargetType) -> Option<f64> {
        match metric {
            TargetType::Auc => self.auc_after,
            TargetType::Trough => self.ctrough_after,
            TargetType::Peak => self.cmax_after,
        }
    }

    /// Predicted exposure on the current regimen for a metric
    pub fn predicted_before(&self, metric: TargetType) -> Option<f64> {
        match metric {
            TargetType::Auc => self.auc_before,
            TargetType::Trough => self.ctrough_before,
            TargetType::Peak => self.cmax_before,
        }
    }
}

/// Accepts true/false, "true"/"false"/"yes"/"no" and 0/1
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => Some(b),
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
        Some(serde_json::Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// A forecasting engine reachable by request/response
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluatorRequest) -> Result<EvaluatorResponse>;
}

/// Capped exponential backoff for busy responses
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&EvaluatorConfig> for RetryPolicy {
    fn from(config: &EvaluatorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Statuses that mean "busy, try again later"
pub fn is_busy(status: StatusCode) -> bool {
    status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS
}

/// Evaluator reached over HTTP
pub struct HttpEvaluator {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl HttpEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(client, config.url.clone(), RetryPolicy::from(config)))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            url: url.into(),
            retry,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    async fn evaluate(&self, request: &EvaluatorRequest) -> Result<EvaluatorResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let resp = self.client.post(&self.url).json(request).send().await?;
            let status = resp.status();

            if status.is_success() {
                let body = resp.bytes().await?;
                let parsed = serde_json::from_slice::<EvaluatorResponse>(&body)
                    .map_err(|e| Error::EvaluatorOutput(e.to_string()))?;
                tracing::debug!(
                    "Evaluator answered for {} after {} attempt(s)",
                    request.model_name,
                    attempt
                );
                return Ok(parsed);
            }

            if is_busy(status) {
                if attempt >= self.retry.max_attempts {
                    return Err(Error::EvaluatorBusy { attempts: attempt });
                }
                let delay = self.retry.delay_for(attempt);
                tracing::warn!(
                    "Evaluator busy ({}), retrying in {:?} (attempt {}/{})",
                    status,
                    delay,
                    attempt,
                    self.retry.max_attempts
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let message = resp.text().await.unwrap_or_default();
            return Err(Error::EvaluatorApi {
                status: status.as_u16(),
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CovariateSnapshot, RegimenParams, RenalFunction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const RESPONSE_JSON: &str = r#"{
        "AUC_before": 410.5, "CMAX_before": 32.1, "CTROUGH_before": 11.2,
        "AUC_after": 480.0, "CMAX_after": 36.0, "CTROUGH_after": 14.8,
        "IPRED_CONC": [{"time": 0, "IPRED": 0.0}, {"time": 1, "IPRED": 30.5}],
        "PRED_CONC": [{"time": 0, "IPRED": 0.0}],
        "Steady_state": "true"
    }"#;

    fn payload() -> ClinicalPayload {
        let params = RegimenParams {
            tau: None,
            amount: 1000.0,
            rate: 1000.0,
            cmt: 1,
        };
        ClinicalPayload {
            before: params.clone(),
            after: RegimenParams {
                tau: Some(12.0),
                ..params
            },
            covariates: CovariateSnapshot {
                weight: 70.0,
                sex: 1,
                age: 50.0,
                renal: RenalFunction::Egfr(64.0),
                toxicity: 0,
            },
            dataset: vec![],
        }
    }

    fn request() -> EvaluatorRequest {
        EvaluatorRequest::new(&payload(), &ModelVariant::from_raw("Vancomycin1-1"))
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn direct_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serve one canned response per connection, in order
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/forecast", addr), hits)
    }

    #[test]
    fn test_request_wire_names() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["input_WT"], 70.0);
        assert_eq!(json["input_EGFR"], 64.0);
        assert!(json.get("input_CRCL").is_none());
        assert!(json.get("input_tau_before").is_none());
        assert_eq!(json["input_tau_after"], 12.0);
        assert_eq!(json["model_name"], "vancomycin1_1");
        assert!(json["dataset"].is_array());
    }

    #[test]
    fn test_response_parsing() {
        let response: EvaluatorResponse = serde_json::from_str(RESPONSE_JSON).unwrap();
        assert_eq!(response.predicted_after(TargetType::Trough), Some(14.8));
        assert_eq!(response.predicted_after(TargetType::Auc), Some(480.0));
        assert_eq!(response.predicted_before(TargetType::Peak), Some(32.1));
        assert_eq!(response.ipred_conc.len(), 2);
        assert_eq!(response.steady_state, Some(true));
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let response: EvaluatorResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response, EvaluatorResponse::default());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(4000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_retries_busy_then_succeeds() {
        crate::logging::init_test();
        let (url, hits) = serve(vec![(503, "busy"), (503, "busy"), (200, RESPONSE_JSON)]).await;
        let evaluator = HttpEvaluator::with_client(direct_client(), url, fast_retry(4));

        let response = evaluator.evaluate(&request()).await.unwrap();
        assert_eq!(response.ctrough_after, Some(14.8));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (url, hits) = serve(vec![(503, "busy"), (429, "slow down")]).await;
        let evaluator = HttpEvaluator::with_client(direct_client(), url, fast_retry(2));

        let result = evaluator.evaluate(&request()).await;
        assert!(matches!(result, Err(Error::EvaluatorBusy { attempts: 2 })));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let (url, hits) = serve(vec![(400, "bad dataset")]).await;
        let evaluator = HttpEvaluator::with_client(direct_client(), url, fast_retry(4));

        let result = evaluator.evaluate(&request()).await;
        match result {
            Err(Error::EvaluatorApi { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad dataset");
            }
            other => panic!("Expected EvaluatorApi, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_output_error() {
        let (url, _) = serve(vec![(200, "not json")]).await;
        let evaluator = HttpEvaluator::with_client(direct_client(), url, fast_retry(1));

        let result = evaluator.evaluate(&request()).await;
        assert!(matches!(result, Err(Error::EvaluatorOutput(_))));
    }
}
