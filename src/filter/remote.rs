//! Remote filter service client
//!
//! Wire contract:
//! `POST <base>?filter=<none|moving_average|lowpass|adaptive>&window_size=<n>`
//! with body `{"timestamps":[...],"rms_values":[...]}`, every number written
//! with six fixed decimals. The response must carry a `filtered_values` array
//! with one value per input sample.

use std::fmt::Write as _;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;

use crate::types::FilterSpec;

/// Default endpoint of the filter service
pub const DEFAULT_REMOTE_FILTER_URL: &str = "http://localhost:5000/process_data";

/// Default request timeout
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote filter errors. All of them are recovered by local filtering.
#[derive(Debug, thiserror::Error)]
pub enum RemoteFilterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("Unparseable response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Response has no filtered values")]
    Empty,
    #[error("Expected {expected} filtered values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Deserialize)]
struct FilterResponse {
    filtered_values: Vec<f64>,
}

/// HTTP client for the filter service
#[derive(Debug, Clone)]
pub struct RemoteFilterClient {
    http: reqwest::Client,
    url: String,
}

impl RemoteFilterClient {
    /// Create a client for `url` with the given request timeout
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RemoteFilterError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the service to filter `values`. A single attempt, no retry.
    pub async fn filter(
        &self,
        timestamps: &[f64],
        values: &[f64],
        spec: &FilterSpec,
    ) -> Result<Vec<f64>, RemoteFilterError> {
        let body = encode_body(timestamps, values);
        debug!(
            url = %self.url,
            filter = %spec.kind,
            window_size = spec.window_size,
            samples = values.len(),
            "Sending remote filter request"
        );

        let resp = self
            .http
            .post(&self.url)
            .query(&[
                ("filter", spec.kind.as_str().to_string()),
                ("window_size", spec.window_size.to_string()),
            ])
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteFilterError::Status(status));
        }

        let text = resp.text().await?;
        decode_response(&text, values.len())
    }
}

/// Serialize the request body with six fixed decimals per number
pub fn encode_body(timestamps: &[f64], values: &[f64]) -> String {
    let mut body = String::with_capacity(32 + 24 * (timestamps.len() + values.len()));
    body.push_str("{\"timestamps\":");
    write_fixed_array(&mut body, timestamps);
    body.push_str(",\"rms_values\":");
    write_fixed_array(&mut body, values);
    body.push('}');
    body
}

fn write_fixed_array(out: &mut String, values: &[f64]) {
    out.push('[');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        // JSON has no NaN/inf; send them as zero.
        let v = if v.is_finite() { *v } else { 0.0 };
        let _ = write!(out, "{v:.6}");
    }
    out.push(']');
}

/// Extract `filtered_values` from a response body
pub fn decode_response(text: &str, expected: usize) -> Result<Vec<f64>, RemoteFilterError> {
    let response: FilterResponse = serde_json::from_str(text)?;
    let actual = response.filtered_values.len();
    if actual == 0 && expected > 0 {
        return Err(RemoteFilterError::Empty);
    }
    if actual != expected {
        return Err(RemoteFilterError::LengthMismatch { expected, actual });
    }
    Ok(response.filtered_values)
}
