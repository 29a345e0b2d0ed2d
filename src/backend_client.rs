//! Thin best-effort POST of the backend payload. Failure here never
//! invalidates an already-computed `AnalysisResult` — it is logged and
//! surfaced as `AnalysisError::Internal` to the caller of `post`, but the
//! assembler treats it as advisory.

use reqwest::Client;

use crate::error::AnalysisError;
use crate::payload::BackendPayload;

pub struct BackendClient {
    http: Client,
    url: String,
}

impl BackendClient {
    pub fn new(url: String) -> Self {
        Self { http: Client::new(), url }
    }

    pub async fn post(&self, payload: &BackendPayload) -> Result<u16, AnalysisError> {
        let response = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| AnalysisError::Internal(format!("backend post failed: {e}")))?;
        Ok(response.status().as_u16())
    }
}
