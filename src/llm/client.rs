//! Multi-endpoint LLM client: ordered endpoint trial, exponential backoff
//! with jitter, 429/5xx/network-retryable vs. 4xx-fatal classification,
//! prompt-size capping, and a mock mode that never touches the network.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint: standard
//! `ChatCompletionRequest`/`ChatMessage` shape, first choice's message
//! content treated as the payload, tried across an ordered failover list
//! instead of a single configured provider.

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, StatusCode};

use crate::error::AnalysisError;

use super::models::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, LlmOptions, MOCK_COMPLETION};

pub struct LlmClient {
    http: Client,
}

impl LlmClient {
    pub fn new() -> Self {
        Self { http: Client::builder().build().expect("failed to build LLM http client") }
    }

    /// `Complete(prompt, opts) -> text`. Never logs prompt or response bodies
    /// above DEBUG, and never logs them at all in mock mode.
    pub async fn complete(&self, prompt: &str, opts: &LlmOptions) -> Result<String, AnalysisError> {
        if opts.mock {
            tracing::debug!("LLM mock mode active, skipping network call");
            return Ok(MOCK_COMPLETION.to_string());
        }
        if opts.endpoints.is_empty() {
            return Err(AnalysisError::Internal("no LLM endpoints configured".to_string()));
        }

        let prompt = truncate_prompt(prompt, opts.max_prompt_chars, opts.truncate_buffer);

        let mut endpoints_attempted = 0u32;
        for endpoint in &opts.endpoints {
            endpoints_attempted += 1;
            match self.try_endpoint(endpoint, &prompt, opts).await {
                Ok(text) => return Ok(text),
                Err(EndpointOutcome::Fatal(e)) => return Err(e),
                Err(EndpointOutcome::Exhausted) => {
                    tracing::warn!(endpoint, "LLM endpoint exhausted retries, failing over");
                    continue;
                },
            }
        }
        tracing::error!(endpoints_attempted, "all LLM endpoints exhausted");
        Err(AnalysisError::LLMUnavailable)
    }

    async fn try_endpoint(
        &self,
        endpoint: &str,
        prompt: &str,
        opts: &LlmOptions,
    ) -> Result<String, EndpointOutcome> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(endpoint, prompt, opts).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Fatal(msg)) => {
                    return Err(EndpointOutcome::Fatal(AnalysisError::LLMBadResponse(msg)))
                },
                Err(AttemptError::Retryable(msg)) => {
                    attempt += 1;
                    if attempt > opts.max_retries {
                        tracing::warn!(endpoint, attempt, error = %msg, "LLM attempt exhausted");
                        return Err(EndpointOutcome::Exhausted);
                    }
                    let delay = backoff_with_jitter(opts.backoff_base, attempt);
                    tracing::debug!(endpoint, attempt, delay_ms = delay.as_millis() as u64, "retrying LLM call");
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    async fn attempt(&self, endpoint: &str, prompt: &str, opts: &LlmOptions) -> Result<String, AttemptError> {
        let request = ChatCompletionRequest {
            model: opts.model.clone(),
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
            max_tokens: Some(opts.max_tokens),
            temperature: Some(opts.temperature),
        };

        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(opts.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AttemptError::Retryable(format!("status {status}")));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(format!("status {status}: {body}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Retryable(format!("decoding response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AttemptError::Fatal("empty choices in LLM response".to_string()))?;

        Ok(content)
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

enum AttemptError {
    Retryable(String),
    Fatal(String),
}

enum EndpointOutcome {
    Exhausted,
    Fatal(AnalysisError),
}

fn truncate_prompt(prompt: &str, max_chars: usize, truncate_buffer: usize) -> String {
    if prompt.chars().count() <= max_chars {
        return prompt.to_string();
    }
    let keep = max_chars.saturating_sub(truncate_buffer);
    let truncated: String = prompt.chars().take(keep).collect();
    format!("{truncated}[truncated]")
}

fn backoff_with_jitter(base: f64, attempt: u32) -> Duration {
    let exp = base * 2f64.powi(attempt as i32 - 1);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..0.3 * exp.max(0.01));
    Duration::from_secs_f64((exp + jitter).max(0.0))
}
