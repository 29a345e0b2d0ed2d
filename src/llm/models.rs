//! Wire types for the OpenAI-compatible chat-completion endpoints the LLM
//! client talks to, plus the options struct and endpoint-attempt outcome the
//! assembler reasons about.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub endpoints: Vec<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base: f64,
    pub max_prompt_chars: usize,
    pub truncate_buffer: usize,
    pub mock: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessageContent,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageContent {
    pub content: Option<String>,
}

/// One canned response returned in mock mode — never touches the network and
/// is never logged at a level that would expose real prompt content (there is
/// none here to expose).
pub const MOCK_COMPLETION: &str = r#"{"summary":"Mock analysis: no LLM endpoint contacted.","issues":[],"recommendations":[],"per_peg_notes":{},"confidence":0.5}"#;
