//! Tagged error variants shared by every boundary operation in the pipeline.
//!
//! Every fallible crossing (parsing, evaluation, storage, the LLM call,
//! request validation) returns `Result<T, AnalysisError>`. `anyhow` is
//! reserved for the process edge (config/startup failures that happen
//! before a request exists).

use serde::Serialize;
use serde_json::Value;

/// The tagged error variants enumerated in the error model.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("failed to parse time range '{input}': {reason}")]
    TimeParse { input: String, reason: String },

    #[error("formula syntax error in '{expression}' at position {position}")]
    FormulaSyntax { expression: String, position: usize },

    #[error("formula references unknown PEG '{name}'")]
    FormulaUnknownRef { name: String },

    #[error("failed to load prompt template document: {0}")]
    TemplateLoad(String),

    #[error("prompt template variable '{0}' was not supplied")]
    TemplateVarMissing(String),

    #[error("PEG store failure: {0}")]
    StoreFailure(String),

    #[error("PEG store result exceeded the configured row limit ({limit})")]
    StoreResultTooLarge { limit: u64 },

    #[error("no LLM endpoint could complete the request")]
    LLMUnavailable,

    #[error("LLM response could not be parsed as the expected shape: {0}")]
    LLMBadResponse(String),

    #[error("request field '{field}' is invalid: {reason}")]
    RequestInvalid { field: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Structured details for the error envelope (ResponseFormatter), beyond
    /// the human-readable message.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::TimeParse { input, reason } => {
                Some(serde_json::json!({ "input": input, "reason": reason }))
            },
            Self::FormulaSyntax { expression, position } => {
                Some(serde_json::json!({ "expression": expression, "position": position }))
            },
            Self::FormulaUnknownRef { name } => Some(serde_json::json!({ "name": name })),
            Self::StoreResultTooLarge { limit } => Some(serde_json::json!({ "limit": limit })),
            Self::RequestInvalid { field, reason } => {
                Some(serde_json::json!({ "field": field, "reason": reason }))
            },
            _ => None,
        }
    }

    /// The field the error concerns, if any (surfaced to the caller so they
    /// can correct just that part of the request).
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::RequestInvalid { field, .. } => Some(field.as_str()),
            _ => None,
        }
    }

    /// A short hint a caller can act on, mirrored into the error envelope.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::StoreResultTooLarge { .. } => Some("tighten the time window or filters"),
            Self::TimeParse { .. } => {
                Some("use YYYY-MM-DD_HH:MM~HH:MM, YYYY-MM-DD_HH:MM~YYYY-MM-DD_HH:MM, or YYYY-MM-DD")
            },
            Self::RequestInvalid { .. } => Some("check the field against the recognized request schema"),
            _ => None,
        }
    }

    /// Tag name used in the error envelope and in logs — never the Display
    /// message, which may contain detail not meant for machine matching.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TimeParse { .. } => "TimeParse",
            Self::FormulaSyntax { .. } => "FormulaSyntax",
            Self::FormulaUnknownRef { .. } => "FormulaUnknownRef",
            Self::TemplateLoad(_) => "TemplateLoad",
            Self::TemplateVarMissing(_) => "TemplateVarMissing",
            Self::StoreFailure(_) => "StoreFailure",
            Self::StoreResultTooLarge { .. } => "StoreResultTooLarge",
            Self::LLMUnavailable => "LLMUnavailable",
            Self::LLMBadResponse(_) => "LLMBadResponse",
            Self::RequestInvalid { .. } => "RequestInvalid",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether this variant is recoverable at the boundary that produced it
    /// (`StoreFailure`/`LLMUnavailable` are retried internally; by the time
    /// they reach the caller all internal recovery has been exhausted).
    pub fn is_retryable_at_source(&self) -> bool {
        matches!(self, Self::StoreFailure(_) | Self::LLMUnavailable)
    }

    /// Process exit code for CLI invocations, per the response formatter's
    /// exit code table.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RequestInvalid { .. } | Self::TimeParse { .. } => 2,
            Self::StoreFailure(_) | Self::StoreResultTooLarge { .. } => 3,
            Self::LLMUnavailable | Self::LLMBadResponse(_) => 4,
            _ => 1,
        }
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Structured error detail serialized into the error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&AnalysisError> for ErrorDetails {
    fn from(err: &AnalysisError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            field: err.field().map(str::to_string),
            hint: err.hint().map(str::to_string),
            details: err.details(),
        }
    }
}
