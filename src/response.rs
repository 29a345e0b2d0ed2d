//! Wraps a pipeline outcome as the envelope the CLI prints to stdout.
//! Exit-code mapping lives on [`crate::error::AnalysisError::exit_code`].

use serde::Serialize;

use crate::error::{AnalysisError, ErrorDetails};
use crate::models::AnalysisResult;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResponseEnvelope {
    Success {
        analysis_id: String,
        timestamp: String,
        execution_time_ms: u64,
        result: Box<AnalysisResult>,
    },
    Error {
        error_details: ErrorDetails,
    },
}

pub fn success(result: AnalysisResult, timestamp: String, execution_time_ms: u64) -> ResponseEnvelope {
    ResponseEnvelope::Success {
        analysis_id: result.analysis_id.clone(),
        timestamp,
        execution_time_ms,
        result: Box::new(result),
    }
}

pub fn error(err: &AnalysisError) -> ResponseEnvelope {
    ResponseEnvelope::Error { error_details: ErrorDetails::from(err) }
}
