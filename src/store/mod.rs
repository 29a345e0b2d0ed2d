//! The PEG store adapter — the only way the pipeline touches the relational
//! store. The trait is the seam; [`postgres`] is the one concrete adapter
//! shipped here (StarRocks/Doris-style multi-adapter support is not needed —
//! one SQL backend covers the contract here).

pub mod postgres;

use async_trait::async_trait;

use crate::error::AnalysisError;
use crate::models::{Filter, RawSample, TimeWindow};

/// Maps the logical column names the pipeline speaks (`timestamp`,
/// `peg_name`, `value`, `ne_key`, `host_name`, `index_name`, `cell_id`) to
/// physical column names in the underlying table. Values are whitelisted —
/// never interpolated as arbitrary SQL — by checking them against
/// [`is_safe_identifier`] before they're spliced into a query string.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub timestamp: String,
    pub peg_name: String,
    pub value: String,
    pub ne_key: String,
    pub host_name: String,
    pub index_name: String,
    pub cell_id: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            timestamp: "datetime".to_string(),
            peg_name: "peg_name".to_string(),
            value: "value".to_string(),
            ne_key: "ne".to_string(),
            host_name: "host".to_string(),
            index_name: "index_name".to_string(),
            cell_id: "cellid".to_string(),
        }
    }
}

/// A column/table identifier is safe to splice into a query string only if
/// it looks like a plain SQL identifier: letters, digits, underscore,
/// starting with a letter or underscore.
pub fn is_safe_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
pub trait PegStore: Send + Sync {
    /// Fetches every raw sample in `window` matching `filters`, ordered by
    /// timestamp ascending, capped at the configured row limit.
    async fn fetch(
        &self,
        window: &TimeWindow,
        filters: &Filter,
        table: &str,
        columns: &ColumnMap,
    ) -> Result<Vec<RawSample>, AnalysisError>;
}

/// Standing in for the relational store in offline/demo mode (global
/// `llm.mock` or a request's `enable_mock: true`, which also waives the
/// request's `db` requirement). Always reports an empty window; this keeps
/// the rest of the pipeline — aggregation, derived formulas, the LLM call —
/// exercised end to end without a live database.
pub struct MockPegStore;

#[async_trait]
impl PegStore for MockPegStore {
    async fn fetch(
        &self,
        _window: &TimeWindow,
        _filters: &Filter,
        _table: &str,
        _columns: &ColumnMap,
    ) -> Result<Vec<RawSample>, AnalysisError> {
        Ok(Vec::new())
    }
}
