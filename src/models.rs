//! Core data model: time windows, raw/aggregated PEG samples, comparison
//! records and the top-level request/result envelopes.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A timezone-aware half-open-in-spirit (but inclusive, per the parser's
/// rules) time range. `start <= end` and both carry the same offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeWindow {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        debug_assert!(start <= end, "TimeWindow invariant: start <= end");
        Self { start, end }
    }

}

/// `"YYYY-MM-DD HH:MM:SS"` in the instant's own offset, per the payload
/// builder's literal time format.
pub fn format_literal(instant: DateTime<FixedOffset>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowTag {
    NMinus1,
    N,
}

/// Row-retrieval restriction. Empty sets mean "no restriction".
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub ne: Option<String>,
    pub cell_ids: BTreeSet<String>,
    pub host: Option<String>,
    pub peg_names: BTreeSet<String>,
}

/// One raw PEG sample as retrieved from the relational store.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub timestamp: DateTime<FixedOffset>,
    pub peg_name: String,
    pub value: f64,
    pub ne_key: Option<String>,
    pub host_name: Option<String>,
    pub index_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Significance {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataQuality {
    High,
    Medium,
    Low,
}

/// A PEG aggregated per name, per window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPeg {
    pub peg_name: String,
    pub window_tag: WindowTag,
    pub avg: f64,
    pub count: u64,
    /// Relative standard deviation, percent. `0` when `count < 2` or `avg == 0`.
    pub rsd: f64,
}

impl AggregatedPeg {
    pub fn zeroed(peg_name: impl Into<String>, window_tag: WindowTag) -> Self {
        Self { peg_name: peg_name.into(), window_tag, avg: 0.0, count: 0, rsd: 0.0 }
    }
}

/// A user-defined derived PEG formula.
#[derive(Debug, Clone)]
pub struct DerivedFormula {
    pub name: String,
    pub expression: String,
}

/// Identifiers recovered from raw rows (or, failing that, the request) that
/// propagate into the final result regardless of downstream groupwise
/// reductions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisIdentifiers {
    pub ne_id: String,
    pub cell_id: String,
    pub sw_name: String,
}

const UNKNOWN: &str = "unknown";

impl AnalysisIdentifiers {
    pub fn unknown() -> Self {
        Self { ne_id: UNKNOWN.into(), cell_id: UNKNOWN.into(), sw_name: UNKNOWN.into() }
    }
}

/// Partial identifiers captured by the aggregator before groupwise
/// reduction — any field may be unset.
#[derive(Debug, Clone, Default)]
pub struct PartialIdentifiers {
    pub ne_id: Option<String>,
    pub cell_id: Option<String>,
    pub sw_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub peg_name: String,
    pub weight: i64,
    pub n1: AggregatedPeg,
    pub n: AggregatedPeg,
    pub change_abs: f64,
    pub change_pct: f64,
    pub trend: Trend,
    pub significance: Significance,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    pub data_quality: DataQuality,
    pub derived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnalysis {
    pub summary: String,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub per_peg_notes: BTreeMap<String, String>,
    pub confidence: f64,
    pub model_label: String,
}

impl Default for LlmAnalysis {
    fn default() -> Self {
        Self {
            summary: String::new(),
            issues: Vec::new(),
            recommendations: Vec::new(),
            per_peg_notes: BTreeMap::new(),
            confidence: 0.0,
            model_label: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallTrend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total: u64,
    pub improved: u64,
    pub declined: u64,
    pub stable: u64,
    pub weighted_avg_change: f64,
    pub overall_trend: OverallTrend,
}

impl SummaryStats {
    pub fn zero() -> Self {
        Self {
            total: 0,
            improved: 0,
            declined: 0,
            stable: 0,
            weighted_avg_change: 0.0,
            overall_trend: OverallTrend::Stable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: Status,
    pub request_id: String,
    pub analysis_id: String,
    pub time_windows: ResultWindows,
    pub records: Vec<ComparisonRecord>,
    pub summary: SummaryStats,
    pub llm: LlmAnalysis,
    pub identifiers: AnalysisIdentifiers,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultWindows {
    pub n1: WindowLiteral,
    pub n: WindowLiteral,
}

/// A `TimeWindow` rendered with its literal start/end strings, kept
/// alongside the parsed instants so the payload builder never has to
/// reformat (and risk drifting from) the canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowLiteral {
    pub start: String,
    pub end: String,
}

/// Database connection parameters carried in the request's `db` field.
/// Only used when `enable_mock` is false.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConnection {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

/// The normalized output of request validation — everything downstream
/// operates on this, never on the raw request JSON.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub n_minus_1: String,
    pub n: String,
    pub analysis_type: AnalysisType,
    pub enable_mock: bool,
    pub table: String,
    pub columns: BTreeMap<String, String>,
    pub filters: Filter,
    pub selected_pegs: Vec<String>,
    pub peg_definitions: Vec<DerivedFormula>,
    pub max_prompt_tokens: Option<u32>,
    pub db: Option<DbConnection>,
    pub rel_ver: Option<String>,
    pub choi_result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisType {
    Overall,
    Enhanced,
    Specific,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overall => "overall",
            Self::Enhanced => "enhanced",
            Self::Specific => "specific",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "overall" => Some(Self::Overall),
            "enhanced" => Some(Self::Enhanced),
            "specific" => Some(Self::Specific),
            _ => None,
        }
    }
}
