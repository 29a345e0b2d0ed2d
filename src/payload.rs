//! Builds the external backend payload from a finished `AnalysisResult`.
//! Identifier precedence is aggregator > request filters > `"unknown"`;
//! `llm_analysis` is never null.

use serde::Serialize;
use serde_json::Value;

use crate::models::{AnalysisIdentifiers, AnalysisResult, ComparisonRecord, Filter, LlmAnalysis};

#[derive(Debug, Clone, Serialize)]
pub struct BackendPayload {
    pub ne_id: String,
    pub cell_id: String,
    pub swname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel_ver: Option<String>,
    pub analysis_period: AnalysisPeriod,
    pub analysis_id: String,
    pub llm_analysis: LlmAnalysisPayload,
    pub peg_comparisons: Vec<PegComparisonPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choi_result: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisPeriod {
    pub n_minus_1_start: String,
    pub n_minus_1_end: String,
    pub n_start: String,
    pub n_end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmAnalysisPayload {
    pub summary: String,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PegComparisonPayload {
    pub peg_name: String,
    pub weight: i64,
    pub n1_avg: f64,
    pub n_avg: f64,
    pub n1_rsd: f64,
    pub n_rsd: f64,
    pub change_absolute: f64,
    pub change_percent: f64,
    pub trend: String,
    pub significance: String,
    pub confidence: f64,
    pub data_quality: String,
    pub derived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
}

pub fn build(result: &AnalysisResult, rel_ver: Option<String>, filters: &Filter) -> BackendPayload {
    let identifiers = resolve_identifiers(&result.identifiers, filters);

    BackendPayload {
        ne_id: identifiers.ne_id,
        cell_id: identifiers.cell_id,
        swname: identifiers.sw_name,
        rel_ver,
        analysis_period: AnalysisPeriod {
            n_minus_1_start: result.time_windows.n1.start.clone(),
            n_minus_1_end: result.time_windows.n1.end.clone(),
            n_start: result.time_windows.n.start.clone(),
            n_end: result.time_windows.n.end.clone(),
        },
        analysis_id: result.analysis_id.clone(),
        llm_analysis: build_llm_payload(&result.llm),
        peg_comparisons: result.records.iter().map(build_comparison_payload).collect(),
        choi_result: result.metadata.get("choi_result").cloned(),
    }
}

fn resolve_identifiers(aggregator: &AnalysisIdentifiers, filters: &Filter) -> AnalysisIdentifiers {
    const UNKNOWN: &str = "unknown";
    AnalysisIdentifiers {
        ne_id: non_empty(&aggregator.ne_id)
            .or_else(|| filters.ne.as_deref().and_then(non_empty))
            .unwrap_or(UNKNOWN)
            .to_string(),
        cell_id: non_empty(&aggregator.cell_id)
            .or_else(|| filters.cell_ids.iter().next().map(String::as_str))
            .unwrap_or(UNKNOWN)
            .to_string(),
        sw_name: non_empty(&aggregator.sw_name)
            .or_else(|| filters.host.as_deref().and_then(non_empty))
            .unwrap_or(UNKNOWN)
            .to_string(),
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() || s == "unknown" {
        None
    } else {
        Some(s)
    }
}

fn build_llm_payload(llm: &LlmAnalysis) -> LlmAnalysisPayload {
    LlmAnalysisPayload {
        summary: llm.summary.clone(),
        issues: llm.issues.clone(),
        recommendations: llm.recommendations.clone(),
        confidence: if llm.confidence > 0.0 { Some(llm.confidence) } else { None },
        model_name: if llm.model_label.is_empty() { None } else { Some(llm.model_label.clone()) },
    }
}

fn build_comparison_payload(record: &ComparisonRecord) -> PegComparisonPayload {
    PegComparisonPayload {
        peg_name: record.peg_name.clone(),
        weight: record.weight,
        n1_avg: record.n1.avg,
        n_avg: record.n.avg,
        n1_rsd: record.n1.rsd,
        n_rsd: record.n.rsd,
        change_absolute: record.change_abs,
        change_percent: record.change_pct,
        trend: format!("{:?}", record.trend).to_uppercase(),
        significance: format!("{:?}", record.significance).to_uppercase(),
        confidence: record.confidence,
        data_quality: format!("{:?}", record.data_quality).to_uppercase(),
        derived: record.derived,
        cell_id: record.cell_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AggregatedPeg, DataQuality, OverallTrend, ResultWindows, Significance, Status, SummaryStats, Trend,
        WindowLiteral, WindowTag,
    };
    use std::collections::BTreeMap;

    fn sample_result() -> AnalysisResult {
        AnalysisResult {
            status: Status::Success,
            request_id: "req-1".to_string(),
            analysis_id: "an-1".to_string(),
            time_windows: ResultWindows {
                n1: WindowLiteral { start: "2025-09-04 21:15:00".to_string(), end: "2025-09-04 21:30:00".to_string() },
                n: WindowLiteral { start: "2025-09-05 21:15:00".to_string(), end: "2025-09-05 21:30:00".to_string() },
            },
            records: vec![ComparisonRecord {
                peg_name: "A".to_string(),
                weight: 1,
                n1: AggregatedPeg::zeroed("A", WindowTag::NMinus1),
                n: AggregatedPeg::zeroed("A", WindowTag::N),
                change_abs: 10.0,
                change_pct: 10.0,
                trend: Trend::Up,
                significance: Significance::Medium,
                confidence: 0.85,
                cell_id: None,
                data_quality: DataQuality::High,
                derived: false,
            }],
            summary: SummaryStats { total: 1, improved: 1, declined: 0, stable: 0, weighted_avg_change: 10.0, overall_trend: OverallTrend::Up },
            llm: LlmAnalysis::default(),
            identifiers: AnalysisIdentifiers::unknown(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn falls_back_to_unknown_when_no_identifiers_available() {
        let result = sample_result();
        let payload = build(&result, None, &Filter::default());
        assert_eq!(payload.ne_id, "unknown");
        assert_eq!(payload.cell_id, "unknown");
        assert_eq!(payload.swname, "unknown");
    }

    #[test]
    fn filters_fill_in_when_aggregator_identifiers_absent() {
        let result = sample_result();
        let filters = Filter { ne: Some("nvgnb#1".to_string()), ..Default::default() };
        let payload = build(&result, None, &filters);
        assert_eq!(payload.ne_id, "nvgnb#1");
    }

    #[test]
    fn llm_analysis_is_never_null_shaped() {
        let result = sample_result();
        let payload = build(&result, None, &Filter::default());
        assert_eq!(payload.llm_analysis.summary, "");
        assert!(payload.llm_analysis.issues.is_empty());
    }
}
