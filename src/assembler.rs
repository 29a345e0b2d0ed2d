//! Top-level orchestrator: drives validation, time parsing, the two
//! concurrent PEG store fetches, aggregation, derived-PEG evaluation,
//! classification, prompt rendering, the LLM call, and identifier
//! resolution into one `AnalysisResult`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::FixedOffset;

use crate::aggregator;
use crate::config::Config;
use crate::derived;
use crate::error::AnalysisError;
use crate::llm::{parse_llm_analysis, LlmClient, LlmOptions};
use crate::models::{
    format_literal, AggregatedPeg, AnalysisIdentifiers, AnalysisResult, AnalysisType, ComparisonRecord,
    DataQuality, LlmAnalysis, OverallTrend, PartialIdentifiers, ResultWindows, Significance, Status,
    SummaryStats, Trend, ValidatedRequest, WindowLiteral, WindowTag,
};
use crate::prompt_templates::{PromptTemplateStore, FALLBACK_PROMPT};
use crate::store::{ColumnMap, MockPegStore, PegStore};
use crate::time_range;
use crate::validator;

pub struct AnalysisAssembler {
    /// `None` when the process started with no `database.url` configured.
    /// Any request that doesn't set `enable_mock` then fails fast rather
    /// than silently falling back to the mock store.
    store: Option<Arc<dyn PegStore>>,
    llm: Arc<LlmClient>,
    templates: Arc<PromptTemplateStore>,
    config: Arc<Config>,
}

impl AnalysisAssembler {
    pub fn new(
        store: Option<Arc<dyn PegStore>>,
        llm: Arc<LlmClient>,
        templates: Arc<PromptTemplateStore>,
        config: Arc<Config>,
    ) -> Self {
        Self { store, llm, templates, config }
    }

    pub async fn run(&self, request: &serde_json::Value) -> Result<AnalysisResult, AnalysisError> {
        tracing::info!("analysis request received");

        let validated = validator::validate(request)?;

        let offset = FixedOffset::east_opt(self.config.time.default_offset_minutes * 60)
            .ok_or_else(|| AnalysisError::Internal("invalid configured default_offset_minutes".to_string()))?;
        let window_n1 = time_range::parse_any(&validated.n_minus_1, offset)?;
        let window_n = time_range::parse_any(&validated.n, offset)?;

        let mut columns = ColumnMap::default();
        apply_column_overrides(&mut columns, &validated.columns);
        let table = validated.table.clone();

        let active_store: Arc<dyn PegStore> = if validated.enable_mock {
            Arc::new(MockPegStore)
        } else {
            self.store.clone().ok_or_else(|| {
                AnalysisError::Internal("no relational store configured and request did not set enable_mock".to_string())
            })?
        };

        let (rows_n1, rows_n) = tokio::try_join!(
            active_store.fetch(&window_n1, &validated.filters, &table, &columns),
            active_store.fetch(&window_n, &validated.filters, &table, &columns),
        )?;

        let (aggregated_n1, identifiers_n1) = aggregator::aggregate(&rows_n1, WindowTag::NMinus1);
        let (aggregated_n, identifiers_n) = aggregator::aggregate(&rows_n, WindowTag::N);
        let identifiers = prefer_non_empty(identifiers_n1, identifiers_n);

        let (derived_n1, warnings_n1) = derived::evaluate(&aggregated_n1, &validated.peg_definitions, WindowTag::NMinus1);
        let (derived_n, warnings_n) = derived::evaluate(&aggregated_n, &validated.peg_definitions, WindowTag::N);

        let mut warnings: Vec<String> = Vec::new();
        warnings.extend(warnings_n1);
        warnings.extend(warnings_n);

        let mut all_n1: BTreeMap<String, AggregatedPeg> =
            aggregated_n1.into_iter().map(|p| (p.peg_name.clone(), p)).collect();
        for p in derived_n1 {
            all_n1.insert(p.peg_name.clone(), p);
        }
        let mut all_n: BTreeMap<String, AggregatedPeg> =
            aggregated_n.into_iter().map(|p| (p.peg_name.clone(), p)).collect();
        for p in derived_n {
            all_n.insert(p.peg_name.clone(), p);
        }

        let derived_names: std::collections::BTreeSet<&str> =
            validated.peg_definitions.iter().map(|f| f.name.as_str()).collect();

        let mut peg_names: std::collections::BTreeSet<String> =
            all_n1.keys().chain(all_n.keys()).cloned().collect();
        if !validated.selected_pegs.is_empty() && validated.analysis_type == AnalysisType::Specific {
            peg_names.retain(|name| validated.selected_pegs.contains(name) || derived_names.contains(name.as_str()));
        }

        let mut records: Vec<ComparisonRecord> = peg_names
            .into_iter()
            .map(|peg_name| {
                let is_derived = derived_names.contains(peg_name.as_str());
                let n1 = all_n1.get(&peg_name).cloned().unwrap_or_else(|| AggregatedPeg::zeroed(&peg_name, WindowTag::NMinus1));
                let n = all_n.get(&peg_name).cloned().unwrap_or_else(|| AggregatedPeg::zeroed(&peg_name, WindowTag::N));
                build_record(&self.config, peg_name, n1, n, is_derived)
            })
            .collect();

        records.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.peg_name.cmp(&b.peg_name)));

        let summary = compute_summary(&records, &self.config);

        let prompt_type = validated.analysis_type.as_str();
        let prompt_vars = build_prompt_vars(&window_n1, &window_n, &records, self.config.prompt.preview_rows);
        let prompt = match self.templates.render(prompt_type, &prompt_vars) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "prompt render failed, using fallback prompt");
                warnings.push(format!("prompt render failed: {e}"));
                FALLBACK_PROMPT.to_string()
            },
        };

        let llm_opts = LlmOptions {
            endpoints: self.config.llm.endpoints.clone(),
            model: self.config.llm.model.clone(),
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens,
            timeout_secs: self.config.llm.timeout_secs,
            max_retries: self.config.llm.max_retries,
            backoff_base: self.config.llm.backoff_base,
            max_prompt_chars: self.config.llm.max_prompt_chars,
            truncate_buffer: self.config.llm.truncate_buffer,
            mock: self.config.llm.mock || validated.enable_mock,
        };

        let mut metadata: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let (llm_analysis, llm_failed) = self.invoke_llm(&prompt, &llm_opts).await?;
        if llm_failed {
            metadata.insert("llm_parse_failed".to_string(), serde_json::Value::Bool(true));
        }
        if !warnings.is_empty() {
            metadata.insert("warnings".to_string(), serde_json::json!(warnings));
        }
        if let Some(choi) = &validated.choi_result {
            metadata.insert("choi_result".to_string(), choi.clone());
        }

        let identifiers = resolve_identifiers(identifiers, &validated);

        Ok(AnalysisResult {
            status: Status::Success,
            request_id: uuid::Uuid::new_v4().to_string(),
            analysis_id: uuid::Uuid::new_v4().to_string(),
            time_windows: ResultWindows {
                n1: WindowLiteral { start: format_literal(window_n1.start), end: format_literal(window_n1.end) },
                n: WindowLiteral { start: format_literal(window_n.start), end: format_literal(window_n.end) },
            },
            records,
            summary,
            llm: llm_analysis,
            identifiers,
            metadata,
        })
    }

    async fn invoke_llm(&self, prompt: &str, opts: &LlmOptions) -> Result<(LlmAnalysis, bool), AnalysisError> {
        let text = self.llm.complete(prompt, opts).await?;
        if let Some(analysis) = parse_llm_analysis(&text) {
            return Ok((analysis, false));
        }

        tracing::warn!("LLM response was not valid JSON, retrying with a stricter instruction");
        let stricter = format!("{prompt}\n\nReturn JSON only, with no surrounding prose or code fences.");
        let retry_text = self.llm.complete(&stricter, opts).await?;
        match parse_llm_analysis(&retry_text) {
            Some(analysis) => Ok((analysis, false)),
            None => Ok((LlmAnalysis::default(), true)),
        }
    }
}

fn apply_column_overrides(columns: &mut ColumnMap, overrides: &BTreeMap<String, String>) {
    for (logical, physical) in overrides {
        match logical.as_str() {
            "timestamp" => columns.timestamp = physical.clone(),
            "peg_name" => columns.peg_name = physical.clone(),
            "value" => columns.value = physical.clone(),
            "ne_key" => columns.ne_key = physical.clone(),
            "host_name" => columns.host_name = physical.clone(),
            "index_name" => columns.index_name = physical.clone(),
            "cell_id" => columns.cell_id = physical.clone(),
            other => tracing::warn!(logical = other, "ignoring unrecognized logical column name"),
        }
    }
}

fn prefer_non_empty(n1: PartialIdentifiers, n: PartialIdentifiers) -> PartialIdentifiers {
    if n1.ne_id.is_some() || n1.sw_name.is_some() || n1.cell_id.is_some() {
        n1
    } else {
        n
    }
}

fn build_record(config: &Config, peg_name: String, n1: AggregatedPeg, n: AggregatedPeg, derived: bool) -> ComparisonRecord {
    let change_abs = n.avg - n1.avg;
    let change_pct = if n1.avg != 0.0 { 100.0 * change_abs / n1.avg } else { 0.0 };
    let trend = classify_trend(change_pct, &config.thresholds);
    let significance = classify_significance(change_pct, &config.thresholds);

    let confidence = if n1.count >= 2 && n.count >= 2 { 0.85 } else { 0.5 };
    let data_quality = if n1.count >= 3 && n.count >= 3 {
        DataQuality::High
    } else if n1.count >= 1 && n.count >= 1 {
        DataQuality::Medium
    } else {
        DataQuality::Low
    };

    ComparisonRecord {
        peg_name,
        weight: 1,
        n1,
        n,
        change_abs,
        change_pct,
        trend,
        significance,
        confidence,
        cell_id: None,
        data_quality,
        derived,
    }
}

fn classify_trend(change_pct: f64, thresholds: &crate::config::ThresholdConfig) -> Trend {
    if change_pct.abs() < thresholds.stable_pct {
        Trend::Stable
    } else if change_pct > 0.0 {
        Trend::Up
    } else {
        Trend::Down
    }
}

fn classify_significance(change_pct: f64, thresholds: &crate::config::ThresholdConfig) -> Significance {
    let magnitude = change_pct.abs();
    if magnitude >= thresholds.high_pct {
        Significance::High
    } else if magnitude >= thresholds.medium_pct {
        Significance::Medium
    } else {
        Significance::Low
    }
}

fn compute_summary(records: &[ComparisonRecord], config: &Config) -> SummaryStats {
    let total = records.len() as u64;
    let improved = records.iter().filter(|r| matches!(r.trend, Trend::Up)).count() as u64;
    let declined = records.iter().filter(|r| matches!(r.trend, Trend::Down)).count() as u64;
    let stable = records.iter().filter(|r| matches!(r.trend, Trend::Stable)).count() as u64;

    let weight_sum: i64 = records.iter().map(|r| r.weight).sum();
    let weighted_avg_change = if weight_sum > 0 {
        records.iter().map(|r| r.weight as f64 * r.change_pct).sum::<f64>() / weight_sum as f64
    } else {
        0.0
    };
    let overall_trend = match classify_trend(weighted_avg_change, &config.thresholds) {
        Trend::Up => OverallTrend::Up,
        Trend::Down => OverallTrend::Down,
        Trend::Stable => OverallTrend::Stable,
    };

    SummaryStats { total, improved, declined, stable, weighted_avg_change, overall_trend }
}

fn build_prompt_vars(
    window_n1: &crate::models::TimeWindow,
    window_n: &crate::models::TimeWindow,
    records: &[ComparisonRecord],
    preview_rows: usize,
) -> std::collections::HashMap<String, String> {
    let mut vars = std::collections::HashMap::new();
    vars.insert(
        "window_n1".to_string(),
        format!("{}~{}", crate::models::format_literal(window_n1.start), crate::models::format_literal(window_n1.end)),
    );
    vars.insert(
        "window_n".to_string(),
        format!("{}~{}", crate::models::format_literal(window_n.start), crate::models::format_literal(window_n.end)),
    );
    vars.insert("data_preview".to_string(), render_preview_table(records, preview_rows));
    vars.insert("peg_name".to_string(), records.first().map(|r| r.peg_name.clone()).unwrap_or_default());
    vars
}

fn render_preview_table(records: &[ComparisonRecord], limit: usize) -> String {
    let mut out = String::from("peg_name | n1.avg | n.avg | change_pct | trend\n");
    for record in records.iter().take(limit) {
        out.push_str(&format!(
            "{} | {:.2} | {:.2} | {:.2} | {:?}\n",
            record.peg_name, record.n1.avg, record.n.avg, record.change_pct, record.trend
        ));
    }
    out
}

fn resolve_identifiers(partial: PartialIdentifiers, request: &ValidatedRequest) -> AnalysisIdentifiers {
    const UNKNOWN: &str = "unknown";
    AnalysisIdentifiers {
        ne_id: partial.ne_id.or_else(|| request.filters.ne.clone()).unwrap_or_else(|| UNKNOWN.to_string()),
        cell_id: partial
            .cell_id
            .or_else(|| request.filters.cell_ids.iter().next().cloned())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        sw_name: partial.sw_name.or_else(|| request.filters.host.clone()).unwrap_or_else(|| UNKNOWN.to_string()),
    }
}
