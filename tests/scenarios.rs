//! End-to-end runs of the full pipeline against a fake store and the LLM
//! client's mock mode, covering the concrete scenarios the unit tests in
//! each module don't exercise together: a full request in, one
//! `AnalysisResult` out.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::FixedOffset;
use serde_json::json;

use peg_analysis::config::Config;
use peg_analysis::error::AnalysisError;
use peg_analysis::llm::client::LlmClient;
use peg_analysis::models::{DataQuality, Filter, RawSample, Significance, Status, TimeWindow, Trend};
use peg_analysis::prompt_templates::PromptTemplateStore;
use peg_analysis::store::{ColumnMap, PegStore};
use peg_analysis::AnalysisAssembler;

/// An in-memory store keyed by calendar day, so each of the two concurrent
/// fetches in a test gets the dataset meant for its window regardless of
/// which one resolves first.
struct FakePegStore {
    by_day: std::collections::BTreeMap<chrono::NaiveDate, Vec<RawSample>>,
}

impl FakePegStore {
    fn new(by_day: Vec<(chrono::NaiveDate, Vec<RawSample>)>) -> Self {
        Self { by_day: by_day.into_iter().collect() }
    }
}

#[async_trait]
impl PegStore for FakePegStore {
    async fn fetch(
        &self,
        window: &TimeWindow,
        _filters: &Filter,
        _table: &str,
        _columns: &ColumnMap,
    ) -> Result<Vec<RawSample>, AnalysisError> {
        Ok(self.by_day.get(&window.start.date_naive()).cloned().unwrap_or_default())
    }
}

fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

fn sample(date: &str, hh: u32, mm: u32, peg: &str, value: f64) -> RawSample {
    let naive = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(hh, mm, 0)
        .unwrap();
    let offset = jst();
    use chrono::TimeZone;
    RawSample {
        timestamp: offset.from_local_datetime(&naive).single().unwrap(),
        peg_name: peg.to_string(),
        value,
        ne_key: Some("nvgnb#10000".to_string()),
        host_name: Some("host01".to_string()),
        index_name: Some("idx_2010".to_string()),
    }
}

/// A well-formed `db` object so requests that exercise a real (here: fake)
/// store pass the validator's "db required unless enable_mock" rule without
/// also tripping `enable_mock`, which would route around the store entirely.
fn db_field() -> serde_json::Value {
    json!({ "host": "db.internal", "port": 5432, "dbname": "peg", "user": "svc", "password": "x" })
}

fn llm_mocked_config() -> Config {
    let mut config = Config::default();
    config.llm.mock = true;
    config.time.default_offset_minutes = 9 * 60;
    config
}

fn templates() -> Arc<PromptTemplateStore> {
    Arc::new(PromptTemplateStore::load("conf/prompt_templates.toml").expect("template doc present"))
}

async fn run_with_store(
    store: Option<Arc<dyn PegStore>>,
    request: serde_json::Value,
) -> peg_analysis::models::AnalysisResult {
    let config = Arc::new(llm_mocked_config());
    let llm = Arc::new(LlmClient::new());
    let assembler = AnalysisAssembler::new(store, llm, templates(), config);
    assembler.run(&request).await.expect("analysis should succeed")
}

#[tokio::test]
async fn canonical_happy_path() {
    let day1 = chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap();
    let day2 = chrono::NaiveDate::from_ymd_opt(2025, 9, 5).unwrap();
    let store: Arc<dyn PegStore> = Arc::new(FakePegStore::new(vec![
        (
            day1,
            vec![
                sample("2025-09-04", 21, 15, "A", 100.0),
                sample("2025-09-04", 21, 20, "A", 100.0),
                sample("2025-09-04", 21, 25, "A", 100.0),
                sample("2025-09-04", 21, 15, "B", 50.0),
                sample("2025-09-04", 21, 20, "B", 50.0),
                sample("2025-09-04", 21, 25, "B", 50.0),
            ],
        ),
        (
            day2,
            vec![
                sample("2025-09-05", 21, 15, "A", 110.0),
                sample("2025-09-05", 21, 20, "A", 110.0),
                sample("2025-09-05", 21, 25, "A", 110.0),
                sample("2025-09-05", 21, 15, "B", 50.0),
                sample("2025-09-05", 21, 20, "B", 50.0),
                sample("2025-09-05", 21, 25, "B", 50.0),
            ],
        ),
    ]));

    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-05_21:15~21:30",
        "selected_pegs": ["A", "B"],
        "peg_definitions": { "ratio": "A/B" },
        "db": db_field(),
    });

    let result = run_with_store(Some(store), request).await;
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.records.len(), 3);

    let a = result.records.iter().find(|r| r.peg_name == "A").unwrap();
    assert!((a.change_abs - 10.0).abs() < 1e-9);
    assert!((a.change_pct - 10.0).abs() < 1e-9);
    assert_eq!(a.trend, Trend::Up);
    assert_eq!(a.significance, Significance::Medium);

    let b = result.records.iter().find(|r| r.peg_name == "B").unwrap();
    assert_eq!(b.trend, Trend::Stable);
    assert_eq!(b.significance, Significance::Low);

    let ratio = result.records.iter().find(|r| r.peg_name == "ratio").unwrap();
    assert!((ratio.n1.avg - 2.0).abs() < 1e-9);
    assert!((ratio.n.avg - 2.2).abs() < 1e-9);
    assert!((ratio.change_pct - 10.0).abs() < 1e-9);
    assert_eq!(ratio.trend, Trend::Up);
    assert!(ratio.derived);
}

#[tokio::test]
async fn identifier_precedence_prefers_aggregated_over_request_filters() {
    let day = chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap();
    let store: Arc<dyn PegStore> =
        Arc::new(FakePegStore::new(vec![(day, vec![sample("2025-09-04", 21, 15, "A", 10.0)])]));

    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-04_21:15~21:30",
        "db": db_field(),
        "filters": { "ne": "should-not-win", "host": "should-not-win" },
    });

    let result = run_with_store(Some(store), request).await;
    assert_eq!(result.identifiers.ne_id, "nvgnb#10000");
    assert_eq!(result.identifiers.sw_name, "host01");
}

#[tokio::test]
async fn empty_window_zeroes_the_missing_side() {
    let day1 = chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap();
    let store: Arc<dyn PegStore> = Arc::new(FakePegStore::new(vec![(
        day1,
        vec![
            sample("2025-09-04", 21, 15, "A", 10.0),
            sample("2025-09-04", 21, 20, "A", 12.0),
            sample("2025-09-04", 21, 15, "B", 5.0),
        ],
    )]));

    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-05_21:15~21:30",
        "db": db_field(),
    });

    let result = run_with_store(Some(store), request).await;
    assert!(!result.records.is_empty());
    for record in &result.records {
        assert_eq!(record.n.avg, 0.0);
        assert_eq!(record.n.count, 0);
        assert_eq!(record.data_quality, DataQuality::Low);
    }
}

#[tokio::test]
async fn all_windows_empty_yields_zeroed_success_result() {
    let store: Arc<dyn PegStore> = Arc::new(FakePegStore::new(vec![]));
    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-05_21:15~21:30",
        "db": db_field(),
    });

    let result = run_with_store(Some(store), request).await;
    assert_eq!(result.status, Status::Success);
    assert!(result.records.is_empty());
    assert_eq!(result.summary.total, 0);
    assert_eq!(result.summary.improved, 0);
    assert_eq!(result.summary.declined, 0);
    assert_eq!(result.summary.stable, 0);
    assert_eq!(result.llm.summary, "Mock analysis: no LLM endpoint contacted.");
}

#[tokio::test]
async fn formula_referencing_unknown_peg_is_omitted_with_a_warning() {
    let day = chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap();
    let store: Arc<dyn PegStore> =
        Arc::new(FakePegStore::new(vec![(day, vec![sample("2025-09-04", 21, 15, "A", 10.0)])]));

    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-04_21:15~21:30",
        "peg_definitions": { "bad": "A/C" },
        "db": db_field(),
    });

    let result = run_with_store(Some(store), request).await;
    assert!(result.records.iter().all(|r| r.peg_name != "bad"));
    let warnings = result.metadata.get("warnings").expect("warnings recorded");
    let warnings = warnings.as_array().unwrap();
    assert!(warnings.iter().any(|w| w.as_str().unwrap().contains("unknown ref C")));
}

#[tokio::test]
async fn formula_syntax_error_is_omitted_not_fatal() {
    let day = chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap();
    let store: Arc<dyn PegStore> =
        Arc::new(FakePegStore::new(vec![(day, vec![sample("2025-09-04", 21, 15, "A", 10.0)])]));

    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-04_21:15~21:30",
        "peg_definitions": { "x": "__import__('os')" },
        "db": db_field(),
    });

    let result = run_with_store(Some(store), request).await;
    assert_eq!(result.status, Status::Success);
    assert!(result.records.iter().all(|r| r.peg_name != "x"));
}

#[tokio::test]
async fn mock_request_needs_no_configured_store() {
    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-05_21:15~21:30",
        "enable_mock": true,
    });
    let result = run_with_store(None, request).await;
    assert_eq!(result.status, Status::Success);
    assert!(result.records.is_empty());
}

#[tokio::test]
async fn real_store_request_without_enable_mock_fails_when_no_store_is_configured() {
    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-05_21:15~21:30",
        "db": db_field(),
    });
    let config = Arc::new(llm_mocked_config());
    let llm = Arc::new(LlmClient::new());
    let assembler = AnalysisAssembler::new(None, llm, templates(), config);
    let err = assembler.run(&request).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Internal(_)));
}

#[tokio::test]
async fn selected_pegs_restricts_specific_analysis_to_the_chosen_set() {
    let day = chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap();
    let store: Arc<dyn PegStore> = Arc::new(FakePegStore::new(vec![(
        day,
        vec![
            sample("2025-09-04", 21, 15, "A", 10.0),
            sample("2025-09-04", 21, 15, "B", 20.0),
            sample("2025-09-04", 21, 15, "C", 30.0),
        ],
    )]));

    let request = json!({
        "n_minus_1": "2025-09-04_21:15~21:30",
        "n": "2025-09-04_21:15~21:30",
        "analysis_type": "specific",
        "selected_pegs": ["A"],
        "db": db_field(),
    });

    let result = run_with_store(Some(store), request).await;
    let names: BTreeSet<&str> = result.records.iter().map(|r| r.peg_name.as_str()).collect();
    assert_eq!(names, BTreeSet::from(["A"]));
}
