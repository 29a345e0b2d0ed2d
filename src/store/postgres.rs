//! Postgres-backed `PegStore`. Builds one parameterized query per fetch:
//! column identifiers come from the whitelisted [`ColumnMap`]; every value
//! (time bounds, NE key, cell ids, PEG names, host) is bound through a
//! placeholder, never string-interpolated.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::error::AnalysisError;
use crate::models::{Filter, RawSample, TimeWindow};

use super::{is_safe_identifier, ColumnMap, PegStore};

pub struct PostgresPegStore {
    pool: PgPool,
    result_limit: u64,
    max_retries: u32,
    retry_delay: Duration,
}

impl PostgresPegStore {
    pub async fn connect(
        dsn: &str,
        pool_size: u32,
        result_limit: u64,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, AnalysisError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(dsn)
            .await
            .map_err(|e| AnalysisError::StoreFailure(format!("connecting: {e}")))?;
        Ok(Self { pool, result_limit, max_retries, retry_delay })
    }

    pub fn with_pool(pool: PgPool, result_limit: u64, max_retries: u32, retry_delay: Duration) -> Self {
        Self { pool, result_limit, max_retries, retry_delay }
    }

    fn build_query(
        &self,
        window: &TimeWindow,
        filters: &Filter,
        table: &str,
        columns: &ColumnMap,
    ) -> Result<(String, Vec<String>), AnalysisError> {
        for ident in [
            table,
            &columns.timestamp,
            &columns.peg_name,
            &columns.value,
            &columns.ne_key,
            &columns.host_name,
            &columns.index_name,
            &columns.cell_id,
        ] {
            if !is_safe_identifier(ident) {
                return Err(AnalysisError::Internal(format!("unsafe identifier in column map: '{ident}'")));
            }
        }

        let mut clauses = vec![format!("{} >= $1 AND {} <= $2", columns.timestamp, columns.timestamp)];
        let mut binds = vec![
            window.start.with_timezone(&Utc).to_rfc3339(),
            window.end.with_timezone(&Utc).to_rfc3339(),
        ];

        if let Some(ne) = &filters.ne {
            binds.push(ne.clone());
            clauses.push(format!("{} = ${}", columns.ne_key, binds.len()));
        }
        if !filters.cell_ids.is_empty() {
            let start = binds.len() + 1;
            let placeholders: Vec<String> =
                (0..filters.cell_ids.len()).map(|i| format!("${}", start + i)).collect();
            binds.extend(filters.cell_ids.iter().cloned());
            clauses.push(format!("{} IN ({})", columns.cell_id, placeholders.join(", ")));
        }
        if !filters.peg_names.is_empty() {
            let start = binds.len() + 1;
            let placeholders: Vec<String> =
                (0..filters.peg_names.len()).map(|i| format!("${}", start + i)).collect();
            binds.extend(filters.peg_names.iter().cloned());
            clauses.push(format!("{} IN ({})", columns.peg_name, placeholders.join(", ")));
        }
        if let Some(host) = &filters.host {
            binds.push(host.clone());
            clauses.push(format!("{} = ${}", columns.host_name, binds.len()));
        }

        let sql = format!(
            "SELECT {ts}, {peg}, {val}, {ne}, {host}, {idx} FROM {table} WHERE {where_clause} \
             ORDER BY {ts} ASC LIMIT {limit}",
            ts = columns.timestamp,
            peg = columns.peg_name,
            val = columns.value,
            ne = columns.ne_key,
            host = columns.host_name,
            idx = columns.index_name,
            table = table,
            where_clause = clauses.join(" AND "),
            limit = self.result_limit + 1,
        );

        Ok((sql, binds))
    }
}

#[async_trait]
impl PegStore for PostgresPegStore {
    async fn fetch(
        &self,
        window: &TimeWindow,
        filters: &Filter,
        table: &str,
        columns: &ColumnMap,
    ) -> Result<Vec<RawSample>, AnalysisError> {
        let (sql, binds) = self.build_query(window, filters, table, columns)?;

        let mut attempt = 0u32;
        let rows = loop {
            let mut query = sqlx::query(&sql);
            for b in &binds {
                query = query.bind(b);
            }
            match query.fetch_all(&self.pool).await {
                Ok(rows) => break rows,
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "peg store fetch failed transiently, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    continue;
                },
                Err(e) => return Err(AnalysisError::StoreFailure(e.to_string())),
            }
        };

        if rows.len() as u64 > self.result_limit {
            return Err(AnalysisError::StoreResultTooLarge { limit: self.result_limit });
        }

        rows.into_iter().map(row_to_sample).collect()
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed)
}

fn row_to_sample(row: sqlx::postgres::PgRow) -> Result<RawSample, AnalysisError> {
    let timestamp: DateTime<Utc> =
        row.try_get(0).map_err(|e| AnalysisError::StoreFailure(format!("decoding row: {e}")))?;
    let peg_name: String =
        row.try_get(1).map_err(|e| AnalysisError::StoreFailure(format!("decoding row: {e}")))?;
    let value: f64 = row.try_get(2).map_err(|e| AnalysisError::StoreFailure(format!("decoding row: {e}")))?;
    let ne_key: Option<String> =
        row.try_get(3).map_err(|e| AnalysisError::StoreFailure(format!("decoding row: {e}")))?;
    let host_name: Option<String> =
        row.try_get(4).map_err(|e| AnalysisError::StoreFailure(format!("decoding row: {e}")))?;
    let index_name: Option<String> =
        row.try_get(5).map_err(|e| AnalysisError::StoreFailure(format!("decoding row: {e}")))?;

    let offset: FixedOffset = FixedOffset::east_opt(0).unwrap();
    Ok(RawSample {
        timestamp: timestamp.with_timezone(&offset),
        peg_name,
        value,
        ne_key,
        host_name,
        index_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn window() -> TimeWindow {
        let off = FixedOffset::east_opt(9 * 3600).unwrap();
        TimeWindow::new(
            off.from_local_datetime_unchecked(chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap().and_hms_opt(21, 15, 0).unwrap()),
            off.from_local_datetime_unchecked(chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap().and_hms_opt(21, 30, 0).unwrap()),
        )
    }

    trait UncheckedFrom {
        fn from_local_datetime_unchecked(&self, naive: chrono::NaiveDateTime) -> DateTime<FixedOffset>;
    }
    impl UncheckedFrom for FixedOffset {
        fn from_local_datetime_unchecked(&self, naive: chrono::NaiveDateTime) -> DateTime<FixedOffset> {
            use chrono::TimeZone;
            self.from_local_datetime(&naive).single().unwrap()
        }
    }

    fn store() -> PostgresPegStore {
        // Never actually connected in these tests — only `build_query` is exercised.
        PostgresPegStore {
            pool: PgPool::connect_lazy("postgres://localhost/does-not-matter").unwrap(),
            result_limit: 1_000_000,
            max_retries: 2,
            retry_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn where_clause_orders_time_then_ne_then_cell_then_peg_then_host() {
        let s = store();
        let mut filters = Filter::default();
        filters.ne = Some("nvgnb#10000".to_string());
        filters.cell_ids = BTreeSet::from(["2010".to_string()]);
        filters.peg_names = BTreeSet::from(["A".to_string()]);
        filters.host = Some("host01".to_string());

        let (sql, binds) = s.build_query(&window(), &filters, "summary", &ColumnMap::default()).unwrap();
        let ne_pos = sql.find("ne =").unwrap();
        let cell_pos = sql.find("cellid IN").unwrap();
        let peg_pos = sql.find("peg_name IN").unwrap();
        let host_pos = sql.find("host =").unwrap();
        assert!(ne_pos < cell_pos);
        assert!(cell_pos < peg_pos);
        assert!(peg_pos < host_pos);
        assert_eq!(binds.len(), 6); // 2 time bounds + ne + cell_id + peg_name + host
    }

    #[tokio::test]
    async fn empty_in_lists_are_omitted() {
        let s = store();
        let filters = Filter::default();
        let (sql, binds) = s.build_query(&window(), &filters, "summary", &ColumnMap::default()).unwrap();
        assert!(!sql.contains("IN ()"));
        assert_eq!(binds.len(), 2);
    }

    #[tokio::test]
    async fn unsafe_table_identifier_rejected() {
        let s = store();
        let filters = Filter::default();
        let err = s.build_query(&window(), &filters, "summary; DROP TABLE x", &ColumnMap::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Internal(_)));
    }
}
