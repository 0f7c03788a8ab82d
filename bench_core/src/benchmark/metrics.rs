//! Per-query result rows and where they end up.

use crate::benchmark::{BenchmarkError, IoSnafu, WorkspaceSnafu};
use crate::workspace::WorkspaceClient;
use crate::workspace::statements::{StatementPolling, StatementRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::ResultExt;
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

/// Rows per INSERT statement.
const INSERT_BATCH_SIZE: usize = 25;

const TABLE_COLUMNS: &str = "run_id STRING, warehouse_name STRING, query_id STRING, query STRING, iteration INT, \
statement_id STRING, state STRING, elapsed_time_s DOUBLE, row_count BIGINT, \
start_time TIMESTAMP, error STRING";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetric {
    pub run_id: Uuid,
    /// Set when the run names its warehouse, so rows from several
    /// warehouses can share one table.
    pub warehouse_name: Option<String>,
    pub id: String,
    pub query: String,
    pub iteration: usize,
    pub statement_id: Option<String>,
    pub state: String,
    pub elapsed_time_s: f64,
    pub row_count: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub error: Option<String>,
}

impl QueryMetric {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A destination that replaces its previous content on every save.
#[allow(async_fn_in_trait)]
pub trait MetricsSink {
    /// Writes `rows` to `destination`, replacing what was there, and returns
    /// where they landed.
    async fn save_overwrite(
        &self,
        destination: &str,
        rows: &[QueryMetric],
    ) -> Result<String, BenchmarkError>;
}

/// Writes rows into a warehouse table through the statement API.
pub struct TableSink {
    client: WorkspaceClient,
    warehouse_id: String,
    polling: StatementPolling,
}

impl TableSink {
    pub fn new(client: WorkspaceClient, warehouse_id: impl Into<String>) -> Self {
        Self {
            client,
            warehouse_id: warehouse_id.into(),
            polling: StatementPolling::default(),
        }
    }

    async fn run(&self, sql: String) -> Result<(), BenchmarkError> {
        let request = StatementRequest::new(sql, self.warehouse_id.clone());
        self.client
            .execute_statement_checked(&request, &self.polling)
            .await
            .context(WorkspaceSnafu)?;
        Ok(())
    }
}

impl MetricsSink for TableSink {
    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn save_overwrite(
        &self,
        destination: &str,
        rows: &[QueryMetric],
    ) -> Result<String, BenchmarkError> {
        self.run(format!("CREATE OR REPLACE TABLE {destination} ({TABLE_COLUMNS})"))
            .await?;
        for batch in rows.chunks(INSERT_BATCH_SIZE) {
            self.run(insert_statement(destination, batch)).await?;
        }
        tracing::info!(table = destination, "saved benchmark metrics");
        Ok(destination.to_string())
    }
}

/// Writes rows as `<dir>/<destination>.csv`.
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MetricsSink for CsvSink {
    async fn save_overwrite(
        &self,
        destination: &str,
        rows: &[QueryMetric],
    ) -> Result<String, BenchmarkError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context(IoSnafu {
                path: self.dir.clone(),
            })?;
        let filename = self.dir.join(format!("{destination}.csv"));
        tokio::fs::write(&filename, to_csv(rows))
            .await
            .context(IoSnafu {
                path: filename.clone(),
            })?;
        Ok(filename.display().to_string())
    }
}

/// Single-quoted SQL literal with backslash escapes.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn sql_optional(value: Option<&str>) -> String {
    value.map(sql_literal).unwrap_or_else(|| "NULL".to_string())
}

pub fn insert_statement(table: &str, rows: &[QueryMetric]) -> String {
    let values = rows
        .iter()
        .map(|row| {
            format!(
                "({}, {}, {}, {}, {}, {}, {}, {}, {}, TIMESTAMP {}, {})",
                sql_literal(&row.run_id.to_string()),
                sql_optional(row.warehouse_name.as_deref()),
                sql_literal(&row.id),
                sql_literal(&row.query),
                row.iteration,
                sql_optional(row.statement_id.as_deref()),
                sql_literal(&row.state),
                row.elapsed_time_s,
                row.row_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "NULL".to_string()),
                sql_literal(&row.start_time.to_rfc3339()),
                sql_optional(row.error.as_deref()),
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!("INSERT INTO {table} VALUES\n{values}")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_csv(rows: &[QueryMetric]) -> String {
    let mut out = String::from(
        "run_id,warehouse_name,query_id,iteration,statement_id,state,elapsed_time_s,row_count,start_time,error,query\n",
    );
    for row in rows {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{:.6},{},{},{},{}",
            row.run_id,
            csv_field(row.warehouse_name.as_deref().unwrap_or_default()),
            csv_field(&row.id),
            row.iteration,
            row.statement_id.as_deref().unwrap_or_default(),
            row.state,
            row.elapsed_time_s,
            row.row_count.map(|c| c.to_string()).unwrap_or_default(),
            row.start_time.to_rfc3339(),
            csv_field(row.error.as_deref().unwrap_or_default()),
            csv_field(&row.query),
        );
    }
    out
}

/// `queries * repetitions` executions over `duration_s` seconds, per minute.
pub fn throughput_per_minute(queries: usize, repetitions: usize, duration_s: f64) -> f64 {
    (queries * repetitions) as f64 / (duration_s / 60.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub median_s: f64,
    pub min_s: f64,
    pub max_s: f64,
}

/// Elapsed-time statistics over the successful rows; `None` when there are none.
pub fn summarize(rows: &[QueryMetric]) -> Option<Summary> {
    let mut times: Vec<f64> = rows
        .iter()
        .filter(|r| r.succeeded())
        .map(|r| r.elapsed_time_s)
        .collect();
    if times.is_empty() {
        return None;
    }
    times.sort_by(f64::total_cmp);

    let mid = times.len() / 2;
    let median_s = if times.len() % 2 == 0 {
        (times[mid - 1] + times[mid]) / 2.0
    } else {
        times[mid]
    };
    Some(Summary {
        succeeded: times.len(),
        failed: rows.len() - times.len(),
        median_s,
        min_s: times[0],
        max_s: times[times.len() - 1],
    })
}

pub fn print_statistics(rows: &[QueryMetric]) {
    let Some(summary) = summarize(rows) else {
        println!("\nSummary: no successful queries out of {}", rows.len());
        return;
    };
    println!("\nSummary:");
    println!(
        "  Queries: succeeded={}  failed={}",
        summary.succeeded, summary.failed
    );
    println!(
        "  Elapsed: median={:.3}s  min={:.3}s  max={:.3}s",
        summary.median_s, summary.min_s, summary.max_s
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metric(id: &str, elapsed: f64, error: Option<&str>) -> QueryMetric {
        QueryMetric {
            run_id: Uuid::nil(),
            warehouse_name: None,
            id: id.to_string(),
            query: "select 'a', 1".to_string(),
            iteration: 1,
            statement_id: Some("st-1".to_string()),
            state: if error.is_some() { "FAILED" } else { "SUCCEEDED" }.to_string(),
            elapsed_time_s: elapsed,
            row_count: Some(1),
            start_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn should_compute_throughput() {
        assert_eq!(throughput_per_minute(10, 3, 60.0), 30.0);
        assert_eq!(throughput_per_minute(99, 1, 30.0), 198.0);
    }

    #[test]
    fn should_summarize_successful_rows_only() {
        let rows = vec![
            metric("q1", 4.0, None),
            metric("q2", 1.0, None),
            metric("q3", 100.0, Some("boom")),
            metric("q4", 2.0, None),
            metric("q5", 3.0, None),
        ];

        let summary = summarize(&rows).unwrap();

        assert_eq!(
            summary,
            Summary {
                succeeded: 4,
                failed: 1,
                median_s: 2.5,
                min_s: 1.0,
                max_s: 4.0
            }
        );
        assert!(summarize(&[metric("q", 1.0, Some("x"))]).is_none());
    }

    #[test]
    fn should_escape_sql_literals() {
        assert_eq!(sql_literal("it's"), "'it\\'s'");
        assert_eq!(sql_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn should_build_insert_with_nulls() {
        let mut row = metric("q1", 1.5, None);
        row.row_count = None;
        row.statement_id = None;

        let sql = insert_statement("c.s.t", &[row]);

        assert!(sql.starts_with("INSERT INTO c.s.t VALUES\n('00000000-0000-0000-0000-000000000000', NULL, 'q1', "));
        assert!(sql.contains("'select \\'a\\', 1', 1, NULL, 'SUCCEEDED', 1.5, NULL, TIMESTAMP '2024-05-01T12:00:00+00:00', NULL)"));
    }

    #[test]
    fn should_tag_rows_with_warehouse_name() {
        let mut row = metric("q1", 1.0, None);
        row.warehouse_name = Some("bench Pro Small".to_string());

        let sql = insert_statement("c.s.t", std::slice::from_ref(&row));
        let csv = to_csv(&[row]);

        assert!(sql.contains("-000000000000', 'bench Pro Small', 'q1', "));
        assert!(csv.lines().nth(1).unwrap().contains(",bench Pro Small,q1,"));
    }

    #[test]
    fn should_quote_csv_fields() {
        let csv = to_csv(&[metric("q1", 1.0, Some("bad \"token\""))]);

        let line = csv.lines().nth(1).unwrap();
        assert!(line.contains(",\"bad \"\"token\"\"\","));
        assert!(line.ends_with(",\"select 'a', 1\""));
    }

    #[tokio::test]
    async fn should_overwrite_csv_file() {
        // Given
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("results"));
        sink.save_overwrite("run", &[metric("old", 1.0, None)])
            .await
            .unwrap();

        // When
        let path = sink
            .save_overwrite("run", &[metric("new", 2.0, None)])
            .await
            .unwrap();

        // Then
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains(",new,"));
    }
}
