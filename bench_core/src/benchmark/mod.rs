//! Runs a set of SQL queries against a warehouse with a fixed level of
//! concurrency and records one [`QueryMetric`] per execution.
//!
//! A [`Benchmark`] is configured through setters, then
//! [`pre_warm_tables`](Benchmark::pre_warm_tables) loads tables into the
//! warehouse cache and [`execute`](Benchmark::execute) runs every query
//! `query_repeat_count` times.

pub mod metrics;
pub mod queries;

pub use metrics::{MetricsSink, QueryMetric};

use crate::config::ConfigError;
use crate::config::workspace::WorkspaceConfig;
use crate::workspace::statements::{StatementPolling, StatementRequest, StatementState};
use crate::workspace::{WorkspaceClient, WorkspaceError};
use queries::{Query, QueryFileFormat, QueryLoadError};
use snafu::{Location, OptionExt, ResultExt, Snafu};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum BenchmarkError {
    #[snafu(display("Benchmark is missing its {setting}"))]
    NotConfigured {
        setting: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Invalid benchmark connection settings"))]
    Connection {
        source: ConfigError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to load queries"))]
    Queries {
        source: QueryLoadError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Warehouse call failed"))]
    Workspace {
        source: WorkspaceError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Benchmark task failed"))]
    Task {
        source: tokio::task::JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to write {}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone)]
enum QuerySource {
    Dir(PathBuf),
    File(PathBuf),
}

/// Extracts the warehouse id from an HTTP path such as
/// `/sql/1.0/warehouses/abc123`. A bare id is returned unchanged.
pub fn warehouse_id_from_http_path(http_path: &str) -> &str {
    http_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(http_path)
}

#[derive(Debug, Clone)]
pub struct Benchmark {
    name: String,
    hostname: Option<String>,
    warehouse_id: Option<String>,
    warehouse_name: Option<String>,
    token: Option<String>,
    concurrency: usize,
    catalog: Option<String>,
    schema: Option<String>,
    query_source: Option<QuerySource>,
    query_file_format: QueryFileFormat,
    filter_comment_lines: bool,
    query_repeat_count: usize,
    polling: StatementPolling,
    base: Option<WorkspaceConfig>,
}

impl Default for Benchmark {
    fn default() -> Self {
        Self {
            name: "benchmark".to_string(),
            hostname: None,
            warehouse_id: None,
            warehouse_name: None,
            token: None,
            concurrency: 1,
            catalog: None,
            schema: None,
            query_source: None,
            query_file_format: QueryFileFormat::default(),
            filter_comment_lines: false,
            query_repeat_count: 1,
            polling: StatementPolling::default(),
            base: None,
        }
    }
}

impl Benchmark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing workspace configuration so retry and wait
    /// policies carry over; hostname and token setters still override it.
    pub fn with_workspace(config: &WorkspaceConfig) -> Self {
        Self {
            hostname: Some(config.host.clone()),
            token: Some(config.token.clone()),
            base: Some(config.clone()),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn set_hostname(&mut self, hostname: impl Into<String>) -> &mut Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Accepts a warehouse HTTP path or a bare warehouse id.
    pub fn set_warehouse(&mut self, http_path: &str) -> &mut Self {
        self.warehouse_id = Some(warehouse_id_from_http_path(http_path).to_string());
        self
    }

    /// Name recorded on every result row.
    pub fn set_warehouse_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.warehouse_name = Some(name.into());
        self
    }

    pub fn set_concurrency(&mut self, concurrency: usize) -> &mut Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn set_warehouse_token(&mut self, token: impl Into<String>) -> &mut Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_catalog(&mut self, catalog: impl Into<String>) -> &mut Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn set_schema(&mut self, schema: impl Into<String>) -> &mut Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn set_query_file_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.query_source = Some(QuerySource::Dir(dir.into()));
        self
    }

    pub fn set_query_file(&mut self, file: impl Into<PathBuf>) -> &mut Self {
        self.query_source = Some(QuerySource::File(file.into()));
        self
    }

    pub fn set_query_file_format(&mut self, format: QueryFileFormat) -> &mut Self {
        self.query_file_format = format;
        self
    }

    /// Drops `--` comment lines when splitting a semicolon-delimited file.
    pub fn set_filter_comment_lines(&mut self, filter: bool) -> &mut Self {
        self.filter_comment_lines = filter;
        self
    }

    pub fn set_query_repeat_count(&mut self, count: usize) -> &mut Self {
        self.query_repeat_count = count.max(1);
        self
    }

    fn client(&self) -> Result<WorkspaceClient, BenchmarkError> {
        let hostname = self
            .hostname
            .as_deref()
            .context(NotConfiguredSnafu { setting: "hostname" })?;
        let token = self
            .token
            .clone()
            .context(NotConfiguredSnafu { setting: "token" })?;
        let mut config = WorkspaceConfig::new(hostname, token).context(ConnectionSnafu)?;
        if let Some(base) = &self.base {
            config.cloud = base.cloud;
            config.retry = base.retry.clone();
            config.wait = base.wait.clone();
        }
        Ok(WorkspaceClient::new(config))
    }

    fn warehouse_id(&self) -> Result<String, BenchmarkError> {
        self.warehouse_id
            .clone()
            .context(NotConfiguredSnafu { setting: "warehouse" })
    }

    pub fn load_queries(&self) -> Result<Vec<Query>, BenchmarkError> {
        let source = self
            .query_source
            .as_ref()
            .context(NotConfiguredSnafu { setting: "query source" })?;
        let loaded = match source {
            QuerySource::Dir(dir) => queries::load_query_dir(dir),
            QuerySource::File(file) => {
                queries::load_query_file(file, self.query_file_format, self.filter_comment_lines)
            }
        };
        loaded.context(QueriesSnafu)
    }

    fn request(&self, sql: &str, warehouse_id: &str) -> StatementRequest {
        StatementRequest::new(sql, warehouse_id)
            .in_schema(self.catalog.clone(), self.schema.clone())
    }

    /// Issues `CACHE SELECT * FROM <table>` for every table, `concurrency` at
    /// a time. Any failure aborts the warm-up.
    #[tracing::instrument(skip(self, tables), fields(name = %self.name, tables = tables.len()))]
    pub async fn pre_warm_tables<S: AsRef<str>>(&self, tables: &[S]) -> Result<(), BenchmarkError> {
        let client = self.client()?;
        let warehouse_id = self.warehouse_id()?;
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for table in tables {
            let table = table.as_ref().to_string();
            let request = self.request(&format!("CACHE SELECT * FROM {table}"), &warehouse_id);
            let client = client.clone();
            let polling = self.polling.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                client
                    .execute_statement_checked(&request, &polling)
                    .await
                    .map(|_| table)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let table = joined.context(TaskSnafu)?.context(WorkspaceSnafu)?;
            tracing::debug!(table = %table, "table cached");
        }
        tracing::info!("pre-warmed tables");
        Ok(())
    }

    /// Runs every query `query_repeat_count` times with at most
    /// `concurrency` statements in flight. A failing execution becomes a row
    /// carrying its error; it does not stop the run. Rows are ordered by
    /// query, then iteration.
    #[tracing::instrument(skip(self), fields(name = %self.name))]
    pub async fn execute(&self) -> Result<Vec<QueryMetric>, BenchmarkError> {
        let queries = self.load_queries()?;
        let client = self.client()?;
        let warehouse_id = self.warehouse_id()?;
        let run_id = uuid::Uuid::new_v4();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        tracing::info!(
            %run_id,
            queries = queries.len(),
            repetitions = self.query_repeat_count,
            concurrency = self.concurrency,
            "starting benchmark"
        );

        for (position, query) in queries.into_iter().enumerate() {
            let request = self.request(&query.sql, &warehouse_id).external_links();
            for iteration in 1..=self.query_repeat_count {
                let client = client.clone();
                let polling = self.polling.clone();
                let permits = permits.clone();
                let request = request.clone();
                let id = query.id.clone();
                let warehouse_name = self.warehouse_name.clone();
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    let mut metric =
                        run_once(&client, &request, &polling, run_id, id, iteration).await;
                    metric.warehouse_name = warehouse_name;
                    (position, metric)
                });
            }
        }

        let mut rows = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            rows.push(joined.context(TaskSnafu)?);
        }
        rows.sort_by_key(|(position, metric)| (*position, metric.iteration));

        let rows: Vec<QueryMetric> = rows.into_iter().map(|(_, metric)| metric).collect();
        let failed = rows.iter().filter(|r| !r.succeeded()).count();
        if failed > 0 {
            tracing::warn!(failed, total = rows.len(), "some query executions failed");
        }
        Ok(rows)
    }
}

async fn run_once(
    client: &WorkspaceClient,
    request: &StatementRequest,
    polling: &StatementPolling,
    run_id: uuid::Uuid,
    id: String,
    iteration: usize,
) -> QueryMetric {
    let start_time = chrono::Utc::now();
    let started = Instant::now();
    let result = client.execute_statement(request, polling).await;
    let elapsed_time_s = started.elapsed().as_secs_f64();

    let (statement_id, state, row_count, error) = match result {
        Ok(response) if response.status.state == StatementState::Succeeded => (
            Some(response.statement_id.clone()),
            response.status.state.to_string(),
            response.row_count(),
            None,
        ),
        Ok(response) => (
            Some(response.statement_id.clone()),
            response.status.state.to_string(),
            None,
            Some(response.error_message()),
        ),
        Err(e) => (
            None,
            "ERROR".to_string(),
            None,
            Some(snafu::Report::from_error(e).to_string()),
        ),
    };
    tracing::debug!(query = %id, iteration, state = %state, elapsed_time_s, "query finished");

    QueryMetric {
        run_id,
        warehouse_name: None,
        id,
        query: request.statement.clone(),
        iteration,
        statement_id,
        state,
        elapsed_time_s,
        row_count,
        start_time,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("/sql/1.0/warehouses/abc123", "abc123"; "http path")]
    #[test_case("/sql/1.0/warehouses/abc123/", "abc123"; "trailing slash")]
    #[test_case("abc123", "abc123"; "bare id")]
    fn should_extract_warehouse_id(http_path: &str, expected: &str) {
        assert_eq!(warehouse_id_from_http_path(http_path), expected);
    }

    #[tokio::test]
    async fn should_require_query_source_before_executing() {
        // Given a benchmark with connection settings but no queries
        let mut benchmark = Benchmark::new();
        benchmark
            .set_hostname("https://dbc-1.cloud.databricks.com")
            .set_warehouse_token("token")
            .set_warehouse("/sql/1.0/warehouses/wh");

        // When
        let result = benchmark.execute().await;

        // Then
        assert!(matches!(
            result,
            Err(BenchmarkError::NotConfigured {
                setting: "query source",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn should_require_warehouse_before_pre_warming() {
        let mut benchmark = Benchmark::new();
        benchmark
            .set_hostname("https://dbc-1.cloud.databricks.com")
            .set_warehouse_token("token");

        let result = benchmark.pre_warm_tables(&["s.t"][..]).await;

        assert!(matches!(
            result,
            Err(BenchmarkError::NotConfigured {
                setting: "warehouse",
                ..
            })
        ));
    }

    #[test]
    fn should_clamp_counts_to_one() {
        let mut benchmark = Benchmark::new();
        benchmark.set_concurrency(0).set_query_repeat_count(0);

        assert_eq!(benchmark.concurrency, 1);
        assert_eq!(benchmark.query_repeat_count, 1);
    }
}
