//! The benchmark run executed inside the job: warm each warehouse, run the
//! queries, persist the metrics and report throughput.

use crate::benchmark::metrics::{
    CsvSink, MetricsSink, TableSink, print_statistics, throughput_per_minute,
};
use crate::benchmark::queries::count_sql_files;
use crate::benchmark::{Benchmark, BenchmarkError, QueriesSnafu, QueryMetric};
use crate::config::ConfigError;
use crate::config::run_parameters::{RunParameters, TargetWarehouse};
use crate::config::settings::Settings;
use crate::workspace::history::{HistoryQuery, QueryInfo};
use crate::workspace::statements::{StatementPolling, StatementRequest};
use crate::workspace::{WorkspaceClient, WorkspaceError};
use snafu::{Location, ResultExt, Snafu};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};

pub const TOKEN_COMMENT: &str = "temp use";
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

const HISTORY_MAX_RESULTS: u32 = 1000;
const HISTORY_POLL_INTERVAL: Duration = Duration::from_secs(5);
const HISTORY_MAX_POLLS: u32 = 3;

pub const TPCDS_TABLES: [&str; 24] = [
    "call_center",
    "catalog_page",
    "catalog_returns",
    "catalog_sales",
    "customer",
    "customer_address",
    "customer_demographics",
    "date_dim",
    "household_demographics",
    "income_band",
    "inventory",
    "item",
    "promotion",
    "reason",
    "ship_mode",
    "store",
    "store_returns",
    "store_sales",
    "time_dim",
    "warehouse",
    "web_page",
    "web_returns",
    "web_sales",
    "web_site",
];

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum RunError {
    #[snafu(display("Invalid run parameters"))]
    Parameters {
        source: ConfigError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Workspace call failed during the benchmark run"))]
    Workspace {
        source: WorkspaceError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Benchmark failed"))]
    Benchmark {
        source: BenchmarkError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("No warehouse to run the benchmark on"))]
    NoWarehouses {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Warehouse run task failed"))]
    Task {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// What one warehouse contributed to the run.
#[derive(Debug)]
pub struct WarehouseRun {
    pub warehouse: TargetWarehouse,
    /// Warehouse-side history of the run; empty when it could not be fetched.
    pub history: Vec<QueryInfo>,
    pub duration: Duration,
    pub warehouse_startup: Duration,
    pub queries_per_minute: f64,
}

#[derive(Debug)]
pub struct RunOutcome {
    /// Rows of every warehouse, in warehouse order.
    pub rows: Vec<QueryMetric>,
    pub warehouses: Vec<WarehouseRun>,
    pub metrics_table: String,
    pub csv_path: Option<String>,
}

pub fn qualified_tables(schema: &str) -> Vec<String> {
    TPCDS_TABLES
        .iter()
        .map(|table| format!("{schema}.{table}"))
        .collect()
}

/// Statements that make sure `catalog.schema` exists. The Hive metastore
/// only takes schemas and `samples` is read-only.
pub fn catalog_setup_statements(catalog: &str, schema: &str) -> Vec<String> {
    match catalog {
        "samples" => Vec::new(),
        "hive_metastore" => vec![format!("CREATE SCHEMA IF NOT EXISTS {catalog}.{schema}")],
        _ => vec![
            format!("CREATE CATALOG IF NOT EXISTS {catalog}"),
            format!("CREATE SCHEMA IF NOT EXISTS {catalog}.{schema}"),
        ],
    }
}

#[tracing::instrument(skip(client))]
pub async fn set_up_catalog(
    client: &WorkspaceClient,
    warehouse_id: &str,
    catalog: &str,
    schema: &str,
) -> Result<(), WorkspaceError> {
    let polling = StatementPolling::default();
    for sql in catalog_setup_statements(catalog, schema) {
        client
            .execute_statement_checked(&StatementRequest::new(sql, warehouse_id), &polling)
            .await?;
    }
    tracing::info!("metrics will be saved in {catalog}.{schema}");
    Ok(())
}

/// Server-side view of the queries the run issued. Failing to fetch it only
/// costs the extra detail, so errors are logged and swallowed.
async fn fetch_history(
    client: &WorkspaceClient,
    warehouse_id: &str,
    start_time_ms: i64,
) -> Vec<QueryInfo> {
    let query = HistoryQuery {
        warehouse_id: warehouse_id.to_string(),
        start_time_ms,
        end_time_ms: Some(chrono::Utc::now().timestamp_millis()),
        user_id: None,
        max_results: HISTORY_MAX_RESULTS,
    };
    match client
        .query_history(&query, HISTORY_POLL_INTERVAL, HISTORY_MAX_POLLS)
        .await
    {
        Ok(history) => {
            let total_ms: i64 = history.iter().filter_map(|q| q.duration).sum();
            tracing::info!(queries = history.len(), total_ms, "fetched warehouse query history");
            history
        }
        Err(e) => {
            tracing::warn!(error = %snafu::Report::from_error(e), "could not fetch query history");
            Vec::new()
        }
    }
}

async fn stop_after_run(client: &WorkspaceClient, warehouse: &TargetWarehouse) {
    match client.stop_warehouse(&warehouse.id).await {
        Ok(()) => tracing::info!(warehouse = %warehouse.name, "stopped warehouse"),
        Err(e) => tracing::warn!(
            warehouse = %warehouse.name,
            error = %snafu::Report::from_error(e),
            "could not stop warehouse"
        ),
    }
}

/// Distinct queries the run covered: `.sql` files of a directory, or query
/// ids seen in the rows of a single file.
fn query_count(params: &RunParameters, rows: &[QueryMetric]) -> Result<usize, RunError> {
    if params.query_path.is_dir() {
        count_sql_files(&params.query_path)
            .context(QueriesSnafu)
            .context(BenchmarkSnafu)
    } else {
        Ok(rows.iter().map(|r| r.id.as_str()).collect::<HashSet<_>>().len())
    }
}

/// Starts one warehouse, warms it, runs every query on it and, when asked,
/// stops it again. The metrics warehouse is left running for the save.
#[tracing::instrument(skip_all, fields(warehouse = %warehouse.name, warehouse_id = %warehouse.id))]
async fn run_on_warehouse(
    params: RunParameters,
    client: WorkspaceClient,
    token: String,
    warehouse: TargetWarehouse,
    stop_when_done: bool,
) -> Result<(Vec<QueryMetric>, WarehouseRun), RunError> {
    let (_, warehouse_startup) = client
        .start_warehouse_and_wait(&warehouse.id, &client.config().wait)
        .await
        .context(WorkspaceSnafu)?;
    tracing::info!(
        "{} warehouse startup time: {} seconds",
        warehouse.name,
        warehouse_startup.as_secs()
    );

    let mut benchmark = Benchmark::with_workspace(client.config());
    benchmark
        .set_name(format!("job_{} {}", params.job_id, warehouse.name))
        .set_hostname(client.host())
        .set_warehouse(&warehouse.http_path())
        .set_warehouse_name(&warehouse.name)
        .set_concurrency(params.concurrency)
        .set_warehouse_token(token)
        .set_catalog(&params.catalog_name)
        .set_schema(&params.schema_name)
        .set_query_repeat_count(params.query_repetition_count)
        .set_query_file_format(params.query_file_format)
        .set_filter_comment_lines(params.filter_comment_lines);
    if params.query_path.is_dir() {
        benchmark.set_query_file_dir(&params.query_path);
    } else {
        benchmark.set_query_file(&params.query_path);
    }

    benchmark
        .pre_warm_tables(&qualified_tables(&params.schema_name))
        .await
        .context(BenchmarkSnafu)?;

    let started = Instant::now();
    let started_ms = chrono::Utc::now().timestamp_millis();
    let rows = benchmark.execute().await.context(BenchmarkSnafu)?;
    let duration = started.elapsed();
    let history = fetch_history(&client, &warehouse.id, started_ms).await;
    if stop_when_done {
        stop_after_run(&client, &warehouse).await;
    }

    let queries_per_minute = throughput_per_minute(
        query_count(&params, &rows)?,
        params.query_repetition_count,
        duration.as_secs_f64(),
    );
    Ok((
        rows,
        WarehouseRun {
            warehouse,
            history,
            duration,
            warehouse_startup,
            queries_per_minute,
        },
    ))
}

/// Reads the run parameters from `settings` and runs the benchmark.
pub async fn run_from_settings(
    settings: &dyn Settings,
    client: &WorkspaceClient,
) -> Result<RunOutcome, RunError> {
    let params = RunParameters::from_settings(settings).context(ParametersSnafu)?;
    run_benchmark(&params, client).await
}

/// Runs the benchmark on every warehouse at once, then writes all rows to
/// one metrics table through the first warehouse.
#[tracing::instrument(skip_all, fields(job_id = %params.job_id, warehouses = params.warehouses.len()))]
pub async fn run_benchmark(
    params: &RunParameters,
    client: &WorkspaceClient,
) -> Result<RunOutcome, RunError> {
    let Some(metrics_warehouse) = params.warehouses.first() else {
        return NoWarehousesSnafu.fail();
    };
    let token = if params.mint_token {
        client
            .create_token(TOKEN_COMMENT, TOKEN_LIFETIME)
            .await
            .context(WorkspaceSnafu)?
    } else {
        client.config().token.clone()
    };

    let mut tasks = JoinSet::new();
    for (position, warehouse) in params.warehouses.iter().enumerate() {
        let run = run_on_warehouse(
            params.clone(),
            client.clone(),
            token.clone(),
            warehouse.clone(),
            params.stop_warehouse && position > 0,
        );
        tasks.spawn(async move { (position, run.await) });
    }
    let mut finished = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let (position, result) = joined.context(TaskSnafu)?;
        finished.push((position, result?));
    }
    finished.sort_by_key(|(position, _)| *position);

    let mut rows = Vec::new();
    let mut warehouses = Vec::with_capacity(finished.len());
    for (_, (warehouse_rows, run)) in finished {
        rows.extend(warehouse_rows);
        warehouses.push(run);
    }

    set_up_catalog(
        client,
        &metrics_warehouse.id,
        &params.catalog_name,
        &params.schema_name,
    )
    .await
    .context(WorkspaceSnafu)?;
    let metrics_table = TableSink::new(client.clone(), metrics_warehouse.id.clone())
        .save_overwrite(&params.metrics_table_full_name(), &rows)
        .await
        .context(BenchmarkSnafu)?;
    let csv_path = match &params.results_dir {
        Some(dir) => Some(
            CsvSink::new(dir)
                .save_overwrite(&params.metrics_table_name(), &rows)
                .await
                .context(BenchmarkSnafu)?,
        ),
        None => None,
    };
    if params.stop_warehouse {
        stop_after_run(client, metrics_warehouse).await;
    }

    print_statistics(&rows);
    println!("Metrics written to {metrics_table}");
    if let Some(path) = &csv_path {
        println!("Metrics CSV written to {path}");
    }
    for run in &warehouses {
        if warehouses.len() > 1 {
            println!(
                "{}: TPC-DS queries per minute: {:.2}",
                run.warehouse.name, run.queries_per_minute
            );
        } else {
            println!("TPC-DS queries per minute: {:.2}", run.queries_per_minute);
        }
    }

    Ok(RunOutcome {
        rows,
        warehouses,
        metrics_table,
        csv_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn should_qualify_all_tpcds_tables() {
        let tables = qualified_tables("tpcds_sf1_delta");

        assert_eq!(tables.len(), 24);
        assert_eq!(tables[0], "tpcds_sf1_delta.call_center");
        assert_eq!(tables[23], "tpcds_sf1_delta.web_site");
    }

    #[test_case("hive_metastore", &["CREATE SCHEMA IF NOT EXISTS hive_metastore.tpch"]; "hive metastore")]
    #[test_case("samples", &[]; "read only samples")]
    #[test_case("tpch", &["CREATE CATALOG IF NOT EXISTS tpch", "CREATE SCHEMA IF NOT EXISTS tpch.tpch"]; "unity catalog")]
    fn should_create_missing_catalog_and_schema(catalog: &str, expected: &[&str]) {
        assert_eq!(catalog_setup_statements(catalog, "tpch"), expected);
    }
}
