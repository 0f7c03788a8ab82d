use std::path::PathBuf;

use crate::benchmark::queries::QueryFileFormat;
use crate::config::settings::Settings;
use crate::config::{ConfigError, InvalidParameterValueSnafu};

/// A warehouse the run measures, by id and display name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetWarehouse {
    pub id: String,
    pub name: String,
}

impl TargetWarehouse {
    pub fn http_path(&self) -> String {
        format!("/sql/1.0/warehouses/{}", self.id)
    }
}

/// Parameters of one benchmark run, read once from the job's parameter bag.
#[derive(Clone, Debug)]
pub struct RunParameters {
    /// At least one. The first also receives the metrics table.
    pub warehouses: Vec<TargetWarehouse>,
    /// Stop every warehouse once its part of the run is done.
    pub stop_warehouse: bool,
    pub catalog_name: String,
    pub schema_name: String,
    /// Local path of the query files, `dbfs:` already rewritten to the mount.
    pub query_path: PathBuf,
    pub query_file_format: QueryFileFormat,
    pub filter_comment_lines: bool,
    pub concurrency: usize,
    pub query_repetition_count: usize,
    pub job_id: String,
    /// Create a short-lived token for the run instead of reusing the caller's.
    pub mint_token: bool,
    /// Optional directory for a CSV copy of the metrics.
    pub results_dir: Option<PathBuf>,
}

impl RunParameters {
    pub fn from_settings(settings: &dyn Settings) -> Result<Self, ConfigError> {
        let job_id = settings.require_string("job_id").inspect_err(|_| {
            tracing::error!("The benchmark must be run within a workflow");
        })?;

        let query_file_format = match settings.get_string("query_file_format") {
            Some(raw) => raw.parse::<QueryFileFormat>().map_err(|_| {
                InvalidParameterValueSnafu {
                    parameter: "query_file_format",
                    value: raw.clone(),
                    explanation: "Allowed values are original and semicolon-delimited",
                }
                .build()
            })?,
            None => QueryFileFormat::default(),
        };

        Ok(Self {
            warehouses: parse_warehouses(
                &settings.require_string("warehouse_id")?,
                settings.get_string("warehouse_name").as_deref(),
            )?,
            stop_warehouse: settings.get_bool("stop_warehouse")?.unwrap_or(false),
            catalog_name: settings.require_string("catalog_name")?,
            schema_name: settings.require_string("schema_name")?,
            query_path: PathBuf::from(normalize_query_path(
                &settings.require_string("query_path")?,
            )),
            query_file_format,
            filter_comment_lines: settings.get_bool("filter_comment_lines")?.unwrap_or(false),
            concurrency: positive(settings, "concurrency")?,
            query_repetition_count: positive(settings, "query_repetition_count")?,
            job_id,
            mint_token: settings.get_bool("mint_token")?.unwrap_or(true),
            results_dir: settings.get_string("results_dir").map(PathBuf::from),
        })
    }

    pub fn metrics_table_name(&self) -> String {
        format!("benchmark_metrics_for_job_{}", self.job_id)
    }

    pub fn metrics_table_full_name(&self) -> String {
        format!(
            "{}.{}.{}",
            self.catalog_name,
            self.schema_name,
            self.metrics_table_name()
        )
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pairs comma-separated ids with comma-separated names; ids name
/// themselves when no names are given.
fn parse_warehouses(
    ids: &str,
    names: Option<&str>,
) -> Result<Vec<TargetWarehouse>, ConfigError> {
    let ids = split_list(ids);
    if ids.is_empty() {
        return InvalidParameterValueSnafu {
            parameter: "warehouse_id",
            value: "",
            explanation: "at least one warehouse id is required",
        }
        .fail();
    }
    let names = match names {
        Some(raw) => split_list(raw),
        None => ids.clone(),
    };
    if names.len() != ids.len() {
        return InvalidParameterValueSnafu {
            parameter: "warehouse_name",
            value: names.join(","),
            explanation: format!("expected {} names, one per warehouse id", ids.len()),
        }
        .fail();
    }
    Ok(ids
        .into_iter()
        .zip(names)
        .map(|(id, name)| TargetWarehouse { id, name })
        .collect())
}

fn positive(settings: &dyn Settings, key: &str) -> Result<usize, ConfigError> {
    let value = settings.require_int(key)?;
    if value < 1 {
        return InvalidParameterValueSnafu {
            parameter: key,
            value: value.to_string(),
            explanation: "must be at least 1",
        }
        .fail();
    }
    Ok(value as usize)
}

/// Rewrites a `dbfs:` URI to the node-local mount, leaving other paths as is.
pub fn normalize_query_path(path: &str) -> String {
    match path.strip_prefix("dbfs:") {
        Some(rest) => format!("/dbfs/{}", rest.trim_start_matches('/')),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::settings_from_pairs;

    fn base_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("warehouse_id", "abc123"),
            ("catalog_name", "tpcds"),
            ("schema_name", "tpcds_sf1_delta"),
            ("query_path", "dbfs:/Serverless_Benchmarking/queries/tpcds"),
            ("concurrency", "10"),
            ("query_repetition_count", "3"),
            ("job_id", "42"),
        ]
    }

    #[test]
    fn should_read_run_parameters() {
        let settings = settings_from_pairs(base_pairs());

        let params = RunParameters::from_settings(&settings).unwrap();

        assert_eq!(params.concurrency, 10);
        assert_eq!(params.query_repetition_count, 3);
        assert_eq!(
            params.query_path,
            PathBuf::from("/dbfs/Serverless_Benchmarking/queries/tpcds")
        );
        assert_eq!(
            params.metrics_table_full_name(),
            "tpcds.tpcds_sf1_delta.benchmark_metrics_for_job_42"
        );
        assert_eq!(params.warehouses[0].http_path(), "/sql/1.0/warehouses/abc123");
        assert_eq!(params.warehouses[0].name, "abc123");
        assert!(params.mint_token);
        assert!(!params.stop_warehouse);
        assert!(!params.filter_comment_lines);
    }

    #[test]
    fn should_pair_warehouse_ids_with_names() {
        let mut pairs = base_pairs();
        pairs.retain(|(k, _)| *k != "warehouse_id");
        pairs.push(("warehouse_id", "w1, w2"));
        pairs.push(("warehouse_name", "bench pro Small,bench classic Small"));
        pairs.push(("stop_warehouse", "true"));
        let settings = settings_from_pairs(pairs);

        let params = RunParameters::from_settings(&settings).unwrap();

        assert_eq!(
            params.warehouses,
            vec![
                TargetWarehouse {
                    id: "w1".to_string(),
                    name: "bench pro Small".to_string()
                },
                TargetWarehouse {
                    id: "w2".to_string(),
                    name: "bench classic Small".to_string()
                },
            ]
        );
        assert!(params.stop_warehouse);
    }

    #[test]
    fn should_reject_names_not_matching_ids() {
        let mut pairs = base_pairs();
        pairs.push(("warehouse_name", "a,b"));
        let settings = settings_from_pairs(pairs);

        let err = RunParameters::from_settings(&settings).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidParameterValue { ref parameter, .. } if parameter == "warehouse_name"));
    }

    #[test]
    fn should_fail_without_job_id() {
        let pairs: Vec<_> = base_pairs()
            .into_iter()
            .filter(|(k, _)| *k != "job_id")
            .collect();
        let settings = settings_from_pairs(pairs);

        let err = RunParameters::from_settings(&settings).unwrap_err();

        assert!(matches!(err, ConfigError::MissingParameter { ref parameter, .. } if parameter == "job_id"));
    }

    #[test]
    fn should_reject_zero_concurrency() {
        let mut pairs = base_pairs();
        pairs.retain(|(k, _)| *k != "concurrency");
        pairs.push(("concurrency", "0"));
        let settings = settings_from_pairs(pairs);

        assert!(RunParameters::from_settings(&settings).is_err());
    }

    #[test]
    fn should_keep_workspace_paths() {
        assert_eq!(
            normalize_query_path("/Workspace/Users/a/queries"),
            "/Workspace/Users/a/queries"
        );
        assert_eq!(normalize_query_path("dbfs:/x/y"), "/dbfs/x/y");
    }
}
