//! Parameters of the quickstart provisioning flow and the values derived
//! from them (catalog/schema naming, warehouse naming, artifact locations).

use crate::config::settings::Settings;
use crate::config::{ConfigError, InvalidParameterValueSnafu};
use crate::setup::{BENCHMARK_KIT_JAR_NAME, BENCHMARK_PACKAGE_NAME};
use strum::{Display, EnumString};

pub const JOB_NAME: &str = "[AUTOMATED] Create and run serverless quickstart";
pub const ROOT_DIRECTORY: &str = "dbfs:/Serverless_Benchmarking";
pub const BYOD_CATALOG: &str = "serverless_benchmark";

pub const WAREHOUSE_SIZES: &[&str] = &[
    "2X-Small", "X-Small", "Small", "Medium", "Large", "X-Large", "2X-Large", "3X-Large",
    "4X-Large",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum BenchmarkKind {
    #[strum(serialize = "TPCH")]
    Tpch,
    #[strum(serialize = "TPCDS")]
    Tpcds,
    #[strum(serialize = "BYOD")]
    Byod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum BenchmarkChoice {
    OneWarehouse,
    /// One warehouse of each type at the first size.
    MultipleWarehouses,
    /// One warehouse of the configured type per listed size.
    MultipleWarehousesSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WarehouseType {
    Serverless,
    Pro,
    Classic,
}

impl WarehouseType {
    pub const ALL: [WarehouseType; 3] = [Self::Serverless, Self::Pro, Self::Classic];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Channel {
    Preview,
    Current,
}

/// A warehouse the quickstart benchmarks on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WarehouseTarget {
    pub name: String,
    pub warehouse_type: WarehouseType,
    pub size: String,
}

#[derive(Clone, Debug)]
pub struct QuickstartConfig {
    pub benchmarks: BenchmarkKind,
    pub benchmark_choice: BenchmarkChoice,
    pub catalog_name: String,
    pub schema_name: String,
    pub scale_factors: i64,
    pub concurrency: usize,
    pub query_repetition_count: usize,
    pub warehouse_name: String,
    /// `<user> <warehouse name>`, the stem of every warehouse name.
    pub warehouse_prefix: String,
    pub warehouse_type: WarehouseType,
    /// First entry of `warehouse_sizes`.
    pub warehouse_size: String,
    pub warehouse_sizes: Vec<String>,
    pub max_clusters: usize,
    pub channel: Channel,
    pub current_user_email: String,
    /// Workspace folder the tool was cloned into, without the `/Workspace` prefix.
    pub workspace_dir: String,
    /// Uploaded package the job installs; overrides the default location.
    pub package_path: String,
    pub jar_path: String,
    pub init_script_path: String,
    pub data_path: String,
    pub query_path: String,
    pub run_benchmark_notebook_path: String,
    pub datagen_notebook_path: String,
}

impl QuickstartConfig {
    /// Reads the widget values and derives everything else. `current_user_email`
    /// comes from the workspace identity, not from the parameter bag.
    pub fn from_settings(
        settings: &dyn Settings,
        current_user_email: &str,
    ) -> Result<Self, ConfigError> {
        let benchmarks = parse_enum::<BenchmarkKind>(settings, "benchmarks", "TPCH")?;
        let benchmark_choice =
            parse_enum::<BenchmarkChoice>(settings, "benchmark_choice", "one-warehouse")?;
        let warehouse_type = parse_enum::<WarehouseType>(settings, "warehouse_type", "serverless")?;
        let channel = parse_enum::<Channel>(settings, "channel", "Current")?;

        let warehouse_sizes = parse_sizes(
            &settings
                .get_string("warehouse_size")
                .unwrap_or_else(|| "Small".to_string()),
        )?;
        let warehouse_size = warehouse_sizes[0].clone();

        let scale_factors = settings.get_int("scale_factors")?.unwrap_or(1);
        let concurrency = settings.get_int("concurrency")?.unwrap_or(50).max(1) as usize;
        let query_repetition_count =
            settings.get_int("query_repetition_count")?.unwrap_or(30).max(1) as usize;
        let requested_clusters = settings.get_int("max_clusters")?.unwrap_or(2);

        let (catalog_name, schema_name) = match benchmarks {
            BenchmarkKind::Tpch | BenchmarkKind::Tpcds => {
                let lower = benchmarks.to_string().to_lowercase();
                let schema = format!("{lower}_sf{scale_factors}_delta");
                (lower, schema)
            }
            BenchmarkKind::Byod => {
                let schema = settings.get_string("schema_name").unwrap_or_default();
                if schema.trim().is_empty() {
                    return InvalidParameterValueSnafu {
                        parameter: "schema_name",
                        value: schema,
                        explanation: "Specify the schema_name for the BYOD (bring your own data) option",
                    }
                    .fail();
                }
                (BYOD_CATALOG.to_string(), schema)
            }
        };

        let max_clusters = recommended_max_clusters(concurrency);
        if max_clusters as i64 != requested_clusters {
            tracing::warn!(
                requested = requested_clusters,
                recommended = max_clusters,
                "For optimal performance use 1 cluster per 10 levels of concurrency; setting max clusters to the recommended value"
            );
        }

        let workspace_dir = settings
            .get_string("workspace_dir")
            .map(|dir| strip_workspace_prefix(&dir))
            .unwrap_or_else(|| format!("/Users/{current_user_email}/serverless_benchmarking"));

        let script_path = format!("{ROOT_DIRECTORY}/scripts");
        let benchmark_slug = benchmarks.to_string().to_lowercase();
        let datagen_notebook = match benchmarks {
            BenchmarkKind::Byod => "notebooks/custom_datagen",
            _ => "notebooks/tpc_datagen",
        };

        let base_warehouse_name = settings
            .get_string("warehouse_name")
            .unwrap_or_else(|| "Benchmarking Warehouse".to_string());

        let warehouse_prefix = format!(
            "{} {base_warehouse_name}",
            current_user_name(current_user_email)
        );

        Ok(Self {
            benchmarks,
            benchmark_choice,
            data_path: format!("{ROOT_DIRECTORY}/data/{schema_name}"),
            catalog_name,
            schema_name,
            scale_factors,
            concurrency,
            query_repetition_count,
            warehouse_name: format!("{warehouse_prefix} {warehouse_size}"),
            warehouse_prefix,
            warehouse_type,
            warehouse_size,
            warehouse_sizes,
            max_clusters,
            channel,
            current_user_email: current_user_email.to_string(),
            package_path: settings
                .get_string("package_path")
                .unwrap_or_else(|| format!("{script_path}/{BENCHMARK_PACKAGE_NAME}")),
            jar_path: format!("{script_path}/jars/{BENCHMARK_KIT_JAR_NAME}"),
            init_script_path: format!("{script_path}/install.sh"),
            query_path: settings
                .get_string("query_path")
                .unwrap_or_else(|| format!("/Workspace{workspace_dir}/queries/{benchmark_slug}")),
            run_benchmark_notebook_path: format!("{workspace_dir}/notebooks/run_benchmark"),
            datagen_notebook_path: format!("{workspace_dir}/{datagen_notebook}"),
            workspace_dir,
        })
    }
}

impl QuickstartConfig {
    /// The warehouses `benchmark_choice` asks for. Several warehouses are
    /// named `<prefix> <type> <size>` so they stay apart.
    pub fn warehouse_targets(&self) -> Vec<WarehouseTarget> {
        let target = |warehouse_type: WarehouseType, size: &str| WarehouseTarget {
            name: format!("{} {warehouse_type} {size}", self.warehouse_prefix),
            warehouse_type,
            size: size.to_string(),
        };
        match self.benchmark_choice {
            BenchmarkChoice::OneWarehouse => vec![WarehouseTarget {
                name: self.warehouse_name.clone(),
                warehouse_type: self.warehouse_type,
                size: self.warehouse_size.clone(),
            }],
            BenchmarkChoice::MultipleWarehouses => WarehouseType::ALL
                .into_iter()
                .map(|warehouse_type| target(warehouse_type, &self.warehouse_size))
                .collect(),
            BenchmarkChoice::MultipleWarehousesSize => self
                .warehouse_sizes
                .iter()
                .map(|size| target(self.warehouse_type, size))
                .collect(),
        }
    }
}

/// Comma-separated warehouse sizes, each one of [`WAREHOUSE_SIZES`].
fn parse_sizes(raw: &str) -> Result<Vec<String>, ConfigError> {
    let sizes: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if sizes.is_empty() || sizes.iter().any(|s| !WAREHOUSE_SIZES.contains(&s.as_str())) {
        return InvalidParameterValueSnafu {
            parameter: "warehouse_size",
            value: raw,
            explanation: format!("Allowed values are {}", WAREHOUSE_SIZES.join(", ")),
        }
        .fail();
    }
    Ok(sizes)
}

/// One warehouse cluster per ten levels of concurrency, rounded up.
pub fn recommended_max_clusters(concurrency: usize) -> usize {
    concurrency.div_ceil(10).max(1)
}

/// `first.last-name@corp.com` becomes `first_last_name`.
pub fn current_user_name(email: &str) -> String {
    email
        .replace(['.', '-'], "_")
        .split('@')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn strip_workspace_prefix(dir: &str) -> String {
    let dir = dir.trim_end_matches('/');
    dir.strip_prefix("/Workspace").unwrap_or(dir).to_string()
}

fn parse_enum<T: std::str::FromStr>(
    settings: &dyn Settings,
    key: &str,
    default: &str,
) -> Result<T, ConfigError> {
    let raw = settings
        .get_string(key)
        .unwrap_or_else(|| default.to_string());
    raw.parse::<T>().map_err(|_| {
        InvalidParameterValueSnafu {
            parameter: key,
            value: raw.clone(),
            explanation: "unsupported value",
        }
        .build()
    })
}
