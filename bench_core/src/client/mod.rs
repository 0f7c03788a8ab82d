//! Job and cluster configuration derived from the quickstart parameters,
//! and the two orchestration calls built on it: create the benchmark job
//! and trigger a run.

use crate::config::quickstart::{
    Channel, JOB_NAME, QuickstartConfig, WarehouseTarget, WarehouseType,
};
use crate::config::run_parameters::TargetWarehouse;
use crate::config::workspace::Cloud;
use crate::workspace::clusters::SparkVersionQuery;
use crate::workspace::jobs::{CreateJobResponse, RunNowResponse};
use crate::workspace::warehouses::{WarehouseChannel, WarehouseSpec};
use crate::workspace::{WorkspaceClient, WorkspaceError};
use serde_json::{Map, Value, json};
use snafu::{Location, ResultExt, Snafu};

pub const CORES_PER_WORKER: usize = 4;
pub const MAX_WORKERS: usize = 25;
pub const BENCHMARK_TASK_KEY: &str = "run_benchmarking";
/// Jobs dynamic value reference resolved to the job id at run time.
pub const JOB_ID_REFERENCE: &str = "{{job.id}}";

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum ClientError {
    #[snafu(display("Workspace {host} is not on a supported cloud (Azure, GCP, AWS)"))]
    UnsupportedCloud {
        host: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Workspace call failed"))]
    Workspace {
        source: WorkspaceError,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type ClusterConfig = Map<String, Value>;

/// Instance type sized for the benchmark driver on each cloud.
pub fn cluster_type_for(cloud: Option<Cloud>, host: &str) -> Result<&'static str, ClientError> {
    match cloud {
        Some(Cloud::Azure) => Ok("Standard_E8ds_v4"),
        Some(Cloud::Gcp) => Ok("n1-highmem-4"),
        Some(Cloud::Aws) => Ok("i3.2xlarge"),
        None => UnsupportedCloudSnafu { host }.fail(),
    }
}

/// One worker per [`CORES_PER_WORKER`] concurrent queries plus one, capped
/// at [`MAX_WORKERS`].
pub fn worker_count(concurrency: usize) -> usize {
    let workers = concurrency / CORES_PER_WORKER + 1;
    if workers > MAX_WORKERS {
        tracing::warn!(
            concurrency,
            requested_workers = workers,
            cap = MAX_WORKERS,
            "Requested concurrency needs more than {MAX_WORKERS} workers of {CORES_PER_WORKER} cores; capping the worker count"
        );
        return MAX_WORKERS;
    }
    workers
}

/// Shallow merge; keys in `overrides` win.
pub fn merge_config(base: &ClusterConfig, overrides: ClusterConfig) -> ClusterConfig {
    let mut merged = base.clone();
    merged.extend(overrides);
    merged
}

fn object(value: Value) -> ClusterConfig {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn job_run_url(host: &str, job_id: i64, run_id: i64) -> String {
    format!("{}#job/{job_id}/run/{run_id}", host.trim_end_matches('/'))
}

pub struct PlatformClient {
    workspace: WorkspaceClient,
    quickstart: QuickstartConfig,
}

impl PlatformClient {
    pub fn new(workspace: WorkspaceClient, quickstart: QuickstartConfig) -> Self {
        Self {
            workspace,
            quickstart,
        }
    }

    pub fn workspace(&self) -> &WorkspaceClient {
        &self.workspace
    }

    pub fn quickstart(&self) -> &QuickstartConfig {
        &self.quickstart
    }

    /// Latest LTS Scala 2.12 runtime without ML/GPU/Photon/Graviton/beta variants.
    pub async fn latest_spark_version(&self) -> Result<String, ClientError> {
        self.workspace
            .select_spark_version(&SparkVersionQuery::default())
            .await
            .context(WorkspaceSnafu)
    }

    pub fn cloud_specific_cluster_type(&self) -> Result<&'static str, ClientError> {
        cluster_type_for(self.workspace.cloud(), self.workspace.host())
    }

    pub fn number_of_cores_per_worker(&self) -> usize {
        CORES_PER_WORKER
    }

    pub fn base_cluster_config(&self) -> Result<ClusterConfig, ClientError> {
        Ok(object(json!({
            "enable_local_disk_encryption": false,
            "runtime_engine": "PHOTON",
            "node_type_id": self.cloud_specific_cluster_type()?,
            "single_user_name": self.quickstart.current_user_email,
            "data_security_mode": "SINGLE_USER",
        })))
    }

    pub fn data_generator_cluster_config(
        &self,
        spark_version: &str,
    ) -> Result<ClusterConfig, ClientError> {
        let overrides = object(json!({
            "name": "Data Gen Cluster",
            "autoscale": {"min_workers": 1, "max_workers": 16},
            "spark_version": spark_version,
        }));
        Ok(merge_config(&self.base_cluster_config()?, overrides))
    }

    pub fn load_testing_cluster_config(
        &self,
        spark_version: &str,
    ) -> Result<ClusterConfig, ClientError> {
        let overrides = object(json!({
            "name": "Serverless Benchmarking Cluster",
            "num_workers": worker_count(self.quickstart.concurrency),
            "spark_version": spark_version,
        }));
        Ok(merge_config(&self.base_cluster_config()?, overrides))
    }

    /// The Jobs API body: a single notebook task running the benchmark on a
    /// fresh load-testing cluster, as the current user. Several warehouses
    /// travel as comma-separated ids and names and are stopped after their
    /// run.
    pub fn job_settings(
        &self,
        spark_version: &str,
        warehouses: &[TargetWarehouse],
    ) -> Result<Value, ClientError> {
        let q = &self.quickstart;
        let mut parameters = object(json!({
            "job_id": JOB_ID_REFERENCE,
            "benchmarks": q.benchmarks.to_string(),
            "benchmark_choice": q.benchmark_choice.to_string(),
            "warehouse_name": q.warehouse_name,
            "warehouse_size": q.warehouse_size,
            "warehouse_type": q.warehouse_type.to_string(),
            "catalog_name": q.catalog_name,
            "schema_name": q.schema_name,
            "query_path": q.query_path,
            "query_repetition_count": q.query_repetition_count.to_string(),
            "concurrency": q.concurrency.to_string(),
            "max_clusters": q.max_clusters.to_string(),
        }));
        if !warehouses.is_empty() {
            let ids: Vec<&str> = warehouses.iter().map(|w| w.id.as_str()).collect();
            let names: Vec<&str> = warehouses.iter().map(|w| w.name.as_str()).collect();
            parameters.insert("warehouse_id".to_string(), Value::from(ids.join(",")));
            parameters.insert("warehouse_name".to_string(), Value::from(names.join(",")));
            parameters.insert(
                "stop_warehouse".to_string(),
                Value::from((warehouses.len() > 1).to_string()),
            );
        }

        Ok(json!({
            "name": JOB_NAME,
            "run_as": {"user_name": q.current_user_email},
            "tasks": [{
                "task_key": BENCHMARK_TASK_KEY,
                "notebook_task": {
                    "notebook_path": q.run_benchmark_notebook_path,
                    "source": "WORKSPACE",
                    "base_parameters": parameters,
                },
                "new_cluster": self.load_testing_cluster_config(spark_version)?,
                "libraries": [{"whl": q.package_path}],
            }],
        }))
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_job(
        &self,
        warehouses: &[TargetWarehouse],
    ) -> Result<CreateJobResponse, ClientError> {
        let spark_version = self.latest_spark_version().await?;
        let settings = self.job_settings(&spark_version, warehouses)?;
        self.workspace
            .create_job(&settings)
            .await
            .context(WorkspaceSnafu)
    }

    pub async fn run_job(&self, job_id: i64) -> Result<RunNowResponse, ClientError> {
        self.workspace
            .run_job_now(job_id)
            .await
            .context(WorkspaceSnafu)
    }

    /// Create requests for every warehouse the benchmark choice targets.
    pub fn warehouse_specs(&self) -> Vec<WarehouseSpec> {
        self.quickstart
            .warehouse_targets()
            .iter()
            .map(|target| self.warehouse_spec(target))
            .collect()
    }

    /// Min and max clusters are pinned so the measured capacity stays fixed.
    pub fn warehouse_spec(&self, target: &WarehouseTarget) -> WarehouseSpec {
        let q = &self.quickstart;
        let (warehouse_type, serverless) = match target.warehouse_type {
            WarehouseType::Serverless => ("PRO", true),
            WarehouseType::Pro => ("PRO", false),
            WarehouseType::Classic => ("CLASSIC", false),
        };
        let channel = match q.channel {
            Channel::Preview => "CHANNEL_NAME_PREVIEW",
            Channel::Current => "CHANNEL_NAME_CURRENT",
        };
        WarehouseSpec {
            name: target.name.clone(),
            cluster_size: target.size.clone(),
            min_num_clusters: q.max_clusters,
            max_num_clusters: q.max_clusters,
            auto_stop_mins: 5,
            warehouse_type: warehouse_type.to_string(),
            enable_serverless_compute: serverless,
            enable_photon: true,
            spot_instance_policy: "RELIABILITY_OPTIMIZED".to_string(),
            channel: WarehouseChannel {
                name: channel.to_string(),
            },
        }
    }
}
