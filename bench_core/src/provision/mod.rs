//! The quickstart: resolve who is running it, upload the setup artifacts,
//! make sure the warehouse exists, then create and trigger the benchmark job.

use crate::client::{ClientError, PlatformClient, job_run_url};
use crate::config::ConfigError;
use crate::config::quickstart::QuickstartConfig;
use crate::config::run_parameters::TargetWarehouse;
use crate::config::settings::Settings;
use crate::setup::{DbfsFs, SetupError, SetupPaths, setup_files};
use crate::workspace::{WorkspaceClient, WorkspaceError};
use snafu::{Location, ResultExt, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum ProvisionError {
    #[snafu(display("Invalid quickstart parameters"))]
    Parameters {
        source: ConfigError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Workspace call failed while provisioning"))]
    Workspace {
        source: WorkspaceError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to upload setup files"))]
    Setup {
        source: SetupError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to create or run the benchmark job"))]
    Client {
        source: ClientError,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchedRun {
    pub warehouses: Vec<TargetWarehouse>,
    pub job_id: i64,
    pub run_id: i64,
    pub url: String,
    pub data_path: String,
}

pub fn setup_paths(quickstart: &QuickstartConfig) -> SetupPaths {
    SetupPaths {
        jar_path: quickstart.jar_path.clone(),
        init_script_path: quickstart.init_script_path.clone(),
        package_path: quickstart.package_path.clone(),
        include_kit_jar: false,
    }
}

/// Resolves the current user and derives the quickstart configuration.
pub async fn quickstart_config(
    settings: &dyn Settings,
    client: &WorkspaceClient,
) -> Result<QuickstartConfig, ProvisionError> {
    let user = client.current_user().await.context(WorkspaceSnafu)?;
    QuickstartConfig::from_settings(settings, &user.user_name).context(ParametersSnafu)
}

/// Uploads the init script and the benchmark package through the DBFS API.
pub async fn upload_setup_files(
    client: &WorkspaceClient,
    quickstart: &QuickstartConfig,
    include_kit_jar: bool,
) -> Result<(), ProvisionError> {
    let fs = DbfsFs::new(client.clone());
    let paths = SetupPaths {
        include_kit_jar,
        ..setup_paths(quickstart)
    };
    setup_files(&fs, client.http(), &client.config().retry, &paths)
        .await
        .context(SetupSnafu)
}

/// Reuses or creates every warehouse the benchmark choice targets.
pub async fn ensure_warehouses(
    platform: &PlatformClient,
) -> Result<Vec<TargetWarehouse>, ProvisionError> {
    let mut warehouses = Vec::new();
    for spec in platform.warehouse_specs() {
        let id = platform
            .workspace()
            .ensure_warehouse(&spec)
            .await
            .context(WorkspaceSnafu)?;
        warehouses.push(TargetWarehouse {
            id,
            name: spec.name,
        });
    }
    Ok(warehouses)
}

/// Runs the whole quickstart and prints where to follow the job.
#[tracing::instrument(skip_all)]
pub async fn launch(
    settings: &dyn Settings,
    client: &WorkspaceClient,
    upload: bool,
) -> Result<LaunchedRun, ProvisionError> {
    let quickstart = quickstart_config(settings, client).await?;
    if upload {
        upload_setup_files(client, &quickstart, false).await?;
    }

    let platform = PlatformClient::new(client.clone(), quickstart);
    let warehouses = ensure_warehouses(&platform).await?;
    let job = platform
        .create_job(&warehouses)
        .await
        .context(ClientSnafu)?;
    let run = platform.run_job(job.job_id).await.context(ClientSnafu)?;

    let launched = LaunchedRun {
        warehouses,
        job_id: job.job_id,
        run_id: run.run_id,
        url: job_run_url(client.host(), job.job_id, run.run_id),
        data_path: platform.quickstart().data_path.clone(),
    };
    println!("Benchmark job started: {}", launched.url);
    for warehouse in &launched.warehouses {
        println!(
            "Warehouse {} ({}) on {}",
            warehouse.name,
            warehouse.id,
            client.config().hostname()
        );
    }
    println!("Data location: {}", launched.data_path);
    Ok(launched)
}
