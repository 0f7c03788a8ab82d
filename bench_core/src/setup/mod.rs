//! Uploads the artifacts the benchmark job needs onto the distributed
//! filesystem: the cluster init script, the benchmark kit jar and the
//! benchmark package.

pub mod fs;

pub use fs::{DbfsFs, DistributedFs, FileWriter, MountedFs, clean_path_for_native};

use crate::config::retry::RetryPolicy;
use crate::http::retry::{HttpContext, HttpError, execute_with_retry};
use crate::workspace::WorkspaceError;
use reqwest::Method;
use snafu::{Location, ResultExt, Snafu};
use std::path::PathBuf;

pub const BENCHMARK_KIT_JAR_NAME: &str = "spark-sql-perf_2.12-0.5.1-SNAPSHOT.jar";
pub const BENCHMARK_KIT_JAR_URL: &str = "https://github.com/BlueGranite/tpc-ds-dataset-generator/blob/master/lib/spark-sql-perf_2.12-0.5.1-SNAPSHOT.jar?raw=true";
pub const BENCHMARK_PACKAGE_NAME: &str = "beaker-0.0.5-py3-none-any.whl";
pub const BENCHMARK_PACKAGE_URL: &str =
    "https://github.com/anhhchu/beaker/blob/main/dist/beaker-0.0.5-py3-none-any.whl?raw=true";

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum SetupError {
    #[snafu(display("Storage call failed"))]
    Workspace {
        source: WorkspaceError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Local filesystem call failed on {}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to download {url}"))]
    Download {
        url: String,
        source: HttpError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to read the body of {url}"))]
    DownloadBody {
        url: String,
        source: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Nothing was written to {path}"))]
    NotWritten {
        path: String,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Parent folder of a `/`-separated storage path, `/` when there is none.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// True when listing `path` yields at least one entry.
pub async fn directory_not_empty<F: DistributedFs>(fs: &F, path: &str) -> Result<bool, SetupError> {
    Ok(!fs.ls(path).await?.is_empty())
}

/// Streams `url` into `dest`, creating the parent folder first.
///
/// The response status is logged but not enforced: whatever the server sends
/// back is written. Returns whether `dest` lists as non-empty afterwards.
#[tracing::instrument(skip(fs, http, retry))]
pub async fn add_remote_file<F: DistributedFs>(
    fs: &F,
    http: &reqwest::Client,
    retry: &RetryPolicy,
    url: &str,
    dest: &str,
) -> Result<bool, SetupError> {
    fs.mkdirs(parent_dir(dest)).await?;

    let ctx = HttpContext::new(Method::GET, url);
    let mut response = execute_with_retry(|| http.get(url), &ctx, retry)
        .await
        .context(DownloadSnafu { url })?;
    if !response.status().is_success() {
        tracing::warn!(url, status = %response.status(), "download answered with a non-success status");
    }

    let mut writer = fs.write_stream(dest).await?;
    let total = match copy_body(&mut response, &mut writer, url).await {
        Ok(total) => total,
        Err(e) => {
            writer.abort().await;
            return Err(e);
        }
    };
    writer.finish().await?;
    tracing::info!(url, dest, bytes = total, "downloaded remote file");

    directory_not_empty(fs, dest).await
}

async fn copy_body<W: FileWriter>(
    response: &mut reqwest::Response,
    writer: &mut W,
    url: &str,
) -> Result<usize, SetupError> {
    let mut total = 0usize;
    while let Some(chunk) = response
        .chunk()
        .await
        .context(DownloadBodySnafu { url })?
    {
        total += chunk.len();
        writer.write(&chunk).await?;
    }
    Ok(total)
}

/// The cluster init script: builds the TPC-DS kit and installs the
/// benchmark kit jar from `jar_path`.
pub fn init_script(jar_path: &str) -> String {
    format!(
        "#!/bin/bash\n\
         sudo apt-get --assume-yes install gcc make flex bison byacc git\n\
         \n\
         cd /usr/local/bin\n\
         git clone https://github.com/databricks/tpcds-kit.git\n\
         cd tpcds-kit/tools\n\
         make OS=LINUX\n\
         \n\
         cp {} /databricks/jars/\n",
        clean_path_for_native(jar_path)
    )
}

pub async fn add_init_script<F: DistributedFs>(
    fs: &F,
    init_script_path: &str,
    jar_path: &str,
) -> Result<bool, SetupError> {
    fs.mkdirs(parent_dir(init_script_path)).await?;
    fs.put(init_script_path, init_script(jar_path).as_bytes(), true)
        .await?;
    tracing::info!(path = init_script_path, "wrote init script");
    directory_not_empty(fs, init_script_path).await
}

pub async fn add_benchmark_kit_jar<F: DistributedFs>(
    fs: &F,
    http: &reqwest::Client,
    retry: &RetryPolicy,
    jar_path: &str,
) -> Result<bool, SetupError> {
    add_remote_file(fs, http, retry, BENCHMARK_KIT_JAR_URL, jar_path).await
}

pub async fn add_benchmark_package<F: DistributedFs>(
    fs: &F,
    http: &reqwest::Client,
    retry: &RetryPolicy,
    package_path: &str,
) -> Result<bool, SetupError> {
    add_remote_file(fs, http, retry, BENCHMARK_PACKAGE_URL, package_path).await
}

/// Where [`setup_files`] places each artifact.
#[derive(Debug, Clone)]
pub struct SetupPaths {
    pub jar_path: String,
    pub init_script_path: String,
    pub package_path: String,
    /// The kit jar is only needed by clusters that generate data.
    pub include_kit_jar: bool,
}

/// Uploads the init script and the benchmark package, plus the benchmark kit
/// jar when asked to. Fails with [`SetupError::NotWritten`] naming the first artifact that did
/// not land.
pub async fn setup_files<F: DistributedFs>(
    fs: &F,
    http: &reqwest::Client,
    retry: &RetryPolicy,
    paths: &SetupPaths,
) -> Result<(), SetupError> {
    if !add_init_script(fs, &paths.init_script_path, &paths.jar_path).await? {
        return NotWrittenSnafu {
            path: paths.init_script_path.clone(),
        }
        .fail();
    }
    if paths.include_kit_jar && !add_benchmark_kit_jar(fs, http, retry, &paths.jar_path).await? {
        return NotWrittenSnafu {
            path: paths.jar_path.clone(),
        }
        .fail();
    }
    if !add_benchmark_package(fs, http, retry, &paths.package_path).await? {
        return NotWrittenSnafu {
            path: paths.package_path.clone(),
        }
        .fail();
    }
    tracing::info!("benchmark artifacts uploaded");
    Ok(())
}
