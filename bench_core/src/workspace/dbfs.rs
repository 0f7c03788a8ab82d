use crate::http::retry::HttpContext;
use crate::workspace::{Empty, WorkspaceClient, WorkspaceError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use serde::{Deserialize, Serialize};

/// Largest payload the DBFS API accepts in a single `put` or `add-block`.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DbfsFileInfo {
    pub path: String,
    pub is_dir: bool,
    #[serde(default)]
    pub file_size: i64,
    #[serde(default)]
    pub modification_time: i64,
}

#[derive(Deserialize, Debug, Default)]
struct DbfsListResponse {
    #[serde(default)]
    files: Option<Vec<DbfsFileInfo>>,
}

#[derive(Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    path: &'a str,
    contents: String,
    overwrite: bool,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    path: &'a str,
    overwrite: bool,
}

#[derive(Deserialize)]
struct CreateResponse {
    handle: i64,
}

#[derive(Serialize)]
struct AddBlockRequest {
    handle: i64,
    data: String,
}

#[derive(Serialize)]
struct CloseRequest {
    handle: i64,
}

/// Strips the `dbfs:` scheme; the REST API wants absolute paths.
pub fn api_path(path: &str) -> String {
    let without_scheme = path.strip_prefix("dbfs:").unwrap_or(path);
    format!("/{}", without_scheme.trim_start_matches('/'))
}

impl WorkspaceClient {
    /// Lists a directory, or returns the single entry when `path` is a file.
    /// A path that does not exist lists as empty.
    #[tracing::instrument(skip(self))]
    pub async fn dbfs_list(&self, path: &str) -> Result<Vec<DbfsFileInfo>, WorkspaceError> {
        let path = api_path(path);
        let result: Result<DbfsListResponse, _> =
            self.get("/api/2.0/dbfs/list", &[("path", path.as_str())]).await;
        match result {
            Ok(response) => Ok(response.files.unwrap_or_default()),
            Err(WorkspaceError::Api { error_code, .. })
                if error_code == "RESOURCE_DOES_NOT_EXIST" =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn dbfs_mkdirs(&self, path: &str) -> Result<(), WorkspaceError> {
        let path = api_path(path);
        let ctx = HttpContext::new(Method::POST, "/api/2.0/dbfs/mkdirs").idempotent();
        let _: Empty = self
            .post("/api/2.0/dbfs/mkdirs", &PathRequest { path: &path }, ctx)
            .await?;
        Ok(())
    }

    /// Writes `contents` in one call when it fits, otherwise through a
    /// create/add-block/close stream.
    #[tracing::instrument(skip(self, contents), fields(len = contents.len()))]
    pub async fn dbfs_put(
        &self,
        path: &str,
        contents: &[u8],
        overwrite: bool,
    ) -> Result<(), WorkspaceError> {
        if contents.len() > MAX_BLOCK_SIZE {
            let mut writer = self.dbfs_create(path, overwrite).await?;
            for block in contents.chunks(MAX_BLOCK_SIZE) {
                writer.add_block(block).await?;
            }
            return writer.close().await;
        }

        let api_path = api_path(path);
        let ctx = HttpContext::new(Method::POST, "/api/2.0/dbfs/put").idempotent();
        let request = PutRequest {
            path: &api_path,
            contents: STANDARD.encode(contents),
            overwrite,
        };
        let _: Empty = self.post("/api/2.0/dbfs/put", &request, ctx).await?;
        Ok(())
    }

    /// Opens a streaming upload handle.
    #[tracing::instrument(skip(self))]
    pub async fn dbfs_create(
        &self,
        path: &str,
        overwrite: bool,
    ) -> Result<DbfsWriter<'_>, WorkspaceError> {
        let path = api_path(path);
        let ctx = HttpContext::new(Method::POST, "/api/2.0/dbfs/create");
        let response: CreateResponse = self
            .post(
                "/api/2.0/dbfs/create",
                &CreateRequest {
                    path: &path,
                    overwrite,
                },
                ctx,
            )
            .await?;
        Ok(DbfsWriter {
            client: self,
            handle: response.handle,
            written: 0,
        })
    }
}

/// An open DBFS streaming upload. Blocks larger than [`MAX_BLOCK_SIZE`] are
/// split before sending.
pub struct DbfsWriter<'a> {
    client: &'a WorkspaceClient,
    handle: i64,
    written: usize,
}

impl DbfsWriter<'_> {
    pub async fn add_block(&mut self, data: &[u8]) -> Result<(), WorkspaceError> {
        for block in data.chunks(MAX_BLOCK_SIZE) {
            let ctx = HttpContext::new(Method::POST, "/api/2.0/dbfs/add-block");
            let request = AddBlockRequest {
                handle: self.handle,
                data: STANDARD.encode(block),
            };
            let _: Empty = self
                .client
                .post("/api/2.0/dbfs/add-block", &request, ctx)
                .await?;
            self.written += block.len();
        }
        Ok(())
    }

    pub async fn close(self) -> Result<(), WorkspaceError> {
        let ctx = HttpContext::new(Method::POST, "/api/2.0/dbfs/close").idempotent();
        let _: Empty = self
            .client
            .post("/api/2.0/dbfs/close", &CloseRequest { handle: self.handle }, ctx)
            .await?;
        tracing::debug!(handle = self.handle, bytes = self.written, "closed DBFS handle");
        Ok(())
    }
}
