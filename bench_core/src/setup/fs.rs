//! Storage backends the setup helper writes through.

use crate::setup::{IoSnafu, SetupError, WorkspaceSnafu};
use crate::workspace::WorkspaceClient;
use crate::workspace::dbfs::{DbfsWriter, MAX_BLOCK_SIZE};
use snafu::ResultExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// The slice of a distributed filesystem the setup helper needs.
#[allow(async_fn_in_trait)]
pub trait DistributedFs {
    type Writer<'a>: FileWriter
    where
        Self: 'a;

    /// Entry names under `path`; a file lists as itself, a missing path as empty.
    async fn ls(&self, path: &str) -> Result<Vec<String>, SetupError>;

    async fn mkdirs(&self, path: &str) -> Result<(), SetupError>;

    async fn put(&self, path: &str, contents: &[u8], overwrite: bool) -> Result<(), SetupError>;

    /// Opens `path` for a streamed, overwriting write.
    async fn write_stream(&self, path: &str) -> Result<Self::Writer<'_>, SetupError>;
}

#[allow(async_fn_in_trait)]
pub trait FileWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), SetupError>;

    async fn finish(self) -> Result<(), SetupError>;

    /// Releases the destination after a failed write, dropping buffered data.
    async fn abort(self);
}

/// Maps a storage path onto the node-local FUSE mount:
/// `dbfs:/a/b`, `/a/b` and `/dbfs/a/b` all become `/dbfs/a/b`.
pub fn clean_path_for_native(path: &str) -> String {
    let path = path.strip_prefix("dbfs:").unwrap_or(path);
    let path = path.trim_start_matches('/');
    let path = path.strip_prefix("dbfs/").unwrap_or(path);
    format!("/dbfs/{}", path.trim_start_matches('/'))
}

/// DBFS reached through the workspace REST API.
pub struct DbfsFs {
    client: WorkspaceClient,
}

impl DbfsFs {
    pub fn new(client: WorkspaceClient) -> Self {
        Self { client }
    }
}

impl DistributedFs for DbfsFs {
    type Writer<'a> = BufferedDbfsWriter<'a>;

    async fn ls(&self, path: &str) -> Result<Vec<String>, SetupError> {
        let entries = self.client.dbfs_list(path).await.context(WorkspaceSnafu)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                entry
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect())
    }

    async fn mkdirs(&self, path: &str) -> Result<(), SetupError> {
        self.client.dbfs_mkdirs(path).await.context(WorkspaceSnafu)
    }

    async fn put(&self, path: &str, contents: &[u8], overwrite: bool) -> Result<(), SetupError> {
        self.client
            .dbfs_put(path, contents, overwrite)
            .await
            .context(WorkspaceSnafu)
    }

    async fn write_stream(&self, path: &str) -> Result<BufferedDbfsWriter<'_>, SetupError> {
        let inner = self
            .client
            .dbfs_create(path, true)
            .await
            .context(WorkspaceSnafu)?;
        Ok(BufferedDbfsWriter {
            inner,
            buffer: Vec::with_capacity(MAX_BLOCK_SIZE),
        })
    }
}

/// Collects small download chunks into full-size DBFS blocks.
pub struct BufferedDbfsWriter<'a> {
    inner: DbfsWriter<'a>,
    buffer: Vec<u8>,
}

impl FileWriter for BufferedDbfsWriter<'_> {
    async fn write(&mut self, data: &[u8]) -> Result<(), SetupError> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= MAX_BLOCK_SIZE {
            let block = std::mem::take(&mut self.buffer);
            self.inner.add_block(&block).await.context(WorkspaceSnafu)?;
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<(), SetupError> {
        if !self.buffer.is_empty() {
            let block = std::mem::take(&mut self.buffer);
            self.inner.add_block(&block).await.context(WorkspaceSnafu)?;
        }
        self.inner.close().await.context(WorkspaceSnafu)
    }

    async fn abort(self) {
        if let Err(e) = self.inner.close().await {
            tracing::warn!(error = %snafu::Report::from_error(e), "could not close abandoned DBFS handle");
        }
    }
}

/// DBFS through its FUSE mount (`/dbfs` on cluster nodes). `root` is
/// prepended to every mapped path, `/` in production.
pub struct MountedFs {
    root: PathBuf,
}

impl MountedFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn native_path(&self, path: &str) -> PathBuf {
        self.root
            .join(clean_path_for_native(path).trim_start_matches('/'))
    }
}

impl DistributedFs for MountedFs {
    type Writer<'a> = MountedWriter;

    async fn ls(&self, path: &str) -> Result<Vec<String>, SetupError> {
        let native = self.native_path(path);
        let metadata = match tokio::fs::metadata(&native).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context(IoSnafu { path: native }),
        };
        if metadata.is_file() {
            let name = native
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(vec![name]);
        }

        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&native)
            .await
            .context(IoSnafu { path: native.clone() })?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context(IoSnafu { path: native.clone() })?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn mkdirs(&self, path: &str) -> Result<(), SetupError> {
        let native = self.native_path(path);
        tokio::fs::create_dir_all(&native)
            .await
            .context(IoSnafu { path: native })
    }

    async fn put(&self, path: &str, contents: &[u8], overwrite: bool) -> Result<(), SetupError> {
        let native = self.native_path(path);
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options
            .open(&native)
            .await
            .context(IoSnafu { path: native.clone() })?;
        file.write_all(contents)
            .await
            .context(IoSnafu { path: native.clone() })?;
        file.flush().await.context(IoSnafu { path: native })
    }

    async fn write_stream(&self, path: &str) -> Result<MountedWriter, SetupError> {
        let native = self.native_path(path);
        let file = tokio::fs::File::create(&native)
            .await
            .context(IoSnafu { path: native.clone() })?;
        Ok(MountedWriter { file, path: native })
    }
}

pub struct MountedWriter {
    file: tokio::fs::File,
    path: PathBuf,
}

impl FileWriter for MountedWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), SetupError> {
        self.file.write_all(data).await.context(IoSnafu {
            path: self.path.clone(),
        })
    }

    async fn finish(mut self) -> Result<(), SetupError> {
        self.file.flush().await.context(IoSnafu { path: self.path })
    }

    async fn abort(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %e, "could not remove partial file");
        }
    }
}
