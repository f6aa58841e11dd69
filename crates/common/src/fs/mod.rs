/**
 * Virtual filesystem on top of the storage engine.
 *  A `DataProvider` keeps the tree and each file's
 *  chunk list, the `Driver` moves the bytes.
 */
mod file;
mod memory;
pub mod path;
mod provider;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::driver::Driver;
use crate::node::Node;
use crate::reader::{ReadError, Reader};
use crate::refresher::{RefreshError, RefreshReport};
use crate::rest::RestError;
use crate::writer::{ChunkWriter, WriteError};

pub use file::File;
pub use memory::{Entry, MemoryDataProvider, MemoryDataProviderError, Snapshot};
pub use provider::{check_order, DataProvider, DataProviderError};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("cannot move {from} into itself ({to})")]
    MoveIntoSelf { from: String, to: String },
    #[error("the root directory cannot be removed or moved")]
    RootImmutable,
    #[error("chunk list out of order: expected index {expected}, found {found}")]
    OutOfOrder { expected: u64, found: u64 },
    #[error("{path}: {} chunk(s) could not be re-signed", .unresolved.len())]
    Stale { path: String, unresolved: Vec<u64> },
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Rest(#[from] RestError),
}

impl<T: std::fmt::Display> From<DataProviderError<T>> for FsError {
    fn from(err: DataProviderError<T>) -> Self {
        match err {
            DataProviderError::Provider(e) => FsError::Provider(e.to_string()),
            DataProviderError::NotFound(p) => FsError::NotFound(p),
            DataProviderError::AlreadyExists(p) => FsError::AlreadyExists(p),
            DataProviderError::NotADirectory(p) => FsError::NotADirectory(p),
            DataProviderError::IsADirectory(p) => FsError::IsADirectory(p),
            DataProviderError::MoveIntoSelf { from, to } => FsError::MoveIntoSelf { from, to },
            DataProviderError::RootImmutable => FsError::RootImmutable,
            DataProviderError::OutOfOrder { expected, found } => {
                FsError::OutOfOrder { expected, found }
            }
            DataProviderError::InvalidId(id) => FsError::InvalidId(id),
        }
    }
}

/// Filesystem operations, with file contents stored through the driver
#[derive(Debug, Clone)]
pub struct Fs<P: DataProvider> {
    provider: P,
    driver: Driver,
}

impl<P: DataProvider> Fs<P> {
    pub fn new(provider: P, driver: Driver) -> Self {
        Self { provider, driver }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub async fn stat(&self, path: &str) -> Result<File, FsError> {
        Ok(self.provider.stat(path).await?)
    }

    pub async fn ls(
        &self,
        path: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<File>, FsError> {
        Ok(self.provider.ls(path, limit, offset).await?)
    }

    pub async fn touch(&self, path: &str) -> Result<(), FsError> {
        Ok(self.provider.touch(path).await?)
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), FsError> {
        Ok(self.provider.mkdir(path).await?)
    }

    pub async fn rm(&self, path: &str) -> Result<(), FsError> {
        tracing::debug!("fs: rm {}", path);
        Ok(self.provider.rm(path).await?)
    }

    pub async fn mv(&self, from: &str, to: &str) -> Result<(), FsError> {
        tracing::debug!("fs: mv {} -> {}", from, to);
        Ok(self.provider.mv(from, to).await?)
    }

    pub async fn chtime(&self, path: &str, time: DateTime<Utc>) -> Result<(), FsError> {
        Ok(self.provider.chtime(path, time).await?)
    }

    /// Drop the contents of a file
    pub async fn truncate(&self, path: &str) -> Result<(), FsError> {
        let file = self.regular_file(path).await?;
        self.provider.clear_nodes(&file.id).await?;
        self.provider.chtime(&file.path, Utc::now()).await?;
        Ok(())
    }

    /// The chunk list of a file, as stored
    pub async fn nodes(&self, path: &str) -> Result<Vec<Node>, FsError> {
        let file = self.regular_file(path).await?;
        Ok(self.provider.get_nodes(&file.id).await?)
    }

    /// Start writing `path` from scratch, creating it if needed.
    ///  Existing content is dropped right away. The new chunk list is
    ///  stored only when [`FileWriter::close`] succeeds, so a failed
    ///  write leaves the file empty.
    pub async fn create(&self, path: &str) -> Result<FileWriter<'_, P>, FsError> {
        match self.provider.stat(path).await {
            Ok(file) if file.dir => return Err(FsError::IsADirectory(file.path)),
            Ok(_) | Err(DataProviderError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.provider.touch(path).await?;
        let file = self.provider.stat(path).await?;
        self.provider.clear_nodes(&file.id).await?;

        let nodes = Arc::new(Mutex::new(Vec::new()));
        let sink = nodes.clone();
        let writer = self.driver.writer(move |node| sink.lock().push(node));

        Ok(FileWriter {
            fs: self,
            file,
            writer,
            nodes,
        })
    }

    /// Read `path` from `pos` to the end
    pub async fn open(&self, path: &str, pos: u64) -> Result<Reader, FsError> {
        let (_, nodes) = self.fresh_nodes(path).await?;
        Ok(self.driver.new_reader(nodes, pos))
    }

    /// Read `[start, end)` of `path`
    pub async fn open_range(&self, path: &str, start: u64, end: u64) -> Result<Reader, FsError> {
        let (_, nodes) = self.fresh_nodes(path).await?;
        Ok(self.driver.new_range_reader(nodes, start, end))
    }

    /// Re-sign the expired chunks of `path` and store the result.
    ///  Unresolved chunks are reported, not treated as an error.
    pub async fn refresh(&self, path: &str) -> Result<RefreshReport, FsError> {
        let file = self.regular_file(path).await?;
        let mut nodes = self.provider.get_nodes(&file.id).await?;
        let report = self.driver.update_nodes(&mut nodes).await?;
        if report.refreshed > 0 {
            self.provider.set_nodes(&file.id, nodes).await?;
        }
        Ok(report)
    }

    /// Store the nodes of a finished reader if it re-signed chunks
    pub async fn save_refreshed(&self, path: &str, reader: Reader) -> Result<(), FsError> {
        if !reader.is_refreshed() {
            return Ok(());
        }
        let file = self.regular_file(path).await?;
        self.provider
            .set_nodes(&file.id, reader.into_nodes())
            .await?;
        Ok(())
    }

    async fn regular_file(&self, path: &str) -> Result<File, FsError> {
        let file = self.provider.stat(path).await?;
        if file.dir {
            return Err(FsError::IsADirectory(file.path));
        }
        Ok(file)
    }

    /// The chunk list of `path` with every signature valid
    async fn fresh_nodes(&self, path: &str) -> Result<(File, Vec<Node>), FsError> {
        let file = self.regular_file(path).await?;
        let mut nodes = self.provider.get_nodes(&file.id).await?;

        let report = self.driver.update_nodes(&mut nodes).await?;
        if report.refreshed > 0 {
            tracing::debug!("fs: re-signed {} chunk(s) of {}", report.refreshed, file.path);
            self.provider.set_nodes(&file.id, nodes.clone()).await?;
        }
        if !report.is_resolved() {
            return Err(FsError::Stale {
                path: file.path,
                unresolved: report.unresolved,
            });
        }
        Ok((file, nodes))
    }
}

/// Write handle returned by [`Fs::create`]
pub struct FileWriter<'a, P: DataProvider> {
    fs: &'a Fs<P>,
    file: File,
    writer: Box<dyn ChunkWriter>,
    nodes: Arc<Mutex<Vec<Node>>>,
}

impl<P: DataProvider> std::fmt::Debug for FileWriter<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWriter")
            .field("path", &self.file.path)
            .field("written", &self.writer.written())
            .finish()
    }
}

impl<P: DataProvider> FileWriter<'_, P> {
    pub async fn write(&mut self, data: &[u8]) -> Result<(), FsError> {
        Ok(self.writer.write(data).await?)
    }

    pub fn written(&self) -> u64 {
        self.writer.written()
    }

    /// Finish the upload and store the chunk list, size and mtime.
    ///  Fails without storing anything if any chunk failed to upload.
    pub async fn close(mut self) -> Result<File, FsError> {
        self.writer.close().await?;
        let nodes = std::mem::take(&mut *self.nodes.lock());
        check_order::<P::Error>(&nodes)?;

        let provider = &self.fs.provider;
        provider.set_nodes(&self.file.id, nodes).await?;
        provider.chtime(&self.file.path, Utc::now()).await?;
        Ok(provider.stat(&self.file.path).await?)
    }
}
