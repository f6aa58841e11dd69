use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::file::File;
use crate::node::Node;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DataProviderError<T> {
    #[error("unhandled data provider error: {0}")]
    Provider(#[from] T),
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    /// Moving a directory below itself
    #[error("cannot move {from} into itself ({to})")]
    MoveIntoSelf { from: String, to: String },
    #[error("the root directory cannot be removed or moved")]
    RootImmutable,
    /// A chunk list whose indices are not exactly `0..n` in order.
    ///  Offsets are derived from list order, so this is never repaired.
    #[error("chunk list out of order: expected index {expected}, found {found}")]
    OutOfOrder { expected: u64, found: u64 },
    #[error("invalid id: {0}")]
    InvalidId(String),
}

/// Check that `nodes` are numbered `0..n` in order
pub fn check_order<T>(nodes: &[Node]) -> Result<(), DataProviderError<T>> {
    for (expected, node) in nodes.iter().enumerate() {
        let expected = expected as u64;
        if node.index != expected {
            return Err(DataProviderError::OutOfOrder {
                expected,
                found: node.index,
            });
        }
    }
    Ok(())
}

/// Storage for the filesystem tree and each file's chunk list.
///
/// Entries are addressed either by path or by id (base64 of the cleaned
///  path, see [`super::path::encode_id`]). Where a `parent` id is given
///  it must match the entry's actual parent.
///
/// Implementations must:
/// * always have the root directory `/`
/// * reject chunk lists failing [`check_order`] with `OutOfOrder`
/// * cascade renames and removals to every descendant
#[async_trait]
pub trait DataProvider: Send + Sync + std::fmt::Debug + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get an entry by id
    ///
    /// # Arguments
    /// * `id` - The id of the entry
    /// * `parent` - The id of its parent directory, if it should be checked
    async fn get(
        &self,
        id: &str,
        parent: Option<&str>,
    ) -> Result<File, DataProviderError<Self::Error>>;

    /// Direct children of the directory `id`, sorted by path
    async fn get_children(&self, id: &str) -> Result<Vec<File>, DataProviderError<Self::Error>>;

    /// Create an entry named `name` in the directory `parent`
    ///
    /// # Returns
    /// * `Err(DataProviderError::AlreadyExists)` - The name is taken
    /// * `Err(DataProviderError::NotFound)` - The parent does not exist
    /// * `Err(DataProviderError::NotADirectory)` - The parent is a file
    async fn create(
        &self,
        name: &str,
        parent: &str,
        dir: bool,
    ) -> Result<File, DataProviderError<Self::Error>>;

    /// Update the entry `id` to match `file`: a differing path renames it
    ///  (with its descendants), `mtime` is taken as is. Size follows the
    ///  chunk list and is not updated here.
    async fn update(
        &self,
        id: &str,
        parent: Option<&str>,
        file: File,
    ) -> Result<File, DataProviderError<Self::Error>>;

    /// Remove the entry `id` and everything below it
    async fn delete(&self, id: &str, parent: Option<&str>)
        -> Result<(), DataProviderError<Self::Error>>;

    async fn get_nodes(&self, id: &str) -> Result<Vec<Node>, DataProviderError<Self::Error>>;

    /// Replace the chunk list of file `id`, setting its size to match
    async fn set_nodes(
        &self,
        id: &str,
        nodes: Vec<Node>,
    ) -> Result<(), DataProviderError<Self::Error>>;

    /// Drop the chunk list of file `id`, leaving it empty
    async fn clear_nodes(&self, id: &str) -> Result<(), DataProviderError<Self::Error>>;

    async fn stat(&self, path: &str) -> Result<File, DataProviderError<Self::Error>>;

    /// A page of the direct children of `path`, sorted by path
    async fn ls(
        &self,
        path: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<File>, DataProviderError<Self::Error>>;

    /// Create an empty file, or bump the mtime of an existing entry
    async fn touch(&self, path: &str) -> Result<(), DataProviderError<Self::Error>>;

    async fn mkdir(&self, path: &str) -> Result<(), DataProviderError<Self::Error>>;

    async fn rm(&self, path: &str) -> Result<(), DataProviderError<Self::Error>>;

    async fn mv(&self, path: &str, new_path: &str) -> Result<(), DataProviderError<Self::Error>>;

    async fn chtime(
        &self,
        path: &str,
        time: DateTime<Utc>,
    ) -> Result<(), DataProviderError<Self::Error>>;
}
