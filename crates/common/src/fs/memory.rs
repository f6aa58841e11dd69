use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::file::File;
use super::path;
use super::provider::{check_order, DataProvider, DataProviderError};
use crate::node::{total_size, Node};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryDataProviderError {
    #[error("memory provider error: {0}")]
    Internal(String),
    #[error("{path}: recorded size {size} does not match its chunks ({chunks} bytes)")]
    SizeMismatch { path: String, size: u64, chunks: u64 },
}

type Result<T> = std::result::Result<T, DataProviderError<MemoryDataProviderError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub file: File,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Serializable copy of the whole tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entries: Vec<Entry>,
}

/// In-memory provider, keyed by cleaned path
#[derive(Debug, Clone)]
pub struct MemoryDataProvider {
    inner: Arc<RwLock<MemoryDataProviderInner>>,
}

#[derive(Debug)]
struct MemoryDataProviderInner {
    entries: BTreeMap<String, Entry>,
}

impl Default for MemoryDataProviderInner {
    fn default() -> Self {
        let root = File::root();
        let mut entries = BTreeMap::new();
        entries.insert(
            root.path.clone(),
            Entry {
                file: root,
                nodes: Vec::new(),
            },
        );
        Self { entries }
    }
}

impl MemoryDataProviderInner {
    fn entry(&self, path: &str) -> Result<&Entry> {
        self.entries
            .get(path)
            .ok_or_else(|| DataProviderError::NotFound(path.to_string()))
    }

    fn entry_mut(&mut self, path: &str) -> Result<&mut Entry> {
        self.entries
            .get_mut(path)
            .ok_or_else(|| DataProviderError::NotFound(path.to_string()))
    }

    /// The entry behind `id`, checked against `parent` when given
    fn by_id(&self, id: &str, parent: Option<&str>) -> Result<&Entry> {
        let path = path::decode_id(id).ok_or_else(|| DataProviderError::InvalidId(id.to_string()))?;
        let entry = self.entry(&path)?;
        if let Some(parent) = parent {
            if entry.file.parent_id().as_deref() != Some(parent) {
                return Err(DataProviderError::NotFound(path));
            }
        }
        Ok(entry)
    }

    fn directory(&self, path: &str) -> Result<&Entry> {
        let entry = self.entry(path)?;
        if !entry.file.dir {
            return Err(DataProviderError::NotADirectory(path.to_string()));
        }
        Ok(entry)
    }

    fn regular_file_mut(&mut self, path: &str) -> Result<&mut Entry> {
        let entry = self.entry_mut(path)?;
        if entry.file.dir {
            return Err(DataProviderError::IsADirectory(path.to_string()));
        }
        Ok(entry)
    }

    fn children(&self, dir: &str) -> Vec<File> {
        self.entries
            .values()
            .filter(|e| path::is_direct_child(dir, &e.file.path))
            .map(|e| e.file.clone())
            .collect()
    }

    /// Insert a new entry below an existing directory
    fn insert(&mut self, path: &str, dir: bool) -> Result<File> {
        if self.entries.contains_key(path) {
            return Err(DataProviderError::AlreadyExists(path.to_string()));
        }
        let parent = path::parent(path).ok_or(DataProviderError::RootImmutable)?;
        self.directory(&parent)?;

        let file = File::new(path, dir, Utc::now());
        self.entries.insert(
            file.path.clone(),
            Entry {
                file: file.clone(),
                nodes: Vec::new(),
            },
        );
        Ok(file)
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        if path == path::ROOT {
            return Err(DataProviderError::RootImmutable);
        }
        self.entry(path)?;
        self.entries
            .retain(|key, _| key != path && !path::is_descendant(path, key));
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if from == path::ROOT || to == path::ROOT {
            return Err(DataProviderError::RootImmutable);
        }
        self.entry(from)?;
        if path::is_descendant(from, to) {
            return Err(DataProviderError::MoveIntoSelf {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if self.entries.contains_key(to) {
            return Err(DataProviderError::AlreadyExists(to.to_string()));
        }
        let parent = path::parent(to).ok_or(DataProviderError::RootImmutable)?;
        self.directory(&parent)?;

        let moved: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.as_str() == from || path::is_descendant(from, key))
            .cloned()
            .collect();
        for key in moved {
            if let Some(mut entry) = self.entries.remove(&key) {
                entry.file = entry.file.moved_to(&path::rebase(&key, from, to));
                self.entries.insert(entry.file.path.clone(), entry);
            }
        }
        Ok(())
    }
}

impl MemoryDataProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryDataProviderInner::default())),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryDataProviderInner>> {
        self.inner.read().map_err(|e| {
            DataProviderError::Provider(MemoryDataProviderError::Internal(format!(
                "failed to acquire read lock: {}",
                e
            )))
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryDataProviderInner>> {
        self.inner.write().map_err(|e| {
            DataProviderError::Provider(MemoryDataProviderError::Internal(format!(
                "failed to acquire write lock: {}",
                e
            )))
        })
    }

    /// Copy of every entry, for persistence
    pub fn snapshot(&self) -> Result<Snapshot> {
        let inner = self.read()?;
        Ok(Snapshot {
            entries: inner.entries.values().cloned().collect(),
        })
    }

    /// Rebuild a provider from a snapshot. Ids and parents are
    ///  derived again from the stored paths; entries whose parent
    ///  directory is missing are dropped. A chunk list that is out of
    ///  order or disagrees with the recorded size fails the whole load.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut inner = MemoryDataProviderInner::default();
        let mut entries = snapshot.entries;
        for entry in entries.iter_mut() {
            entry.file.rederive();
        }
        // parents before children
        entries.sort_by(|a, b| a.file.path.cmp(&b.file.path));

        for mut entry in entries {
            if entry.file.is_root() {
                entry.file.dir = true;
                entry.nodes.clear();
            } else {
                let parent_is_dir = entry
                    .file
                    .parent
                    .as_deref()
                    .and_then(|p| inner.entries.get(p))
                    .is_some_and(|p| p.file.dir);
                if !parent_is_dir {
                    tracing::warn!(
                        "memory provider: dropping orphaned entry {}",
                        entry.file.path
                    );
                    continue;
                }
                check_entry(&entry)?;
            }
            inner.entries.insert(entry.file.path.clone(), entry);
        }

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }
}

fn check_entry(entry: &Entry) -> Result<()> {
    let path = &entry.file.path;
    if let Err(e) = check_order(&entry.nodes) {
        tracing::error!("memory provider: chunk list of {} is out of order", path);
        return Err(e);
    }
    let chunks = total_size(&entry.nodes);
    if !entry.file.dir && entry.file.size != chunks {
        return Err(MemoryDataProviderError::SizeMismatch {
            path: path.clone(),
            size: entry.file.size,
            chunks,
        }
        .into());
    }
    Ok(())
}

impl Default for MemoryDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataProvider for MemoryDataProvider {
    type Error = MemoryDataProviderError;

    async fn get(&self, id: &str, parent: Option<&str>) -> Result<File> {
        let inner = self.read()?;
        Ok(inner.by_id(id, parent)?.file.clone())
    }

    async fn get_children(&self, id: &str) -> Result<Vec<File>> {
        let inner = self.read()?;
        let dir = inner.by_id(id, None)?.file.path.clone();
        inner.directory(&dir)?;
        Ok(inner.children(&dir))
    }

    async fn create(&self, name: &str, parent: &str, dir: bool) -> Result<File> {
        let mut inner = self.write()?;
        let parent = inner.by_id(parent, None)?.file.path.clone();
        let path = path::join(&parent, name);
        if path == parent {
            return Err(DataProviderError::AlreadyExists(path));
        }
        inner.insert(&path, dir)
    }

    async fn update(&self, id: &str, parent: Option<&str>, file: File) -> Result<File> {
        let mut inner = self.write()?;
        let current = inner.by_id(id, parent)?.file.path.clone();
        let target = path::clean(&file.path);
        if target != current {
            inner.rename(&current, &target)?;
        }
        let entry = inner.entry_mut(&target)?;
        entry.file.mtime = file.mtime;
        Ok(entry.file.clone())
    }

    async fn delete(&self, id: &str, parent: Option<&str>) -> Result<()> {
        let mut inner = self.write()?;
        let path = inner.by_id(id, parent)?.file.path.clone();
        inner.remove(&path)
    }

    async fn get_nodes(&self, id: &str) -> Result<Vec<Node>> {
        let inner = self.read()?;
        let entry = inner.by_id(id, None)?;
        if entry.file.dir {
            return Err(DataProviderError::IsADirectory(entry.file.path.clone()));
        }
        Ok(entry.nodes.clone())
    }

    async fn set_nodes(&self, id: &str, nodes: Vec<Node>) -> Result<()> {
        check_order(&nodes)?;
        let mut inner = self.write()?;
        let path = inner.by_id(id, None)?.file.path.clone();
        let entry = inner.regular_file_mut(&path)?;
        entry.file.size = total_size(&nodes);
        entry.nodes = nodes;
        Ok(())
    }

    async fn clear_nodes(&self, id: &str) -> Result<()> {
        let mut inner = self.write()?;
        let path = inner.by_id(id, None)?.file.path.clone();
        let entry = inner.regular_file_mut(&path)?;
        entry.file.size = 0;
        entry.nodes.clear();
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<File> {
        let inner = self.read()?;
        Ok(inner.entry(&path::clean(path))?.file.clone())
    }

    async fn ls(&self, path: &str, limit: Option<usize>, offset: usize) -> Result<Vec<File>> {
        let inner = self.read()?;
        let path = path::clean(path);
        inner.directory(&path)?;
        Ok(inner
            .children(&path)
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn touch(&self, path: &str) -> Result<()> {
        let mut inner = self.write()?;
        let path = path::clean(path);
        match inner.entries.get_mut(&path) {
            Some(entry) => {
                entry.file.mtime = Utc::now();
                Ok(())
            }
            None => inner.insert(&path, false).map(|_| ()),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.insert(&path::clean(path), true).map(|_| ())
    }

    async fn rm(&self, path: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.remove(&path::clean(path))
    }

    async fn mv(&self, path: &str, new_path: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner.rename(&path::clean(path), &path::clean(new_path))
    }

    async fn chtime(&self, path: &str, time: DateTime<Utc>) -> Result<()> {
        let mut inner = self.write()?;
        inner.entry_mut(&path::clean(path))?.file.mtime = time;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: u64, size: u64) -> Node {
        Node {
            url: format!("https://cdn.example.com/attachments/1/{}/a", index),
            ex: 0,
            is: "0".to_string(),
            hm: "0".to_string(),
            mid: 100 + index,
            size,
            index,
        }
    }

    async fn tree() -> MemoryDataProvider {
        let provider = MemoryDataProvider::new();
        provider.mkdir("/a").await.unwrap();
        provider.mkdir("/a/b").await.unwrap();
        provider.touch("/a/b/f1").await.unwrap();
        provider.touch("/a/f2").await.unwrap();
        provider.touch("/ab").await.unwrap();
        provider
    }

    fn paths(files: &[File]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_root_always_exists() {
        let provider = MemoryDataProvider::new();
        let root = provider.stat("/").await.unwrap();
        assert!(root.dir);
        assert_eq!(provider.rm("/").await, Err(DataProviderError::RootImmutable));
        assert_eq!(
            provider.mv("/", "/x").await,
            Err(DataProviderError::RootImmutable)
        );
    }

    #[tokio::test]
    async fn test_ls_lists_direct_children_only() {
        let provider = tree().await;
        assert_eq!(paths(&provider.ls("/", None, 0).await.unwrap()), ["/a", "/ab"]);
        assert_eq!(
            paths(&provider.ls("/a", None, 0).await.unwrap()),
            ["/a/b", "/a/f2"]
        );
        assert!(matches!(
            provider.ls("/ab", None, 0).await,
            Err(DataProviderError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_ls_pagination() {
        let provider = MemoryDataProvider::new();
        for i in 0..7 {
            provider.touch(&format!("/f{}", i)).await.unwrap();
        }
        let page = provider.ls("/", Some(3), 0).await.unwrap();
        assert_eq!(paths(&page), ["/f0", "/f1", "/f2"]);
        let page = provider.ls("/", Some(3), 6).await.unwrap();
        assert_eq!(paths(&page), ["/f6"]);
        assert!(provider.ls("/", Some(3), 9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_parent_directory() {
        let provider = tree().await;
        assert!(matches!(
            provider.touch("/missing/f").await,
            Err(DataProviderError::NotFound(_))
        ));
        assert!(matches!(
            provider.mkdir("/ab/c").await,
            Err(DataProviderError::NotADirectory(_))
        ));
        assert!(matches!(
            provider.mkdir("/a").await,
            Err(DataProviderError::AlreadyExists(_))
        ));

        let a = path::encode_id("/a");
        let created = provider.create("new", &a, false).await.unwrap();
        assert_eq!(created.path, "/a/new");
        assert_eq!(created.parent_id(), Some(a));
    }

    #[tokio::test]
    async fn test_touch_bumps_mtime() {
        let provider = tree().await;
        let old = Utc::now() - chrono::Duration::days(1);
        provider.chtime("/a/f2", old).await.unwrap();
        provider.touch("/a/f2").await.unwrap();
        assert!(provider.stat("/a/f2").await.unwrap().mtime > old);
    }

    #[tokio::test]
    async fn test_mv_cascades() {
        let provider = tree().await;
        provider.set_nodes(&path::encode_id("/a/b/f1"), vec![node(0, 4)]).await.unwrap();

        provider.mkdir("/z").await.unwrap();
        provider.mv("/a", "/z/a2").await.unwrap();

        assert!(matches!(
            provider.stat("/a/b/f1").await,
            Err(DataProviderError::NotFound(_))
        ));
        let moved = provider.stat("/z/a2/b/f1").await.unwrap();
        assert_eq!(moved.id, path::encode_id("/z/a2/b/f1"));
        assert_eq!(moved.parent.as_deref(), Some("/z/a2/b"));
        assert_eq!(moved.size, 4);
        assert_eq!(provider.get_nodes(&moved.id).await.unwrap(), vec![node(0, 4)]);
        // siblings sharing a prefix stay put
        assert!(provider.stat("/ab").await.is_ok());
        assert_eq!(
            paths(&provider.ls("/z/a2", None, 0).await.unwrap()),
            ["/z/a2/b", "/z/a2/f2"]
        );
    }

    #[tokio::test]
    async fn test_mv_rejections() {
        let provider = tree().await;
        assert!(matches!(
            provider.mv("/a", "/a/b/c").await,
            Err(DataProviderError::MoveIntoSelf { .. })
        ));
        assert!(matches!(
            provider.mv("/a/f2", "/ab").await,
            Err(DataProviderError::AlreadyExists(_))
        ));
        assert!(matches!(
            provider.mv("/a/f2", "/nope/f2").await,
            Err(DataProviderError::NotFound(_))
        ));
        assert!(matches!(
            provider.mv("/missing", "/x").await,
            Err(DataProviderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rm_is_recursive() {
        let provider = tree().await;
        provider.rm("/a").await.unwrap();
        assert_eq!(paths(&provider.ls("/", None, 0).await.unwrap()), ["/ab"]);
        assert!(provider.stat("/a/b/f1").await.is_err());
    }

    #[tokio::test]
    async fn test_nodes_order_is_enforced() {
        let provider = tree().await;
        let id = path::encode_id("/ab");

        assert_eq!(
            provider.set_nodes(&id, vec![node(1, 2), node(0, 2)]).await,
            Err(DataProviderError::OutOfOrder {
                expected: 0,
                found: 1
            })
        );
        assert_eq!(provider.stat("/ab").await.unwrap().size, 0);

        provider.set_nodes(&id, vec![node(0, 2), node(1, 3)]).await.unwrap();
        assert_eq!(provider.stat("/ab").await.unwrap().size, 5);

        provider.clear_nodes(&id).await.unwrap();
        assert_eq!(provider.stat("/ab").await.unwrap().size, 0);
        assert!(provider.get_nodes(&id).await.unwrap().is_empty());

        assert!(matches!(
            provider.set_nodes(&path::encode_id("/a"), vec![]).await,
            Err(DataProviderError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_get_checks_parent() {
        let provider = tree().await;
        let id = path::encode_id("/a/f2");
        assert!(provider.get(&id, Some(&path::encode_id("/a"))).await.is_ok());
        assert!(matches!(
            provider.get(&id, Some(&path::encode_id("/"))).await,
            Err(DataProviderError::NotFound(_))
        ));
        assert!(matches!(
            provider.get("%%%", None).await,
            Err(DataProviderError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_update_renames_and_sets_mtime() {
        let provider = tree().await;
        let id = path::encode_id("/a/f2");
        let mut file = provider.get(&id, None).await.unwrap();
        let mtime = Utc::now() - chrono::Duration::hours(3);
        file.path = "/a/b/f3".to_string();
        file.mtime = mtime;

        let updated = provider.update(&id, None, file).await.unwrap();
        assert_eq!(updated.path, "/a/b/f3");
        assert_eq!(updated.mtime, mtime);
        assert!(provider.stat("/a/f2").await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_rederives_ids() {
        let provider = tree().await;
        provider
            .set_nodes(&path::encode_id("/a/f2"), vec![node(0, 9)])
            .await
            .unwrap();

        let mut snapshot = provider.snapshot().unwrap();
        // corrupt derived fields and add an orphan, both get repaired on load
        for entry in snapshot.entries.iter_mut() {
            entry.file.id = "bogus".to_string();
        }
        snapshot.entries.push(Entry {
            file: File::new("/ghost/f", false, Utc::now()),
            nodes: vec![],
        });
        let json = serde_json::to_string(&snapshot).unwrap();

        let restored =
            MemoryDataProvider::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        let f2 = restored.stat("/a/f2").await.unwrap();
        assert_eq!(f2.id, path::encode_id("/a/f2"));
        assert_eq!(f2.size, 9);
        assert_eq!(restored.get_nodes(&f2.id).await.unwrap(), vec![node(0, 9)]);
        assert!(restored.stat("/ghost/f").await.is_err());
        assert_eq!(
            paths(&restored.ls("/", None, 0).await.unwrap()),
            ["/a", "/ab"]
        );
    }

    #[tokio::test]
    async fn test_snapshot_rejects_reordered_chunks() {
        let provider = tree().await;
        provider
            .set_nodes(
                &path::encode_id("/a/f2"),
                vec![node(0, 4), node(1, 4), node(2, 1)],
            )
            .await
            .unwrap();

        let mut snapshot = provider.snapshot().unwrap();
        let entry = snapshot
            .entries
            .iter_mut()
            .find(|e| e.file.path == "/a/f2")
            .unwrap();
        entry.nodes.swap(0, 2);

        assert_eq!(
            MemoryDataProvider::from_snapshot(snapshot).unwrap_err(),
            DataProviderError::OutOfOrder {
                expected: 0,
                found: 2
            }
        );
    }

    #[tokio::test]
    async fn test_snapshot_rejects_size_mismatch() {
        let provider = tree().await;
        provider
            .set_nodes(&path::encode_id("/a/f2"), vec![node(0, 4), node(1, 4)])
            .await
            .unwrap();

        let mut snapshot = provider.snapshot().unwrap();
        let entry = snapshot
            .entries
            .iter_mut()
            .find(|e| e.file.path == "/a/f2")
            .unwrap();
        entry.nodes.pop();

        assert!(matches!(
            MemoryDataProvider::from_snapshot(snapshot),
            Err(DataProviderError::Provider(
                MemoryDataProviderError::SizeMismatch {
                    size: 8,
                    chunks: 4,
                    ..
                }
            ))
        ));
    }
}
