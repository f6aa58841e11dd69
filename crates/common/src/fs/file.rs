use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::path;

/// A file or directory in the virtual filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// base64 of `path`
    pub id: String,
    pub path: String,
    /// Directory component of `path`, `None` for the root
    pub parent: Option<String>,
    pub dir: bool,
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

impl File {
    pub fn new(path: &str, dir: bool, mtime: DateTime<Utc>) -> Self {
        let path = path::clean(path);
        Self {
            id: path::encode_id(&path),
            parent: path::parent(&path),
            path,
            dir,
            size: 0,
            mtime,
        }
    }

    pub fn root() -> Self {
        Self::new(path::ROOT, true, Utc::now())
    }

    pub fn is_root(&self) -> bool {
        self.path == path::ROOT
    }

    pub fn name(&self) -> String {
        path::file_name(&self.path)
    }

    pub fn parent_id(&self) -> Option<String> {
        self.parent.as_deref().map(path::encode_id)
    }

    /// Recompute `id` and `parent` from `path`
    pub fn rederive(&mut self) {
        self.path = path::clean(&self.path);
        self.id = path::encode_id(&self.path);
        self.parent = path::parent(&self.path);
    }

    /// The same entry at another path
    pub fn moved_to(&self, new_path: &str) -> Self {
        let mut file = self.clone();
        file.path = new_path.to_string();
        file.rederive();
        file
    }
}

impl std::fmt::Display for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.dir { 'd' } else { '-' };
        write!(
            f,
            "{} {:>12} {} {}",
            kind,
            self.size,
            self.mtime.format("%Y-%m-%d %H:%M:%S"),
            self.path
        )
    }
}
