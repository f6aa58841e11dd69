use std::io::Write;
use std::path::{Path, PathBuf};
use std::{fs, str::FromStr};

use common::driver::{Config, ConfigError, Driver};
use common::fs::{Fs, MemoryDataProvider, Snapshot};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "attache";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const INDEX_FILE_NAME: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage engine settings, the `[driver]` table
    pub driver: Config,
    /// Default log level, `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Also write daily rolling log files here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl AppConfig {
    pub fn new(driver: Config) -> Self {
        Self {
            driver,
            log_level: default_log_level(),
            log_dir: None,
        }
    }

    /// The configured level, `WARN` if it does not parse
    pub fn level(&self) -> tracing::Level {
        tracing::Level::from_str(&self.log_level).unwrap_or(tracing::Level::WARN)
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the attache directory (~/.attache)
    pub attache_dir: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Path to the metadata snapshot
    pub index_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the attache directory path (custom or default ~/.attache)
    pub fn attache_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new attache directory with an empty index
    pub fn init(custom_path: Option<PathBuf>, config: AppConfig) -> Result<Self, StateError> {
        let attache_dir = Self::attache_dir(custom_path)?;

        if attache_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&attache_dir)?;

        let config_path = attache_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        let index_path = attache_dir.join(INDEX_FILE_NAME);
        write_atomic(&index_path, &serde_json::to_vec_pretty(&Snapshot::default())?)?;

        Ok(Self {
            attache_dir,
            config_path,
            index_path,
            config,
        })
    }

    /// Load existing state from the attache directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let attache_dir = Self::attache_dir(custom_path)?;

        if !attache_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_path = attache_dir.join(CONFIG_FILE_NAME);
        let index_path = attache_dir.join(INDEX_FILE_NAME);

        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            attache_dir,
            config_path,
            index_path,
            config,
        })
    }

    /// The metadata tree as last saved. A missing index is an empty tree,
    ///  a damaged chunk list is an error.
    pub fn load_index(&self) -> Result<MemoryDataProvider, StateError> {
        if !self.index_path.exists() {
            tracing::warn!(
                "no index at {}, starting from an empty tree",
                self.index_path.display()
            );
            return Ok(MemoryDataProvider::new());
        }
        let raw = fs::read(&self.index_path)?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;
        MemoryDataProvider::from_snapshot(snapshot)
            .map_err(|e| StateError::Index(e.to_string()))
    }

    /// Replace the saved index with the current tree
    pub fn save_index(&self, provider: &MemoryDataProvider) -> Result<(), StateError> {
        let snapshot = provider
            .snapshot()
            .map_err(|e| StateError::Index(e.to_string()))?;
        write_atomic(&self.index_path, &serde_json::to_vec_pretty(&snapshot)?)?;
        tracing::debug!(
            "saved {} entries to {}",
            snapshot.entries.len(),
            self.index_path.display()
        );
        Ok(())
    }

    /// A filesystem over the saved index, talking to the configured platform
    pub fn open_fs(&self) -> Result<Fs<MemoryDataProvider>, StateError> {
        let driver = Driver::new(&self.config.driver)?;
        Ok(Fs::new(self.load_index()?, driver))
    }

    pub fn save_fs(&self, fs: &Fs<MemoryDataProvider>) -> Result<(), StateError> {
        self.save_index(fs.provider())
    }
}

/// Write `data` next to `path`, then move it into place
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StateError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("attache directory not initialized. Run 'attache init' first")]
    NotInitialized,

    #[error("attache directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid driver configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("index error: {0}")]
    Index(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to replace file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
