// Store directory layout and optional YAML configuration

use crate::blob::{BlobStorage, FileBlobStorage, validate_key};
use crate::sqlite::SqliteBlobStorage;
use crate::store::DEFAULT_STORAGE_KEY;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the store directory created inside the store path
pub const STORE_DIR: &str = ".tasklist";

const CONFIG_FILE: &str = "config.yaml";
const DB_FILE: &str = "tasklist.db";

/// Which persistence backend holds the blob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    File,
    Sqlite,
}

/// Contents of `.tasklist/config.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage_key: String,
    pub backend: Backend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            backend: Backend::File,
        }
    }
}

impl Config {
    /// Read `config.yaml` from a store directory; a missing file means defaults
    pub fn load(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(CONFIG_FILE);
        if !path.exists() {
            debug!(path = ?path, "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse config YAML")?;
        validate_key(&config.storage_key)?;
        Ok(config)
    }
}

/// Create `<path>/.tasklist` with its `.gitignore`, returning the directory
pub fn prepare_store_dir(path: &Path) -> Result<PathBuf> {
    let dir = path.join(STORE_DIR);
    fs::create_dir_all(&dir).context("Failed to create store directory")?;

    let gitignore_path = dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(gitignore_path, "tasklist.db\ntasklist.db-shm\ntasklist.db-wal\n*.lock\n")?;
    }

    Ok(dir)
}

/// Open the backend selected by `config` inside `store_dir`
pub fn open_storage(store_dir: &Path, config: &Config) -> Result<Box<dyn BlobStorage>> {
    info!(dir = ?store_dir, backend = ?config.backend, key = %config.storage_key, "Opening task storage");

    let storage: Box<dyn BlobStorage> = match config.backend {
        Backend::File => Box::new(FileBlobStorage::open(store_dir)?),
        Backend::Sqlite => Box::new(SqliteBlobStorage::open(store_dir.join(DB_FILE))?),
    };

    Ok(storage)
}
