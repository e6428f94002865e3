// Key-value blob persistence

use eyre::{Context, Result, eyre};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Persistence slot holding serialized blobs by key
pub trait BlobStorage {
    /// Read the blob stored under `key`, or `None` if nothing was ever written
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the blob stored under `key`. Must be durable before returning.
    fn set(&mut self, key: &str, blob: &str) -> Result<()>;
}

impl<S: BlobStorage + ?Sized> BlobStorage for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, blob: &str) -> Result<()> {
        (**self).set(key, blob)
    }
}

/// Validate a storage key. Keys end up in file names, so they are restricted.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(eyre!("Storage key cannot be empty"));
    }
    if key.len() > 64 {
        return Err(eyre!("Storage key too long: {} (max 64 chars)", key));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(eyre!("Invalid storage key: {} (must be alphanumeric with _/-)", key));
    }
    Ok(())
}

/// In-process storage, mostly for tests
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStorage {
    blobs: HashMap<String, String>,
    writes: usize,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with one blob (does not count as a write)
    pub fn with_blob(key: impl Into<String>, blob: impl Into<String>) -> Self {
        let mut blobs = HashMap::new();
        blobs.insert(key.into(), blob.into());
        Self { blobs, writes: 0 }
    }

    pub fn blob(&self, key: &str) -> Option<&str> {
        self.blobs.get(key).map(String::as_str)
    }

    /// Number of `set` calls so far
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl BlobStorage for MemoryBlobStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.get(key).cloned())
    }

    fn set(&mut self, key: &str, blob: &str) -> Result<()> {
        self.blobs.insert(key.to_string(), blob.to_string());
        self.writes += 1;
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileBlobStorage {
    dir: PathBuf,
}

impl FileBlobStorage {
    /// Open (creating if needed) a blob directory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create blob directory")?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }
}

impl BlobStorage for FileBlobStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;

        let path = self.blob_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let blob = fs::read_to_string(&path).context("Failed to read blob file")?;
        Ok(Some(blob))
    }

    fn set(&mut self, key: &str, blob: &str) -> Result<()> {
        validate_key(key)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(key))
            .context("Failed to open blob lock file")?;

        // Held until `lock` is dropped
        lock.lock_exclusive().context("Failed to acquire file lock")?;

        // Write beside the target, then rename over it
        let mut temp = NamedTempFile::new_in(&self.dir).context("Failed to create temporary blob file")?;
        temp.write_all(blob.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(self.blob_path(key)).context("Failed to replace blob file")?;

        debug!(key, bytes = blob.len(), "Wrote blob file");
        Ok(())
    }
}
