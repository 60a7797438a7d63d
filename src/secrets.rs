//! Persisted signing secrets.
//!
//! The token codec needs one long-lived HMAC key. [`SecretStore`] hands it
//! out, creating a 32-byte random value on first use. [`FileSecretStore`]
//! keeps each key hex-encoded in its own owner-only file; rotating the key
//! invalidates every token signed with the old one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::token::generate_secret;
use crate::{Error, Result};

/// Size of a freshly generated secret.
pub const SECRET_SIZE: usize = 32;

/// Source of named secrets.
pub trait SecretStore: Send + Sync {
    /// Return the secret stored under `key`, generating and persisting one
    /// if none exists yet.
    fn get_or_create(&self, key: &str) -> Result<Vec<u8>>;

    /// Replace the secret under `key` with a fresh one and return it.
    fn rotate(&self, key: &str) -> Result<Vec<u8>>;
}

/// Secrets stored as `<dir>/<key>` files holding lowercase hex.
#[derive(Debug)]
pub struct FileSecretStore {
    dir: PathBuf,
    /// Read-through cache for the process lifetime.
    cache: DashMap<String, Vec<u8>>,
}

impl FileSecretStore {
    /// Store rooted at `dir` (created on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
        }
    }

    /// Split a secret file path into a store for its directory and the key
    /// naming the file.
    pub fn for_file(path: impl AsRef<Path>) -> Result<(Self, String)> {
        let path = path.as_ref();
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Secret(format!("invalid secret path: {}", path.display())))?
            .to_string();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Ok((Self::new(dir), key))
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }

    fn read(path: &Path) -> Result<Vec<u8>> {
        let encoded = fs::read_to_string(path)?;
        let secret = hex::decode(encoded.trim())
            .map_err(|e| Error::Secret(format!("{}: not valid hex: {e}", path.display())))?;
        if secret.is_empty() {
            return Err(Error::Secret(format!("{}: secret is empty", path.display())));
        }
        Ok(secret)
    }

    fn create(&self, key: &str, path: &Path) -> Result<Vec<u8>> {
        let secret = generate_secret(SECRET_SIZE)?;
        fs::create_dir_all(&self.dir)?;
        write_private(path, hex::encode(&secret).as_bytes())?;
        self.cache.insert(key.to_string(), secret.clone());
        Ok(secret)
    }
}

impl SecretStore for FileSecretStore {
    fn get_or_create(&self, key: &str) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.get(key) {
            return Ok(cached.clone());
        }

        let path = self.path_for(key)?;
        if path.exists() {
            debug!(path = %path.display(), "Loaded signing secret");
            let secret = Self::read(&path)?;
            self.cache.insert(key.to_string(), secret.clone());
            return Ok(secret);
        }

        info!(path = %path.display(), "Generating new signing secret");
        self.create(key, &path)
    }

    fn rotate(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        info!(path = %path.display(), "Rotating signing secret");
        self.create(key, &path)
    }
}

/// In-memory store for tests and ephemeral servers.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: DashMap<String, Vec<u8>>,
}

impl MemorySecretStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get_or_create(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        if let Some(existing) = self.secrets.get(key) {
            return Ok(existing.clone());
        }
        let secret = generate_secret(SECRET_SIZE)?;
        Ok(self
            .secrets
            .entry(key.to_string())
            .or_insert(secret)
            .clone())
    }

    fn rotate(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let secret = generate_secret(SECRET_SIZE)?;
        self.secrets.insert(key.to_string(), secret.clone());
        Ok(secret)
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(Error::Secret(format!("invalid secret key: {key:?}")));
    }
    Ok(())
}

/// Write `contents` to `path` readable only by the owner.
///
/// Goes through a sibling temp file and a rename so readers never see a
/// partial file.
pub fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Secret(format!("invalid path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}
