use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;

/// Blob storage for images, point files and meshes, addressed by a relative path
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `path` and return a URL the object can be fetched from
    fn put(&self, path: &str, bytes: &[u8]) -> Result<String>;
    fn get(&self, path: &str) -> Result<Vec<u8>>;
    fn url(&self, path: &str) -> String;
}

/// Object keys are relative, slash-separated and never climb out of the store
fn check_key(path: &str) -> Result<()> {
    let p = Path::new(path);
    let ok = !path.is_empty() && p.components().all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(StoreError::InvalidKey(path.to_string()).into());
    }
    Ok(())
}

/// Objects as plain files below a root directory, served as `file://` URLs
#[derive(Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create object directory: {}", root.display()))?;
        let root = fs::canonicalize(root)
            .with_context(|| format!("Failed to resolve object directory: {}", root.display()))?;
        Ok(Self { root })
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<String> {
        check_key(path)?;
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)
            .with_context(|| format!("Failed to write object: {}", target.display()))?;
        Ok(self.url(path))
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        check_key(path)?;
        let target = self.root.join(path);
        fs::read(&target).with_context(|| format!("Failed to read object: {}", target.display()))
    }

    fn url(&self, path: &str) -> String {
        format!("file://{}", self.root.join(path).display())
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .lock()
            .map(|o| o.contains_key(path))
            .unwrap_or(false)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<String> {
        check_key(path)?;
        self.objects
            .lock()
            .map_err(|_| anyhow!("object store lock poisoned"))?
            .insert(path.to_string(), bytes.to_vec());
        Ok(self.url(path))
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        check_key(path)?;
        self.objects
            .lock()
            .map_err(|_| anyhow!("object store lock poisoned"))?
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::MissingObject(path.to_string()).into())
    }

    fn url(&self, path: &str) -> String {
        format!("memory://{}", path)
    }
}
