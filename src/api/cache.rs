use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Coordinates are quantized to 1e-5 degrees (~1 m) before lookup
const QUANTUM: f64 = 1e5;

/// Cache key: (lat, lon) rounded to a fixed grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuantizedKey {
    pub lat: i64,
    pub lon: i64,
}

impl QuantizedKey {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat: (lat * QUANTUM).round() as i64,
            lon: (lon * QUANTUM).round() as i64,
        }
    }

    fn encode(&self) -> String {
        format!("{}:{}", self.lat, self.lon)
    }

    fn decode(s: &str) -> Option<Self> {
        let (lat, lon) = s.split_once(':')?;
        Some(Self {
            lat: lat.parse().ok()?,
            lon: lon.parse().ok()?,
        })
    }
}

/// Key-value store for elevations, shared across worker threads
pub trait ElevationCache: Send + Sync {
    fn get(&self, key: &QuantizedKey) -> Option<f64>;
    fn put(&self, key: QuantizedKey, elevation: f64);
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<QuantizedKey, f64>>,
}

impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ElevationCache for MemoryCache {
    fn get(&self, key: &QuantizedKey) -> Option<f64> {
        self.entries.lock().ok()?.get(key).copied()
    }

    fn put(&self, key: QuantizedKey, elevation: f64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, elevation);
        }
    }
}

/// Cache persisted as a JSON object on disk, so re-runs skip known points
///
/// Entries are held in memory and written back by [`JsonFileCache::flush`].
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    inner: MemoryCache,
}

impl JsonFileCache {
    /// Open a cache file; a missing file starts empty
    pub fn open(path: &Path) -> Result<Self> {
        let inner = MemoryCache::default();

        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read elevation cache: {}", path.display()))?;
            let raw: HashMap<String, f64> = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse elevation cache: {}", path.display()))?;
            for (key, value) in raw {
                if let Some(key) = QuantizedKey::decode(&key) {
                    inner.put(key, value);
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    pub fn flush(&self) -> Result<()> {
        let raw: std::collections::BTreeMap<String, f64> = self
            .inner
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("elevation cache lock poisoned"))?
            .iter()
            .map(|(k, v)| (k.encode(), *v))
            .collect();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(&raw)?)
            .with_context(|| format!("Failed to write elevation cache: {}", self.path.display()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl ElevationCache for JsonFileCache {
    fn get(&self, key: &QuantizedKey) -> Option<f64> {
        self.inner.get(key)
    }

    fn put(&self, key: QuantizedKey, elevation: f64) {
        self.inner.put(key, elevation);
    }
}

impl<C: ElevationCache + ?Sized> ElevationCache for std::sync::Arc<C> {
    fn get(&self, key: &QuantizedKey) -> Option<f64> {
        (**self).get(key)
    }

    fn put(&self, key: QuantizedKey, elevation: f64) {
        (**self).put(key, elevation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_quantized_key_merges_nearby_points() {
        assert_eq!(
            QuantizedKey::new(-23.550001, -46.630001),
            QuantizedKey::new(-23.550003, -46.629998)
        );
        assert_ne!(
            QuantizedKey::new(-23.55, -46.63),
            QuantizedKey::new(-23.5501, -46.63)
        );
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryCache::default();
        let key = QuantizedKey::new(1.0, 2.0);
        assert_eq!(cache.get(&key), None);
        cache.put(key, 12.5);
        assert_eq!(cache.get(&key), Some(12.5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_json_file_cache_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache").join("elevation.json");

        let cache = JsonFileCache::open(&path).unwrap();
        assert!(cache.is_empty());
        cache.put(QuantizedKey::new(-23.55, -46.63), 760.25);
        cache.flush().unwrap();

        let reopened = JsonFileCache::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(
            reopened.get(&QuantizedKey::new(-23.55, -46.63)),
            Some(760.25)
        );
    }
}
