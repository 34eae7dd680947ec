use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::{LotRecord, Stage};
use crate::error::StoreError;

/// Existence conditions on dotted field paths. A field holding `null` counts as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldFilter {
    pub exists: Vec<String>,
    pub missing: Vec<String>,
}

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(mut self, path: &str) -> Self {
        self.exists.push(path.to_string());
        self
    }

    pub fn missing(mut self, path: &str) -> Self {
        self.missing.push(path.to_string());
        self
    }

    /// Records sitting exactly at `stage`: every field up to it present, the next one absent
    pub fn at_stage(stage: Stage) -> Self {
        let mut filter = Stage::ALL
            .iter()
            .take_while(|&&s| s <= stage)
            .fold(Self::new(), |f, s| f.exists(s.field()));
        if let Some(next) = stage.next() {
            filter = filter.missing(next.field());
        }
        filter
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.exists.iter().all(|p| field_present(doc, p))
            && self.missing.iter().all(|p| !field_present(doc, p))
    }
}

/// Per-lot state persistence with partial-field updates
///
/// The pipeline commits through `set_field`/`unset_field` only. [`JsonDirStore`]
/// implements them as read, modify and rename of the whole file, so two concurrent
/// writers to the same record are last-writer-wins on the whole document, even
/// when they touch different fields. [`MemoryStore`] updates fields in place under a lock.
pub trait DocumentStore: Send + Sync {
    /// Create or replace a whole record
    fn insert(&self, record: &LotRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<LotRecord>>;
    /// Read a single dotted-path field; `None` if the record or field is absent
    fn get_field(&self, id: &str, path: &str) -> Result<Option<Value>>;
    fn set_field(&self, id: &str, path: &str, value: Value) -> Result<()>;
    fn unset_field(&self, id: &str, path: &str) -> Result<()>;
    /// Ids of all records, sorted
    fn ids(&self) -> Result<Vec<String>>;
    /// Ids of records matching the filter, sorted
    fn find(&self, filter: &FieldFilter) -> Result<Vec<String>>;
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(StoreError::InvalidField(path.to_string()).into());
    }
    Ok(parts)
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, key| node.get(key))
}

fn field_present(doc: &Value, path: &str) -> bool {
    lookup(doc, path).is_some_and(|v| !v.is_null())
}

/// Set `path` inside `doc`, creating intermediate objects as needed
pub(crate) fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let parts = split_path(path)?;
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| anyhow!("Empty field path"))?;

    let mut node = doc;
    for key in parents {
        let object = node
            .as_object_mut()
            .ok_or_else(|| anyhow!("Field {:?} crosses a non-object value", path))?;
        node = object
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
    }

    node.as_object_mut()
        .ok_or_else(|| anyhow!("Field {:?} crosses a non-object value", path))?
        .insert(last.to_string(), value);
    Ok(())
}

/// Remove `path` from `doc`; absent paths are not an error
pub(crate) fn unset_path(doc: &mut Value, path: &str) -> Result<()> {
    let parts = split_path(path)?;
    let Some((last, parents)) = parts.split_last() else {
        return Ok(());
    };

    let mut node = doc;
    for key in parents {
        match node.get_mut(*key) {
            Some(child) => node = child,
            None => return Ok(()),
        }
    }
    if let Some(object) = node.as_object_mut() {
        object.remove(*last);
    }
    Ok(())
}

fn to_record(doc: Value, id: &str) -> Result<LotRecord> {
    serde_json::from_value(doc).with_context(|| format!("Record {} does not deserialize", id))
}

/// In-process store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.docs
            .lock()
            .map_err(|_| anyhow!("document store lock poisoned"))
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&self, record: &LotRecord) -> Result<()> {
        let doc = serde_json::to_value(record)?;
        self.docs()?.insert(record.id.clone(), doc);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<LotRecord>> {
        let doc = self.docs()?.get(id).cloned();
        doc.map(|d| to_record(d, id)).transpose()
    }

    fn get_field(&self, id: &str, path: &str) -> Result<Option<Value>> {
        let docs = self.docs()?;
        Ok(docs
            .get(id)
            .and_then(|d| lookup(d, path))
            .filter(|v| !v.is_null())
            .cloned())
    }

    fn set_field(&self, id: &str, path: &str, value: Value) -> Result<()> {
        let mut docs = self.docs()?;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::MissingRecord(id.to_string()))?;
        set_path(doc, path, value)
    }

    fn unset_field(&self, id: &str, path: &str) -> Result<()> {
        let mut docs = self.docs()?;
        match docs.get_mut(id) {
            Some(doc) => unset_path(doc, path),
            None => Ok(()),
        }
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(self.docs()?.keys().cloned().collect())
    }

    fn find(&self, filter: &FieldFilter) -> Result<Vec<String>> {
        Ok(self
            .docs()?
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| id.clone())
            .collect())
    }
}

/// One pretty-printed JSON file per record under a directory
///
/// Writes go to a temporary file that is renamed over the record, so a crash
/// never leaves a half-written document behind.
#[derive(Debug)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create store directory: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()).into());
        }
        Ok(self.root.join(format!("{}.json", id)))
    }

    fn read(&self, id: &str) -> Result<Option<Value>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read record: {}", path.display()))?;
        let doc = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse record: {}", path.display()))?;
        Ok(Some(doc))
    }

    fn write(&self, id: &str, doc: &Value) -> Result<()> {
        let path = self.path_for(id)?;
        let tmp = self.root.join(format!(".{}.json.tmp", id));
        fs::write(&tmp, serde_json::to_string_pretty(doc)?)
            .with_context(|| format!("Failed to write record: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to commit record: {}", path.display()))
    }
}

impl DocumentStore for JsonDirStore {
    fn insert(&self, record: &LotRecord) -> Result<()> {
        self.write(&record.id, &serde_json::to_value(record)?)
    }

    fn get(&self, id: &str) -> Result<Option<LotRecord>> {
        self.read(id)?.map(|d| to_record(d, id)).transpose()
    }

    fn get_field(&self, id: &str, path: &str) -> Result<Option<Value>> {
        Ok(self
            .read(id)?
            .and_then(|d| lookup(&d, path).filter(|v| !v.is_null()).cloned()))
    }

    fn set_field(&self, id: &str, path: &str, value: Value) -> Result<()> {
        let mut doc = self
            .read(id)?
            .ok_or_else(|| StoreError::MissingRecord(id.to_string()))?;
        set_path(&mut doc, path, value)?;
        self.write(id, &doc)
    }

    fn unset_field(&self, id: &str, path: &str) -> Result<()> {
        let Some(mut doc) = self.read(id)? else {
            return Ok(());
        };
        unset_path(&mut doc, path)?;
        self.write(id, &doc)
    }

    fn ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list store: {}", self.root.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn find(&self, filter: &FieldFilter) -> Result<Vec<String>> {
        let mut matched = Vec::new();
        for id in self.ids()? {
            match self.read(&id) {
                Ok(Some(doc)) if filter.matches(&doc) => matched.push(id),
                Ok(_) => {}
                Err(e) => tracing::warn!(lot = %id, error = %e, "Skipping unreadable record"),
            }
        }
        Ok(matched)
    }
}
