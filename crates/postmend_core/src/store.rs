use std::collections::HashSet;
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::record::{ContentRecord, RecordId};

/// Fatal content-store failures. Anything here aborts the whole pass.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content store {location} is unavailable: {reason}")]
    Unavailable { location: String, reason: String },
    #[error("content store {location} has duplicate id {id}")]
    DuplicateId { location: String, id: RecordId },
}

impl StoreError {
    pub fn unavailable(location: impl Display, reason: impl Display) -> Self {
        Self::Unavailable {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub trait ContentStore {
    fn load_all(&self) -> Result<Vec<ContentRecord>, StoreError>;

    /// Replaces the whole collection. Readers never observe a partial write.
    fn save_all(&self, records: &[ContentRecord]) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

/// Validates raw JSON objects into records: every element must be an object with a
/// usable id, and ids must be unique.
pub fn records_from_values(
    location: &str,
    values: Vec<Value>,
) -> Result<Vec<ContentRecord>, StoreError> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(values.len());
    for (position, value) in values.into_iter().enumerate() {
        let Value::Object(fields) = value else {
            return Err(StoreError::unavailable(
                location,
                format!("entry {position} is not an object"),
            ));
        };
        let record = ContentRecord::from_fields(fields).ok_or_else(|| {
            StoreError::unavailable(location, format!("entry {position} has no usable id"))
        })?;
        if !seen.insert(record.id().clone()) {
            return Err(StoreError::DuplicateId {
                location: location.to_string(),
                id: record.id().clone(),
            });
        }
        records.push(record);
    }
    Ok(records)
}

/// Serializes records the way the editors write them: a 2-space indented array with
/// non-ASCII text left unescaped.
pub fn render_records(records: &[ContentRecord]) -> Result<String, serde_json::Error> {
    let values: Vec<Value> = records
        .iter()
        .map(|record| Value::Object(record.fields().clone()))
        .collect();
    serde_json::to_string_pretty(&values)
}

/// A JSON array file such as `static/data/blogs.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    backup_dir: Option<PathBuf>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_dir: None,
        }
    }

    /// Copy the current file into `dir` before every save.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    fn location(&self) -> String {
        normalize_path(&self.path)
    }

    fn write_backup(&self, dir: &Path) -> Result<Option<PathBuf>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::create_dir_all(dir).map_err(|err| {
            StoreError::unavailable(
                self.location(),
                format!("failed to create backup dir {}: {err}", dir.display()),
            )
        })?;
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "store".to_string());
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);

        let mut target = dir.join(format!("{stem}_{timestamp}.json"));
        let mut attempt = 1;
        while target.exists() {
            attempt += 1;
            target = dir.join(format!("{stem}_{timestamp}_{attempt}.json"));
        }
        fs::copy(&self.path, &target).map_err(|err| {
            StoreError::unavailable(
                self.location(),
                format!("failed to write backup {}: {err}", target.display()),
            )
        })?;
        Ok(Some(target))
    }
}

impl ContentStore for JsonFileStore {
    fn load_all(&self) -> Result<Vec<ContentRecord>, StoreError> {
        let location = self.location();
        let content = fs::read_to_string(&self.path)
            .map_err(|err| StoreError::unavailable(&location, format!("failed to read: {err}")))?;
        let root: Value = serde_json::from_str(&content)
            .map_err(|err| StoreError::unavailable(&location, format!("failed to parse: {err}")))?;
        let Value::Array(values) = root else {
            return Err(StoreError::unavailable(
                &location,
                "top-level JSON must be an array",
            ));
        };
        records_from_values(&location, values)
    }

    fn save_all(&self, records: &[ContentRecord]) -> Result<(), StoreError> {
        let location = self.location();
        let rendered = render_records(records)
            .map_err(|err| StoreError::unavailable(&location, format!("failed to serialize: {err}")))?;

        if let Some(dir) = &self.backup_dir
            && let Some(backup) = self.write_backup(dir)?
        {
            tracing::debug!(store = %location, backup = %backup.display(), "wrote store backup");
        }

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut staged = NamedTempFile::new_in(&parent).map_err(|err| {
            StoreError::unavailable(
                &location,
                format!("failed to stage write in {}: {err}", parent.display()),
            )
        })?;
        staged
            .write_all(rendered.as_bytes())
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|err| StoreError::unavailable(&location, format!("failed to write: {err}")))?;
        // The staged file is created owner-only; keep whatever mode the store had.
        if let Ok(metadata) = fs::metadata(&self.path) {
            staged
                .as_file()
                .set_permissions(metadata.permissions())
                .map_err(|err| {
                    StoreError::unavailable(&location, format!("failed to copy permissions: {err}"))
                })?;
        }
        staged
            .persist(&self.path)
            .map_err(|err| StoreError::unavailable(&location, format!("failed to replace: {}", err.error)))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.location()
    }
}

pub(crate) fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
