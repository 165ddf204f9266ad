use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use walkdir::WalkDir;

use crate::record::RecordId;

pub const ID_PLACEHOLDER: &str = "{id}";

/// Read-only access to generated markup, one document per record id.
pub trait TemplateStore {
    /// `Ok(None)` when no document exists for `id`.
    fn read(&self, id: &RecordId) -> io::Result<Option<String>>;

    fn list_ids(&self) -> io::Result<Vec<RecordId>>;
}

/// Template documents stored as files named by a pattern such as `blog_{id}.html`.
#[derive(Debug, Clone)]
pub struct DirTemplateStore {
    dir: PathBuf,
    prefix: String,
    suffix: String,
}

impl DirTemplateStore {
    pub fn new(dir: impl Into<PathBuf>, pattern: &str) -> Result<Self> {
        let Some((prefix, suffix)) = pattern.split_once(ID_PLACEHOLDER) else {
            bail!("template pattern `{pattern}` must contain {ID_PLACEHOLDER}");
        };
        if suffix.contains(ID_PLACEHOLDER) {
            bail!("template pattern `{pattern}` must contain {ID_PLACEHOLDER} exactly once");
        }
        if prefix.contains(['/', '\\']) || suffix.contains(['/', '\\']) {
            bail!("template pattern `{pattern}` must be a plain file name");
        }
        Ok(Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name_for(&self, id: &RecordId) -> String {
        format!("{}{id}{}", self.prefix, self.suffix)
    }

    fn id_from_file_name(&self, name: &str) -> Option<RecordId> {
        let key = name.strip_prefix(&self.prefix)?.strip_suffix(&self.suffix)?;
        RecordId::from_key(key)
    }
}

impl TemplateStore for DirTemplateStore {
    fn read(&self, id: &RecordId) -> io::Result<Option<String>> {
        let name = self.file_name_for(id);
        // Text ids come from user data; never let one escape the template dir.
        if name.contains(['/', '\\']) || name.contains("..") {
            return Ok(None);
        }
        match fs::read_to_string(self.dir.join(name)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn list_ids(&self) -> io::Result<Vec<RecordId>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(id) = self.id_from_file_name(&name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
