//! JSON document storage.
//!
//! Every persisted record is one JSON file addressed by path segments
//! under the instance root (`["message", session_id, message_id]` maps to
//! `message/<session>/<message>.json`). Writes go through a sibling temp
//! file and rename, best effort. There is no crash-consistent log.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use sy_domain::error::{Error, Result};

pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, segments: &[&str]) -> PathBuf {
        let mut path = self.root.clone();
        for segment in segments {
            path.push(segment);
        }
        path.set_extension("json");
        path
    }

    fn dir_path(&self, segments: &[&str]) -> PathBuf {
        let mut path = self.root.clone();
        for segment in segments {
            path.push(segment);
        }
        path
    }

    pub fn write<T: Serialize>(&self, segments: &[&str], value: &T) -> Result<()> {
        let path = self.file_path(segments);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec(value)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>> {
        let path = self.file_path(segments);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed record");
                Ok(None)
            }
        }
    }

    pub fn remove(&self, segments: &[&str]) -> Result<()> {
        let path = self.file_path(segments);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Remove a whole subtree (e.g. all parts of a session).
    pub fn remove_tree(&self, segments: &[&str]) -> Result<()> {
        let path = self.dir_path(segments);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    /// Sorted stems of the records directly under a directory. Record
    /// IDs are time-sortable, so this is also creation order.
    pub fn list(&self, segments: &[&str]) -> Result<Vec<String>> {
        let path = self.dir_path(segments);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut stems = Vec::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name
                .to_str()
                .ok_or_else(|| Error::Other("non-UTF-8 file name in storage".into()))?;
            if let Some(stem) = name.strip_suffix(".json") {
                stems.push(stem.to_string());
            }
        }
        stems.sort();
        Ok(stems)
    }

    /// Sorted subdirectory names (e.g. session IDs under `message/`).
    pub fn list_dirs(&self, segments: &[&str]) -> Result<Vec<String>> {
        let path = self.dir_path(segments);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
