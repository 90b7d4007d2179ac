//! On-disk library of uploaded documents.
//!
//! Raw bytes live under `<dir>/files/<id>.bin`; metadata for every document
//! is kept in a single `<dir>/index.toml`.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const DEFAULT_MEDIA_TYPE: &str = "application/pdf";
const INDEX_FILE: &str = "index.toml";
const FILES_DIR: &str = "files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocumentMeta {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(default = "default_media_type")]
    pub media_type: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

fn default_media_type() -> String {
    DEFAULT_MEDIA_TYPE.to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryIndex {
    #[serde(default)]
    documents: Vec<StoredDocumentMeta>,
}

/// Stable id for a document: the first 16 hex digits of its SHA-256.
pub fn document_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = format!("{:x}", hasher.finalize());
    hash[..16].to_string()
}

#[derive(Debug, Clone)]
pub struct LibraryStore {
    root: PathBuf,
}

impl LibraryStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let root = dir.into();
        fs::create_dir_all(root.join(FILES_DIR))
            .with_context(|| format!("Creating library directory {}", root.display()))?;
        debug!(path = %root.display(), "Opened document library");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` under `id`, replacing any earlier document with that id.
    pub fn save(&self, id: &str, name: &str, bytes: &[u8]) -> Result<StoredDocumentMeta> {
        validate_id(id)?;
        let path = self.file_path(id);
        fs::write(&path, bytes).with_context(|| format!("Writing {}", path.display()))?;

        let meta = StoredDocumentMeta {
            id: id.to_string(),
            name: name.to_string(),
            size: bytes.len() as u64,
            media_type: default_media_type(),
            created_at: now_millis(),
        };
        let mut index = self.load_index()?;
        index.documents.retain(|doc| doc.id != id);
        index.documents.push(meta.clone());
        self.write_index(&index)?;
        info!(id, name, size = meta.size, "Saved document to library");
        Ok(meta)
    }

    /// All stored documents, newest first.
    pub fn list(&self) -> Result<Vec<StoredDocumentMeta>> {
        let mut documents = self.load_index()?.documents;
        documents.reverse();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(documents)
    }

    pub fn meta(&self, id: &str) -> Result<Option<StoredDocumentMeta>> {
        Ok(self
            .load_index()?
            .documents
            .into_iter()
            .find(|doc| doc.id == id))
    }

    pub fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        validate_id(id)?;
        let path = self.file_path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Reading {}", path.display())),
        }
    }

    /// Remove a document. Returns whether anything was deleted.
    pub fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let mut index = self.load_index()?;
        let before = index.documents.len();
        index.documents.retain(|doc| doc.id != id);
        let listed = index.documents.len() != before;
        if listed {
            self.write_index(&index)?;
        }

        let path = self.file_path(id);
        let removed_file = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => {
                return Err(err).with_context(|| format!("Removing {}", path.display()));
            }
        };
        if listed != removed_file {
            warn!(id, listed, removed_file, "Library index and files were out of sync");
        }
        info!(id, "Removed document from library");
        Ok(listed || removed_file)
    }

    fn file_path(&self, id: &str) -> PathBuf {
        self.root.join(FILES_DIR).join(format!("{id}.bin"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn load_index(&self) -> Result<LibraryIndex> {
        let path = self.index_path();
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LibraryIndex::default());
            }
            Err(err) => return Err(err).with_context(|| format!("Reading {}", path.display())),
        };
        toml::from_str(&data).with_context(|| format!("Parsing {}", path.display()))
    }

    fn write_index(&self, index: &LibraryIndex) -> Result<()> {
        let path = self.index_path();
        let contents = toml::to_string(index).context("Serializing library index")?;
        fs::write(&path, contents).with_context(|| format!("Writing {}", path.display()))
    }
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if !valid {
        bail!("Invalid document id {id:?}");
    }
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
