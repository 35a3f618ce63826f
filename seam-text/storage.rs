use std::{
  collections::HashMap,
  path::{
    Path,
    PathBuf,
  },
};

use parking_lot::Mutex;
use ropey::Rope;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("uri is not loadable by this storage: {0}")]
  InvalidUri(String),
  #[error("no stored content for {0}")]
  NotFound(String),
  #[error("failed to read {uri}: {source}")]
  Read {
    uri:    String,
    source: std::io::Error,
  },
  #[error("failed to write {uri}: {source}")]
  Write {
    uri:    String,
    source: std::io::Error,
  },
}

/// How a resource relates to the workspace. Edits on workspace files go
/// through the file-change path; everything else stays an in-memory
/// document change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
  WorkspaceFile(PathBuf),
  External,
}

/// Backing store a [`crate::BufferManager`] loads from and commits to.
pub trait BufferStorage: Send + Sync {
  fn load(&self, uri: &str) -> Result<Rope, StorageError>;
  fn save(&self, uri: &str, text: &Rope) -> Result<(), StorageError>;
  fn classify(&self, uri: &str) -> ResourceKind;
}

/// Real filesystem storage rooted at a workspace directory. `file://`
/// URIs under the root are workspace files, any other resolvable path
/// is external.
pub struct FsStorage {
  workspace_root: PathBuf,
}

impl FsStorage {
  pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
    Self {
      workspace_root: workspace_root.into(),
    }
  }

  pub fn workspace_root(&self) -> &Path {
    &self.workspace_root
  }

  fn uri_to_path(uri: &str) -> Result<PathBuf, StorageError> {
    let parsed = url::Url::parse(uri).map_err(|_| StorageError::InvalidUri(uri.to_string()))?;
    if parsed.scheme() != "file" {
      return Err(StorageError::InvalidUri(uri.to_string()));
    }
    parsed
      .to_file_path()
      .map_err(|_| StorageError::InvalidUri(uri.to_string()))
  }
}

impl BufferStorage for FsStorage {
  fn load(&self, uri: &str) -> Result<Rope, StorageError> {
    let path = Self::uri_to_path(uri)?;
    let contents = std::fs::read_to_string(&path).map_err(|source| {
      StorageError::Read {
        uri: uri.to_string(),
        source,
      }
    })?;
    Ok(Rope::from(contents.as_str()))
  }

  fn save(&self, uri: &str, text: &Rope) -> Result<(), StorageError> {
    let path = Self::uri_to_path(uri)?;
    std::fs::write(&path, text.to_string()).map_err(|source| {
      StorageError::Write {
        uri: uri.to_string(),
        source,
      }
    })
  }

  fn classify(&self, uri: &str) -> ResourceKind {
    match Self::uri_to_path(uri) {
      Ok(path) if path.starts_with(&self.workspace_root) => ResourceKind::WorkspaceFile(path),
      _ => ResourceKind::External,
    }
  }
}

/// In-memory storage for tests and for resources with no file backing.
#[derive(Default)]
pub struct MemoryStorage {
  files:      Mutex<HashMap<String, String>>,
  save_count: Mutex<HashMap<String, usize>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, uri: impl Into<String>, contents: impl Into<String>) {
    self.files.lock().insert(uri.into(), contents.into());
  }

  pub fn contents(&self, uri: &str) -> Option<String> {
    self.files.lock().get(uri).cloned()
  }

  pub fn save_count(&self, uri: &str) -> usize {
    self.save_count.lock().get(uri).copied().unwrap_or(0)
  }
}

impl BufferStorage for MemoryStorage {
  fn load(&self, uri: &str) -> Result<Rope, StorageError> {
    self
      .files
      .lock()
      .get(uri)
      .map(|contents| Rope::from(contents.as_str()))
      .ok_or_else(|| StorageError::NotFound(uri.to_string()))
  }

  fn save(&self, uri: &str, text: &Rope) -> Result<(), StorageError> {
    self.files.lock().insert(uri.to_string(), text.to_string());
    *self.save_count.lock().entry(uri.to_string()).or_insert(0) += 1;
    Ok(())
  }

  fn classify(&self, _uri: &str) -> ResourceKind {
    ResourceKind::External
  }
}
