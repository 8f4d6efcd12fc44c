//! Where an artifact lives.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which storage backend produced a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Local filesystem under a root directory.
    Local,
    /// Remote S3-compatible object store.
    ObjectStore,
    /// Process-local map, used by tests.
    Memory,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::ObjectStore => "object_store",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown storage backend: {0:?} (expected \"local\" or \"object_store\")")]
pub struct ParseBackendKindError(String);

impl FromStr for BackendKind {
    type Err = ParseBackendKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" | "filesystem" => Ok(BackendKind::Local),
            "object_store" | "objectstore" | "s3" | "gcs" => Ok(BackendKind::ObjectStore),
            "memory" => Ok(BackendKind::Memory),
            _ => Err(ParseBackendKindError(s.to_string())),
        }
    }
}

/// `{backend kind, path or key}`.
///
/// Opaque to everyone except the backend that produced it. Consumers pass it back
/// to the same backend; they never interpret `path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    backend: BackendKind,
    path: String,
}

impl StorageLocation {
    pub fn new(backend: BackendKind, path: impl Into<String>) -> Self {
        Self {
            backend,
            path: path.into(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// File extension of the stored object, including the dot (`".mp4"`), if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.path.rsplit('/').next()?;
        let dot = name.rfind('.')?;
        (dot > 0 && dot + 1 < name.len()).then(|| &name[dot..])
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.path)
    }
}
