//! Error types shared by every vault component.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while scanning, indexing, watching or writing notes.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The configured vault root does not exist (fatal at startup)
    #[error("Vault path does not exist: {0}")]
    RootNotFound(PathBuf),

    /// File content could not be decoded into a note
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// Read/write/stat failure on a specific file
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No note with the given id is indexed
    #[error("Note not found: {0}")]
    NotFound(String),

    /// File exceeds the configured size ceiling
    #[error("File too large ({size} bytes, limit {limit}): {path}")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Invalid note title: {0:?}")]
    InvalidTitle(String),

    /// Every collision suffix for a new note's file name is taken
    #[error("No free file name left for {0:?}")]
    NameExhausted(String),

    #[error("Frontmatter serialization failed: {0}")]
    Frontmatter(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// A background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl VaultError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        VaultError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Failures worth another attempt when they happen during event processing
    /// (file mid-write, momentarily locked, half-synced bytes).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VaultError::Io { .. } | VaultError::Parse { .. } | VaultError::Task(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
