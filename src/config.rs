use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, VaultError};
use crate::scanner::{ScanOptions, DEFAULT_MAX_FILE_SIZE};
use crate::watcher::coalescer::{
    CoalescerConfig, DEFAULT_DEBOUNCE, DEFAULT_DEDUP_WINDOW, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BACKOFF,
};

/// Construction-time settings for a `Vault`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultConfig {
    pub vault_path: PathBuf,
    pub ignore_patterns: Vec<String>,
    pub include_attachments: bool,
    pub watch_for_changes: bool,
    pub max_file_size: u64,
    pub debounce_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_retry_attempts: u32,
    pub dedup_window_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        let scan = ScanOptions::default();
        Self {
            vault_path: PathBuf::new(),
            ignore_patterns: scan.ignore_patterns,
            include_attachments: scan.include_attachments,
            watch_for_changes: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF.as_millis() as u64,
            max_retry_attempts: DEFAULT_MAX_RETRIES,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW.as_millis() as u64,
        }
    }
}

impl VaultConfig {
    pub fn new(vault_path: impl Into<PathBuf>) -> Self {
        Self {
            vault_path: vault_path.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file. The settings may be the whole document or sit
    /// under a top-level `"vault"` key.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| VaultError::io(path, e))?;
        let mut value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?;

        if let Some(section) = value.get_mut("vault").filter(|v| v.is_object()) {
            value = section.take();
        }

        let config: VaultConfig = serde_json::from_value(value)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vault_path.as_os_str().is_empty() {
            return Err(VaultError::Config("vaultPath is required".to_string()));
        }
        if self.max_file_size == 0 {
            return Err(VaultError::Config("maxFileSize must be positive".to_string()));
        }
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            ignore_patterns: self.ignore_patterns.clone(),
            max_file_size: self.max_file_size,
            include_attachments: self.include_attachments,
        }
    }

    pub fn coalescer_config(&self) -> CoalescerConfig {
        CoalescerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_retries: self.max_retry_attempts,
            dedup_window: Duration::from_millis(self.dedup_window_ms),
        }
    }
}
