//! Configuration management: runtime settings plus an optional config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ocr::OcrProviderConfig;
use crate::store::{StoreOptions, DEFAULT_DATABASE_FILENAME};

/// Blobs live under this subdirectory of the data dir.
const BLOBS_SUBDIR: &str = "blobs";

/// Worker scratch files live under this subdirectory of the data dir.
const TMP_SUBDIR: &str = "tmp";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename under the data directory.
    pub database_filename: String,
    /// Size of the worker pool.
    pub worker_count: usize,
    /// Queue-check tick.
    pub dispatch_interval: Duration,
    /// Orphan-sweep tick.
    pub cleanup_interval: Duration,
    /// Stuck-in-processing cutoff.
    pub orphan_threshold: Duration,
    /// Per-job claim attempt upper bound.
    pub max_attempts: i64,
    /// Switch to temp-file streaming above this blob size.
    pub large_file_threshold: u64,
    /// How long stop() waits for each worker before force-terminating.
    pub graceful_shutdown_per_worker: Duration,
    /// Delay between worker startups.
    pub worker_start_stagger: Duration,
    /// Submission API bind address.
    pub bind_addr: String,
    /// OCR provider settings.
    pub ocr: OcrProviderConfig,
    /// Remote-sync store options (recognized, local-only store).
    pub store_sync_url: Option<String>,
    pub store_auth_token: Option<String>,
    pub store_sync_interval_secs: Option<u64>,
    pub store_encryption_key: Option<String>,
    pub store_use_replica: bool,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to the platform data dir, falling back to home, then CWD
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docmill");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            worker_count: 2,
            dispatch_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(60),
            orphan_threshold: Duration::from_secs(300),
            max_attempts: crate::models::DEFAULT_MAX_ATTEMPTS,
            large_file_threshold: 10 * 1024 * 1024,
            graceful_shutdown_per_worker: Duration::from_secs(5),
            worker_start_stagger: Duration::from_millis(100),
            bind_addr: "127.0.0.1:8080".to_string(),
            ocr: OcrProviderConfig::default(),
            store_sync_url: None,
            store_auth_token: None,
            store_sync_interval_secs: None,
            store_encryption_key: None,
            store_use_replica: false,
        }
    }
}

impl Settings {
    /// Full path to the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Directory for blob storage.
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join(BLOBS_SUBDIR)
    }

    /// Directory for worker scratch files.
    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir.join(TMP_SUBDIR)
    }

    /// Store options derived from these settings.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            path: self.database_path(),
            sync_url: self.store_sync_url.clone(),
            auth_token: self.store_auth_token.clone(),
            sync_interval_secs: self.store_sync_interval_secs,
            encryption_key: self.store_encryption_key.clone(),
            use_replica: self.store_use_replica,
        }
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.blobs_dir())?;
        std::fs::create_dir_all(self.tmp_dir())?;
        Ok(())
    }
}

/// Configuration file structure. Every field is optional; anything omitted
/// keeps its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphan_threshold_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_file_threshold_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_sync_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_sync_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_encryption_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_use_replica: Option<bool>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// Supports TOML, YAML, and JSON based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

        let mut config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
            _ => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Resolve a path that may be relative to the config file.
    fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(count) = self.worker_count {
            settings.worker_count = count.max(1);
        }
        if let Some(secs) = self.dispatch_interval_secs {
            settings.dispatch_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.cleanup_interval_secs {
            settings.cleanup_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.orphan_threshold_secs {
            settings.orphan_threshold = Duration::from_secs(secs.max(1));
        }
        if let Some(attempts) = self.max_attempts {
            settings.max_attempts = attempts.max(1);
        }
        if let Some(bytes) = self.large_file_threshold_bytes {
            settings.large_file_threshold = bytes;
        }
        if let Some(ref bind) = self.bind {
            settings.bind_addr = bind.clone();
        }
        if let Some(ref ocr) = self.ocr {
            settings.ocr = ocr.clone();
        }
        if let Some(ref url) = self.store_sync_url {
            settings.store_sync_url = Some(url.clone());
        }
        if let Some(ref token) = self.store_auth_token {
            settings.store_auth_token = Some(token.clone());
        }
        if let Some(secs) = self.store_sync_interval_secs {
            settings.store_sync_interval_secs = Some(secs);
        }
        if let Some(ref key) = self.store_encryption_key {
            settings.store_encryption_key = Some(key.clone());
        }
        if let Some(replica) = self.store_use_replica {
            settings.store_use_replica = replica;
        }
    }
}

/// Load settings, merging defaults, an optional config file, and environment
/// overrides (highest precedence).
pub async fn load_settings(config_path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    if let Some(path) = config_path {
        match Config::load_from_path(path).await {
            Ok(config) => {
                let base_dir = path
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("."));
                config.apply_to_settings(&mut settings, &base_dir);
            }
            Err(e) => {
                tracing::warn!("ignoring config file {}: {}", path.display(), e);
            }
        }
    }

    if let Some(dir) = env_var("DOCMILL_DATA_DIR") {
        settings.data_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
    }
    if let Some(path) = env_var("DATABASE_PATH") {
        let path = PathBuf::from(shellexpand::tilde(&path).as_ref());
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            if !parent.as_os_str().is_empty() {
                settings.data_dir = parent.to_path_buf();
            }
            settings.database_filename = name.to_string_lossy().to_string();
        }
    }
    if let Some(count) = env_var("DOCMILL_WORKERS").and_then(|v| v.parse().ok()) {
        settings.worker_count = count;
    }
    if let Some(bind) = env_var("DOCMILL_BIND") {
        settings.bind_addr = bind;
    }
    if let Some(url) = env_var("DOCMILL_OCR_URL") {
        settings.ocr.endpoint = url;
    }
    if let Some(key) = env_var("DOCMILL_OCR_API_KEY") {
        settings.ocr.api_key = Some(key);
    }

    settings
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.worker_count, 2);
        assert_eq!(settings.dispatch_interval, Duration::from_secs(5));
        assert_eq!(settings.cleanup_interval, Duration::from_secs(60));
        assert_eq!(settings.orphan_threshold, Duration::from_secs(300));
        assert_eq!(settings.large_file_threshold, 10 * 1024 * 1024);
        assert_eq!(settings.database_filename, "service.db");
    }

    #[test]
    fn test_paths_derive_from_data_dir() {
        let mut settings = Settings::default();
        settings.data_dir = PathBuf::from("/srv/docmill");
        assert_eq!(settings.database_path(), PathBuf::from("/srv/docmill/service.db"));
        assert_eq!(settings.tmp_dir(), PathBuf::from("/srv/docmill/tmp"));
        assert_eq!(settings.blobs_dir(), PathBuf::from("/srv/docmill/blobs"));
    }

    #[tokio::test]
    async fn test_toml_config_applies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docmill.toml");
        tokio::fs::write(
            &path,
            r#"
data_dir = "work"
worker_count = 4
dispatch_interval_secs = 2

[ocr]
endpoint = "http://ocr.internal:9000"
model = "ocr-fast-v2"
"#,
        )
        .await
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, dir.path());

        assert_eq!(settings.data_dir, dir.path().join("work"));
        assert_eq!(settings.worker_count, 4);
        assert_eq!(settings.dispatch_interval, Duration::from_secs(2));
        assert_eq!(settings.ocr.endpoint, "http://ocr.internal:9000");
        assert_eq!(settings.ocr.model, "ocr-fast-v2");
    }

    #[tokio::test]
    async fn test_yaml_config_applies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docmill.yaml");
        tokio::fs::write(&path, "worker_count: 8\nbind: 0.0.0.0:9100\n")
            .await
            .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, dir.path());
        assert_eq!(settings.worker_count, 8);
        assert_eq!(settings.bind_addr, "0.0.0.0:9100");
    }
}
