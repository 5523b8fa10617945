use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::url_model;

/// Configuration that is rejected before any network activity starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("download_url is empty")]
    EmptyUrl,
    #[error("invalid download_url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported URL scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),
    #[error("save_path is empty")]
    EmptySavePath,
    #[error("file_extension {0:?} must not contain path separators")]
    InvalidExtension(String),
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// libcurl tuning for each unit transfer (optional `[http]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    /// Seconds allowed for the TCP/TLS connect phase.
    pub connect_timeout_secs: u64,
    /// Hard wall-clock limit for one transfer.
    pub timeout_secs: u64,
    /// Abort when throughput stays below this many bytes/s for `low_speed_time_secs`.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    /// Optional User-Agent header.
    pub user_agent: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            timeout_secs: 300,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            user_agent: None,
        }
    }
}

/// One bulk download run. Immutable once the run starts.
///
/// Field aliases accept the `Input.json` shape
/// (`Count`, `MaximumConcurrency`, `SavePath`, `DownloadUrl`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of units to download (0 is a valid no-op run).
    #[serde(alias = "Count")]
    pub count: usize,
    /// Maximum number of transfers in flight at once.
    #[serde(alias = "MaximumConcurrency")]
    pub max_concurrency: usize,
    /// Source URL; `{index}` is replaced with the 1-based unit index.
    #[serde(alias = "DownloadUrl")]
    pub download_url: String,
    /// Directory that receives `{index}.{file_extension}`.
    #[serde(alias = "SavePath")]
    pub save_path: PathBuf,
    /// Extension of saved files; empty means bare index names.
    pub file_extension: String,
    /// Remove this run's files when the run is cancelled.
    pub cleanup_on_cancel: bool,
    /// Upper bound on waiting for admitted units to settle at the end of a run.
    pub settle_timeout_secs: u64,
    /// Upper bound on waiting for in-flight writes before cancel cleanup deletes files.
    pub cleanup_grace_secs: u64,
    pub http: HttpOptions,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            count: 10,
            max_concurrency: 4,
            download_url: "https://picsum.photos/200/300?random={index}".to_string(),
            save_path: PathBuf::from("outputs"),
            file_extension: "png".to_string(),
            cleanup_on_cancel: true,
            settle_timeout_secs: 600,
            cleanup_grace_secs: 10,
            http: HttpOptions::default(),
        }
    }
}

impl RunConfig {
    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.download_url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        let sample = url_model::render_url(&self.download_url, 1);
        let parsed = url::Url::parse(&sample).map_err(|source| ConfigError::InvalidUrl {
            url: self.download_url.clone(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptySavePath);
        }
        if self.file_extension.contains(['/', '\\']) {
            return Err(ConfigError::InvalidExtension(self.file_extension.clone()));
        }
        Ok(())
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bulkdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load a run configuration from `path`. Files ending in `.json` are parsed as
/// JSON, everything else as TOML.
pub fn load_from_path(path: &Path) -> Result<RunConfig, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let parsed = if is_json {
        serde_json::from_str(&data).map_err(|e| e.to_string())
    } else {
        toml::from_str(&data).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RunConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = RunConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    Ok(load_from_path(&path)?)
}
