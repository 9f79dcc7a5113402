use crate::pipeline::{default_parallelism, Backend, ScanOptions};
use crate::platform::PlatformConfig;
use crate::storage::StoreSource;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Csv,
    Duckdb,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_kind")]
    pub backend: StoreKind,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Batch scan configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    #[serde(default = "default_backend")]
    pub backend: Backend,
}

/// Result export configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub only_platform: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_store_kind() -> StoreKind {
    StoreKind::Csv
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache/stocks")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/platform.duckdb")
}
fn default_backend() -> Backend {
    Backend::Process
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/results")
}
fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_store_kind(),
            cache_dir: default_cache_dir(),
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { parallelism: default_parallelism(), backend: default_backend() }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: default_output_dir(), enabled: true, only_platform: true }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("PLATFORM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        cfg.try_deserialize().context("Invalid configuration")
    }

    pub fn store_source(&self) -> StoreSource {
        match self.storage.backend {
            StoreKind::Csv => StoreSource::CsvDir(self.storage.cache_dir.clone()),
            StoreKind::Duckdb => StoreSource::DuckDb(self.storage.db_path.clone()),
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions { parallelism: self.scan.parallelism, backend: self.scan.backend }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_overrides_merge_with_defaults() {
        let toml = r#"
            [storage]
            backend = "duckdb"

            [scan]
            parallelism = 3
            backend = "thread"

            [platform]
            window = 30
            use_volume_analysis = false

            [platform.rapid_decline]
            enabled = true
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.storage.backend, StoreKind::Duckdb);
        assert_eq!(cfg.store_source(), StoreSource::DuckDb(PathBuf::from("data/platform.duckdb")));
        assert_eq!(cfg.scan.parallelism, 3);
        assert_eq!(cfg.scan_options().backend, Backend::Thread);
        assert_eq!(cfg.platform.window, 30);
        assert!(!cfg.platform.use_volume_analysis);
        assert!(cfg.platform.rapid_decline.enabled);
        assert_eq!(cfg.platform.rapid_decline.lookback, 20);
        assert_eq!(cfg.platform.box_threshold, 0.05);
        assert!(cfg.output.only_platform);
    }

    #[test]
    fn test_empty_config_is_default() {
        let cfg: AppConfig = config::Config::builder().build().unwrap().try_deserialize().unwrap();
        assert_eq!(cfg.storage.backend, StoreKind::Csv);
        assert_eq!(cfg.scan.backend, Backend::Process);
        assert!(cfg.scan.parallelism >= 1);
        assert_eq!(cfg.platform, PlatformConfig::default());
    }
}
