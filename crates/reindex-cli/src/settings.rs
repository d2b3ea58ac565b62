//! Configuration loading for the reindex tool.
//!
//! Layered config: defaults -> ~/.config/reindex/config.toml -> --config file
//! -> REINDEX_* environment variables -> CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use directories::ProjectDirs;
use reindex_core::RunnerConfig;
use serde::{Deserialize, Serialize};

use crate::cli::RunArgs;

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum concurrent units of work
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Items polled per dispatch round
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Dispatcher sleep while listing is running
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,

    /// Interval between drain checks
    #[serde(default = "default_interval_ms")]
    pub drain_interval_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory where new stores are created
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Resource types seeded into a new store, in listing order
    #[serde(default)]
    pub types: Vec<String>,

    /// Directory holding one `<type>.txt` manifest per type
    #[serde(default)]
    pub manifest_dir: Option<String>,

    /// Endpoint that indexes a single resource
    #[serde(default)]
    pub indexer_url: Option<String>,

    /// Timeout for each index request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Where listings are spooled before insertion; system temp dir if unset
    #[serde(default)]
    pub staging_dir: Option<String>,
}

fn default_pool_size() -> usize {
    4
}

fn default_batch_size() -> usize {
    100
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_dir() -> String {
    ".".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_interval_ms(),
            drain_interval_ms: default_interval_ms(),
            log_level: default_log_level(),
            store_dir: default_store_dir(),
            types: Vec::new(),
            manifest_dir: None,
            indexer_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            staging_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, config files and the environment.
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "reindex")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("pool_size", default_pool_size() as i64)?
            .set_default("batch_size", default_batch_size() as i64)?
            .set_default("poll_interval_ms", default_interval_ms() as i64)?
            .set_default("drain_interval_ms", default_interval_ms() as i64)?
            .set_default("log_level", default_log_level())?
            .set_default("store_dir", default_store_dir())?
            .set_default("types", Vec::<String>::new())?
            .set_default("request_timeout_secs", default_request_timeout_secs() as i64)?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // REINDEX_POOL_SIZE, REINDEX_TYPES=Grant,User, ...
        builder = builder.add_source(
            Environment::with_prefix("REINDEX")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("types"),
        );

        builder.build()?.try_deserialize()
    }

    /// Apply `run` flags on top of the loaded settings.
    pub fn apply_run_args(&mut self, args: &RunArgs) {
        if !args.types.is_empty() {
            self.types = args.types.clone();
        }
        if let Some(dir) = &args.manifest_dir {
            self.manifest_dir = Some(dir.clone());
        }
        if let Some(url) = &args.indexer_url {
            self.indexer_url = Some(url.clone());
        }
        if let Some(dir) = &args.store_dir {
            self.store_dir = dir.clone();
        }
        if let Some(pool_size) = args.pool_size {
            self.pool_size = pool_size;
        }
        if let Some(batch_size) = args.batch_size {
            self.batch_size = batch_size;
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        let config = RunnerConfig::default()
            .with_pool_size(self.pool_size)
            .with_batch_size(self.batch_size)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_drain_interval(Duration::from_millis(self.drain_interval_ms));
        match &self.staging_dir {
            Some(dir) => config.with_staging_dir(dir),
            None => config,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.pool_size, 4);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.log_level, "info");
        assert!(settings.types.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reindex.toml");
        std::fs::write(
            &path,
            r#"
pool_size = 8
types = ["Grant", "Submission"]
manifest_dir = "/var/lib/reindex/manifests"
staging_dir = "/var/tmp/reindex"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.pool_size, 8);
        assert_eq!(settings.types, vec!["Grant", "Submission"]);
        assert_eq!(
            settings.manifest_dir.as_deref(),
            Some("/var/lib/reindex/manifests")
        );
        assert_eq!(
            settings.runner_config().staging_dir,
            Some(PathBuf::from("/var/tmp/reindex"))
        );
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.toml");
        assert!(Settings::load(Some(path.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_run_args_override() {
        let mut settings = Settings {
            types: vec!["Grant".to_string()],
            ..Default::default()
        };
        let args = RunArgs {
            types: vec!["User".to_string()],
            pool_size: Some(2),
            indexer_url: Some("http://localhost:9200/index".to_string()),
            ..Default::default()
        };

        settings.apply_run_args(&args);

        assert_eq!(settings.types, vec!["User"]);
        assert_eq!(settings.pool_size, 2);
        assert_eq!(settings.batch_size, 100);
        assert!(settings.indexer_url.is_some());

        let config = settings.runner_config();
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.staging_dir, None);
    }
}
