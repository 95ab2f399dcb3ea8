use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const CONFIG_PREFIX: &str = "GEOSCRUB";
const CONFIG_FILE_PATH: &str = "./defaults.toml";
const CONFIG_FILE_ENV_PATH_KEY: &str = "GEOSCRUB_CONFIG_FILE";

const HOME_ENV_KEY: &str = "GEOSCRUB_HOME";
const DEFAULT_HOME_SUBDIR: &str = ".geoscrub";
const INDEX_FILENAME: &str = "index.rkyv";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub host: String,
    pub port: usize,
    /// Explicit index file; when empty the index is looked up under
    /// `$GEOSCRUB_HOME` (default `~/.geoscrub`).
    #[serde(default)]
    pub index_file: String,
    pub url_path_prefix: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let mut s = Config::builder();

        tracing::info!("Try read config from: {}", CONFIG_FILE_PATH);
        if Path::new(CONFIG_FILE_PATH).exists() {
            s = s.add_source(File::with_name(CONFIG_FILE_PATH).required(false))
        }

        tracing::info!(
            "Try read and merge in config from file by environment variable: {}",
            CONFIG_FILE_ENV_PATH_KEY
        );
        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV_PATH_KEY) {
            s = s.add_source(File::with_name(&config_path));
        };

        tracing::info!(
            "Try read and merge in config from environment variables with prefix {}",
            CONFIG_PREFIX
        );
        s = s.add_source(Environment::with_prefix(CONFIG_PREFIX).separator("__"));

        s.build()?.try_deserialize()
    }

    pub fn index_path(&self) -> PathBuf {
        if !self.index_file.is_empty() {
            return PathBuf::from(&self.index_file);
        }
        let home = match std::env::var(HOME_ENV_KEY) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                Path::new(&base).join(DEFAULT_HOME_SUBDIR)
            }
        };
        home.join(INDEX_FILENAME)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: "localhost".to_owned(),
            port: 8080,
            index_file: "".to_string(),
            url_path_prefix: "/".to_string(),
        }
    }
}
