//! Configuration from `sqldeps.toml`.
//!
//! ```toml
//! [extract]
//! workers = -1
//! rpm = 100
//!
//! [provider]
//! command = "my-extractor"
//!
//! [database]
//! url = "postgres://localhost/warehouse"
//! schemas = ["public"]
//! ```
//!
//! Every field is optional. Command-line flags win over file values.

use crate::cache::{Cache, CACHE_DIR};
use crate::database::Dialect;
use crate::error::{SqlDepsError, SqlDepsResult};
use crate::executor::RunOptions;
use crate::extractor::CommandExtractor;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Project-local config file name.
pub const CONFIG_FILE: &str = "sqldeps.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extract: ExtractConfig,
    pub provider: ProviderConfig,
    pub database: DatabaseConfig,
}

/// `[extract]`: how files are found and processed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// `-1` uses every available unit.
    pub workers: i32,
    /// Provider calls per minute; `0` disables limiting.
    pub rpm: i64,
    pub use_cache: bool,
    pub clear_cache: bool,
    pub recursive: bool,
    pub extensions: Vec<String>,
    pub cache_dir: PathBuf,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            rpm: 100,
            use_cache: true,
            clear_cache: false,
            recursive: false,
            extensions: vec!["sql".to_string()],
            cache_dir: PathBuf::from(CACHE_DIR),
        }
    }
}

/// `[provider]`: external extraction program.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
}

/// `[database]`: schema source for matching.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub dialect: String,
    pub schemas: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            dialect: "postgresql".to_string(),
            schemas: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `./sqldeps.toml` and then
    /// the user config directory are tried before falling back to defaults.
    pub fn load(explicit: Option<&Path>) -> SqlDepsResult<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(SqlDepsError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Self::from_file(path);
        }

        for candidate in Self::search_paths() {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }
        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("sqldeps").join("config.toml"));
        }
        paths
    }

    pub fn from_file(path: &Path) -> SqlDepsResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| SqlDepsError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> SqlDepsResult<Self> {
        toml::from_str(content).map_err(|e| SqlDepsError::Config(e.to_string()))
    }

    /// Executor options described by `[extract]`.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            workers: self.extract.workers,
            rpm: self.extract.rpm,
            use_cache: self.extract.use_cache,
            clear_cache: self.extract.clear_cache,
            cache: Cache::new(&self.extract.cache_dir),
        }
    }

    pub fn dialect(&self) -> SqlDepsResult<Dialect> {
        self.database.dialect.parse()
    }

    /// Extractor described by `[provider]`, if a command is set.
    pub fn extractor(&self) -> Option<CommandExtractor> {
        self.provider
            .command
            .as_ref()
            .map(|command| CommandExtractor::new(command).args(self.provider.args.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.extract.workers, 1);
        assert_eq!(config.extract.rpm, 100);
        assert!(config.extract.use_cache);
        assert_eq!(config.dialect().unwrap(), Dialect::Postgres);
        assert!(config.extractor().is_none());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml_str(
            r#"
            [extract]
            workers = -1
            rpm = 0
            clear_cache = true
            recursive = true
            extensions = ["sql", "hql"]
            cache_dir = "/tmp/deps"

            [provider]
            command = "extract-deps"
            args = ["--json"]

            [database]
            url = "postgres://localhost/warehouse"
            schemas = ["public", "sales"]
            "#,
        )
        .unwrap();

        assert_eq!(config.extract.workers, -1);
        assert!(config.extract.recursive);
        assert_eq!(config.extract.extensions, vec!["sql", "hql"]);
        assert_eq!(config.database.schemas, vec!["public", "sales"]);

        let options = config.run_options();
        assert_eq!(options.rpm, 0);
        assert!(options.clear_cache);
        assert_eq!(options.cache.dir(), Path::new("/tmp/deps"));

        let extractor = config.extractor().unwrap();
        assert_eq!(extractor.program(), "extract-deps");
    }

    #[test]
    fn test_bad_values() {
        let err = Config::from_toml_str("[extract]\nworkers = \"many\"").unwrap_err();
        assert!(err.is_config());

        let config = Config::from_toml_str("[database]\ndialect = \"oracle\"").unwrap();
        assert!(matches!(
            config.dialect(),
            Err(SqlDepsError::UnsupportedDialect(_))
        ));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[extract]\nrpm = 30\n").unwrap();

        assert_eq!(Config::load(Some(&path)).unwrap().extract.rpm, 30);

        let err = Config::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.is_config());
    }
}
