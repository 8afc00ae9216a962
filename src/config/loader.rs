//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate: the base file, an optional environment-specific file, then
//! `RESILIENCE__`-prefixed environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::ResilienceConfig;
use crate::constants::{env as env_vars, files};
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File extensions the `config` crate is asked to look for
const SUPPORTED_EXTENSIONS: [&str; 4] = ["yaml", "yml", "toml", "json"];

/// Loaded and validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ResilienceConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading resilience configuration"
        );

        let base = config_directory.join(files::BASE_CONFIG);
        let base_file = Self::existing_variants(&base).into_iter().next().ok_or_else(|| {
            ConfigurationError::config_file_not_found(
                SUPPORTED_EXTENSIONS
                    .iter()
                    .map(|ext| Self::with_appended_extension(&base, ext))
                    .collect(),
            )
        })?;

        let overlay = config_directory.join(format!("{}.{environment}", files::BASE_CONFIG));
        let mut builder = Config::builder().add_source(File::from(base_file.as_path()));
        if let Some(overlay_file) = Self::existing_variants(&overlay).into_iter().next() {
            debug!(overlay = %overlay_file.display(), "Applying environment overlay");
            builder = builder.add_source(File::from(overlay_file.as_path()));
        }

        let merged = builder
            .add_source(
                Environment::with_prefix(env_vars::OVERRIDE_PREFIX)
                    .prefix_separator(env_vars::OVERRIDE_SEPARATOR)
                    .separator(env_vars::OVERRIDE_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        let config: ResilienceConfig = merged
            .try_deserialize()
            .map_err(ConfigurationError::parse_error)?;

        config.validate()?;

        info!(
            environment = environment,
            breakers_enabled = config.circuit_breakers.enabled,
            components = config.component_names().len(),
            "Resilience configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Load configuration, falling back to safe defaults when loading fails
    pub fn load_or_default() -> Arc<ConfigManager> {
        match Self::load() {
            Ok(manager) => manager,
            Err(error) => {
                warn!(%error, "Configuration loading failed, using built-in defaults");
                Arc::new(Self::from_config(
                    ResilienceConfig::default(),
                    &Self::detect_environment(),
                ))
            }
        }
    }

    /// Wrap an already-built configuration (no file access)
    pub fn from_config(config: ResilienceConfig, environment: &str) -> ConfigManager {
        ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration rendered as JSON for diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    /// Detect environment from `RESILIENCE_ENV`, then `APP_ENV`
    pub fn detect_environment() -> String {
        env::var(env_vars::ENVIRONMENT)
            .or_else(|_| env::var(env_vars::FALLBACK_ENVIRONMENT))
            .unwrap_or_else(|_| env_vars::DEFAULT_ENVIRONMENT.to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var(env_vars::CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(files::DEFAULT_CONFIG_DIR))
    }

    /// `stem` may itself contain dots (`resilience.production`), so extensions
    /// are appended rather than substituted
    fn existing_variants(stem: &Path) -> Vec<PathBuf> {
        SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| Self::with_appended_extension(stem, ext))
            .filter(|path| path.is_file())
            .collect()
    }

    fn with_appended_extension(stem: &Path, ext: &str) -> PathBuf {
        let mut path = stem.as_os_str().to_owned();
        path.push(".");
        path.push(ext);
        PathBuf::from(path)
    }
}
