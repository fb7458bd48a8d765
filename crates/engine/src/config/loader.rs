use std::path::{Path, PathBuf};

use cinegraph_common::config::SystemConfig;

use super::validation;

/// Complete engine configuration loaded from the config directory.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Parsed system.toml.
    pub system: SystemConfig,
    /// Base config directory path.
    pub config_dir: PathBuf,
}

impl EngineConfig {
    /// Configuration with every default, not backed by a file.
    pub fn defaults() -> Self {
        Self {
            system: SystemConfig::default(),
            config_dir: PathBuf::from("config"),
        }
    }
}

/// Load all configuration from the given config directory.
///
/// Fails loudly with clear error messages if anything is misconfigured.
/// The engine refuses to run on validation failure.
pub fn load_config(config_dir: &Path) -> Result<EngineConfig, ConfigError> {
    tracing::info!(config_dir = %config_dir.display(), "Loading configuration");

    let system_path = config_dir.join("system.toml");
    let system = load_system_config(&system_path)?;

    let config = EngineConfig {
        system,
        config_dir: config_dir.to_path_buf(),
    };

    validation::validate(&config)?;

    tracing::info!(
        batch_size = config.system.loader.batch_size,
        workers = config.system.loader.workers,
        on_parse_error = ?config.system.loader.on_parse_error,
        "Configuration loaded successfully"
    );

    Ok(config)
}

fn load_system_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    SystemConfig::from_toml_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for cinegraph_common::CinegraphError {
    fn from(e: ConfigError) -> Self {
        cinegraph_common::CinegraphError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("system.toml"),
            "[loader]\nbatch_size = 50\nworkers = 4\n",
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.system.loader.batch_size, 50);
        assert_eq!(config.system.loader.workers, 4);
        assert_eq!(config.config_dir, dir.path());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("system.toml"), "[loader]\nbatch_size = 0\n").unwrap();

        let err = load_config(dir.path()).unwrap_err();
        match err {
            ConfigError::Validation(msg) => assert!(msg.contains("loader.batch_size")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
