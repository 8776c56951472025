//! Configuration loading for the Tokfence daemon.
//!
//! One TOML file (`~/.tokfence/config.toml`) with defaults for every key,
//! so a missing file is not an error. Unknown top-level keys are ignored
//! to keep older binaries compatible with newer files.

pub mod error;
pub mod paths;
pub mod types;

use std::path::Path;

use tracing::debug;

pub use error::{ConfigError, ConfigResult};
pub use paths::{atomic_write, config_path, data_dir, ensure_data_dir, expand_tilde};
pub use types::{Config, DaemonSection, LoggingSection, ProviderSection, DEFAULT_PORT};

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Load configuration.
///
/// With `path = None`, reads `<data_dir>/config.toml`; a missing file
/// yields pure defaults. An explicitly named file must exist.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is unreadable, malformed, or
/// fails validation.
pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
    let (resolved, must_exist) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (paths::config_path()?, false),
    };

    let content = match std::fs::read_to_string(&resolved) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !must_exist => {
            debug!(path = %resolved.display(), "no config file, using defaults");
            return Ok(Config::default());
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: resolved.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: resolved.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: resolved.display().to_string(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Persist a configuration back to disk, atomically.
///
/// Used by `provider set`; rewrites the whole file from the in-memory
/// config, which also normalizes formatting.
///
/// # Errors
///
/// Returns a [`ConfigError`] if serialization or the write fails.
pub fn save(config: &Config, path: &Path) -> ConfigResult<()> {
    let rendered = toml::to_string_pretty(config).map_err(|e| ConfigError::ValidationError {
        field: path.display().to_string(),
        message: e.to_string(),
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    paths::atomic_write(path, rendered.as_bytes()).map_err(|e| ConfigError::WriteError {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_default_path_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        // Point the data dir somewhere empty.
        unsafe_set_home(dir.path());
        let config = load(None).unwrap();
        assert_eq!(config.daemon.port, DEFAULT_PORT);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = load(Some(Path::new("/nonexistent/tokfence.toml")));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.set_provider("openai", "https://api.openai.com/");
        save(&config, &path).unwrap();

        let reloaded = load(Some(&path)).unwrap();
        assert_eq!(
            reloaded.provider("openai").unwrap().upstream,
            "https://api.openai.com"
        );
    }

    #[test]
    fn test_load_rejects_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[daemon\nport=1").unwrap();
        assert!(matches!(
            load(Some(&path)),
            Err(ConfigError::ParseError { .. })
        ));
    }

    // Test-only helper; std::env::set_var is unsafe in edition 2024.
    fn unsafe_set_home(path: &Path) {
        #[allow(unsafe_code)]
        unsafe {
            std::env::set_var("TOKFENCE_HOME", path);
        }
    }
}
