//! Data-directory and path resolution.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Directory permissions for `~/.tokfence`.
#[cfg(unix)]
const DATA_DIR_MODE: u32 = 0o700;

/// Resolve the Tokfence data directory.
///
/// `TOKFENCE_HOME` overrides the default `~/.tokfence`; tests point it at
/// a temp directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] if no home directory can be found.
pub fn data_dir() -> ConfigResult<PathBuf> {
    if let Ok(dir) = std::env::var("TOKFENCE_HOME") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    Ok(home_dir()?.join(".tokfence"))
}

/// Create the data directory if missing and force its mode to 0700.
///
/// # Errors
///
/// Returns [`ConfigError::WriteError`] if the directory cannot be created
/// or its permissions cannot be set.
pub fn ensure_data_dir() -> ConfigResult<PathBuf> {
    let dir = data_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::WriteError {
        path: dir.display().to_string(),
        source: e,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(DATA_DIR_MODE)).map_err(
            |e| ConfigError::WriteError {
                path: dir.display().to_string(),
                source: e,
            },
        )?;
    }
    Ok(dir)
}

/// Expand a leading `~/` to the user's home directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] if the path starts with `~` and no
/// home directory can be found.
pub fn expand_tilde(path: &str) -> ConfigResult<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    if path == "~" {
        return home_dir();
    }
    Ok(PathBuf::from(path))
}

/// Default config file path (`<data_dir>/config.toml`).
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] if no home directory can be found.
pub fn config_path() -> ConfigResult<PathBuf> {
    Ok(data_dir()?.join("config.toml"))
}

fn home_dir() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

/// Write a file atomically: temp file in the same directory, then rename.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tokfence".to_owned())
    ));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/x/y").unwrap();
        assert!(expanded.is_absolute());
        assert!(expanded.ends_with("x/y"));
        assert_eq!(expand_tilde("/abs/path").unwrap(), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("rel/path").unwrap(), PathBuf::from("rel/path"));
    }

    #[test]
    fn test_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }
}
