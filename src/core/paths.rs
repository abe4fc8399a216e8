// src/core/paths.rs

use crate::constants::WORKSPACE_FILENAME;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

lazy_static! {
    static ref STRATA_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

/// Errors locating the config directory or the workspace file.
#[derive(Error, Debug)]
pub enum PathError {
    /// The platform has no config directory.
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    /// No workspace file in any searched location.
    #[error("No workspace given and no '{filename}' found in '{cwd}' or '{config}'.")]
    WorkspaceNotFound {
        /// The file name searched for.
        filename: &'static str,
        /// The working directory searched.
        cwd: String,
        /// The config directory searched.
        config: String,
    },
    /// The working directory could not be read.
    #[error("Could not read the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
}

/// Returns the Strata configuration directory (`~/.config/strata`).
///
/// Memoized: the first call computes the path, later calls return the cached
/// value. The directory is not created.
pub fn get_strata_config_dir() -> Result<PathBuf, PathError> {
    let mut cached = STRATA_CONFIG_DIR
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(path) = &*cached {
        return Ok(path.clone());
    }

    let config_path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join("strata");
    *cached = Some(config_path.clone());
    Ok(config_path)
}

/// Picks the workspace file to load: an explicit path wins, then
/// `./strata.toml`, then `strata.toml` in the config directory.
pub fn resolve_workspace_path(explicit: Option<&Path>) -> Result<PathBuf, PathError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir().map_err(PathError::CurrentDir)?;
    let local = cwd.join(WORKSPACE_FILENAME);
    if local.is_file() {
        return Ok(local);
    }

    let config_dir = get_strata_config_dir()?;
    let global = config_dir.join(WORKSPACE_FILENAME);
    if global.is_file() {
        return Ok(global);
    }

    Err(PathError::WorkspaceNotFound {
        filename: WORKSPACE_FILENAME,
        cwd: cwd.display().to_string(),
        config: config_dir.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Path::new("/tmp/elsewhere/strata.toml");
        assert_eq!(resolve_workspace_path(Some(explicit)).unwrap(), explicit);
    }

    #[test]
    fn test_config_dir_is_memoized() {
        if let Ok(first) = get_strata_config_dir() {
            assert!(first.ends_with("strata"));
            assert_eq!(get_strata_config_dir().unwrap(), first);
        }
    }
}
