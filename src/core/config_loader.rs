//! # Config Loader
//!
//! Reads `.dx/dx.toml` into a [`DxConfig`]. A workspace without the file is
//! valid and gets the defaults.

use crate::{core::paths::Workspace, models::DxConfig};
use std::{fs, io::ErrorKind, path::PathBuf};
use thiserror::Error;

/// Represents errors that can occur while loading `dx.toml`.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("I/O error while reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The TOML content is invalid and could not be parsed.
    #[error("Failed to parse TOML file at '{path}': {source}")]
    TomlParse {
        /// The path to the file that failed to parse.
        path: PathBuf,
        /// The underlying parsing error from the `toml` crate.
        #[source]
        source: toml::de::Error,
    },
}

/// Loads the workspace configuration.
pub fn load_config(workspace: &Workspace) -> Result<DxConfig, ConfigError> {
    let path = workspace.config_file();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::debug!("No '{}' found, using default configuration.", path.display());
            return Ok(DxConfig::default());
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };

    let config: DxConfig =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: path.clone(),
            source,
        })?;
    log::debug!(
        "Loaded '{}': {} layer set(s), {} command(s).",
        path.display(),
        config.layers.len(),
        config.commands.len()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::new(dir.path(), dir.path().join(".dx"));
        let config = load_config(&workspace).unwrap();
        assert!(config.layers.is_empty());
        assert_eq!(config.ports.wait_ms, 10_000);
    }

    #[test]
    fn test_invalid_toml_names_the_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".dx")).unwrap();
        fs::write(dir.path().join(".dx/dx.toml"), "[layers\n").unwrap();
        let workspace = Workspace::new(dir.path(), dir.path().join(".dx"));

        let err = load_config(&workspace).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse { .. }));
        assert!(err.to_string().contains("dx.toml"));
    }

    #[test]
    fn test_layers_are_read_in_order() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".dx")).unwrap();
        fs::write(
            dir.path().join(".dx/dx.toml"),
            "[layers]\nstaging = [\".env.base\", \".env.staging\"]\n",
        )
        .unwrap();
        let workspace = Workspace::new(dir.path(), dir.path().join(".dx"));

        let config = load_config(&workspace).unwrap();
        assert_eq!(
            config.layers.get("staging").unwrap(),
            &vec![".env.base".to_string(), ".env.staging".to_string()]
        );
    }
}
