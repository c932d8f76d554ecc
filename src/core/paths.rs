// src/core/paths.rs

//! Workspace discovery and path helpers.

use crate::constants::{
    CONFIG_DIR_VAR, DX_DIR, POLICY_FILENAME, PROJECT_CONFIG_FILENAME, WORKSPACE_ROOT_VAR,
};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to locate the workspace or its configuration directory.
#[derive(Error, Debug)]
pub enum PathError {
    /// No ancestor of the start directory holds a `.dx/` marker.
    #[error(
        "No dx workspace found from '{0}' upwards (looked for '.dx/dx.toml' or '.dx/secrets.policy.jsonc')."
    )]
    WorkspaceNotFound(String),
    /// An explicit root or config directory does not resolve.
    #[error("Could not resolve path '{path}': {source}")]
    Canonicalize {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// `~` or `$VAR` in an override could not be expanded.
    #[error("Failed to expand config directory template '{template}': {message}")]
    Expansion { template: String, message: String },
}

/// The two locations every dx operation is anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// The workspace root; environment files live here.
    pub root: PathBuf,
    /// Holds `dx.toml` and the secret policy document.
    pub config_dir: PathBuf,
}

impl Workspace {
    /// Builds a workspace from explicit locations, without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config_dir: config_dir.into(),
        }
    }

    /// Locates the workspace containing `start`.
    ///
    /// Precedence for the root: `DX_WORKSPACE_ROOT`, then the nearest ancestor
    /// of `start` holding a `.dx` directory with either config file. The
    /// config directory is `config_dir_override`, then `DX_CONFIG_DIR`, then
    /// `<root>/.dx`. Relative overrides resolve against the root.
    pub fn discover(start: &Path, config_dir_override: Option<&str>) -> Result<Self, PathError> {
        let root = match env::var(WORKSPACE_ROOT_VAR) {
            Ok(explicit) if !explicit.trim().is_empty() => canonicalize(Path::new(&explicit))?,
            _ => find_root(&canonicalize(start)?)
                .ok_or_else(|| PathError::WorkspaceNotFound(start.display().to_string()))?,
        };

        let override_template = config_dir_override
            .map(str::to_string)
            .or_else(|| env::var(CONFIG_DIR_VAR).ok().filter(|v| !v.trim().is_empty()));

        let config_dir = match override_template {
            Some(template) => {
                let expanded = expand_dir_template(&template)?;
                if expanded.is_absolute() {
                    expanded
                } else {
                    root.join(expanded)
                }
            }
            None => root.join(DX_DIR),
        };

        log::debug!(
            "Workspace resolved: root='{}', config_dir='{}'",
            root.display(),
            config_dir.display()
        );
        Ok(Self { root, config_dir })
    }

    /// Path to `dx.toml`.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(PROJECT_CONFIG_FILENAME)
    }
}

/// Walks up from `start` until a directory containing `.dx/dx.toml` or
/// `.dx/secrets.policy.jsonc` is found.
pub fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| {
            let dx_dir = dir.join(DX_DIR);
            dx_dir.join(PROJECT_CONFIG_FILENAME).is_file() || dx_dir.join(POLICY_FILENAME).is_file()
        })
        .map(Path::to_path_buf)
}

/// Renders a path relative to the workspace root with forward slashes, the
/// form used in violation messages and allow-lists.
pub fn relative_display(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonicalize(path: &Path) -> Result<PathBuf, PathError> {
    dunce::canonicalize(path).map_err(|source| PathError::Canonicalize {
        path: path.display().to_string(),
        source,
    })
}

fn expand_dir_template(template: &str) -> Result<PathBuf, PathError> {
    // `shellexpand::full` handles both home dir and env vars across platforms.
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}
