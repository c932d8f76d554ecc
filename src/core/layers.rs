//! # Environment Layer Store
//!
//! Resolves which environment files apply to an (app, environment) pair and
//! folds them, in order, into a [`ResolvedEnvironment`].
//!
//! Later layers override earlier ones. `${NAME}` tokens are interpolated
//! against the keys resolved so far and then the ambient process
//! environment; single-quoted values are verbatim.

use crate::{
    constants::{DEFAULT_LAYER_TEMPLATES, REQUESTED_ENV_VAR, RUNTIME_MODE_VAR},
    core::dotenv,
    dev_utils::BlockTimer,
};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

lazy_static! {
    static ref INTERPOLATION_RE: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("interpolation regex is valid");
}

/// Failure while reading layer files.
#[derive(Error, Debug)]
pub enum LayerError {
    /// A layer file exists but could not be read.
    #[error("Failed to read environment layer '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// --- Runtime mode ---

/// The simplified mode most tooling understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeMode {
    /// Local development and previews.
    Development,
    /// `production` and `staging`.
    Production,
    /// `test` and `e2e`.
    Test,
}

impl RuntimeMode {
    /// Maps a rich environment name onto its runtime-mode twin.
    pub fn for_environment(environment: &str) -> Self {
        match environment {
            "production" | "staging" => Self::Production,
            "test" | "e2e" => Self::Test,
            _ => Self::Development,
        }
    }

    /// The `NODE_ENV` value for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "development" => Some(Self::Development),
            "production" => Some(Self::Production),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps the requested environment and its runtime mode in step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    /// The rich name, exported as `APP_ENV`.
    pub requested: String,
    /// Its runtime mode, exported as `NODE_ENV`.
    pub mode: RuntimeMode,
}

impl EnvironmentContext {
    /// The context for an explicitly requested environment.
    pub fn new(requested: impl Into<String>) -> Self {
        let requested = requested.into();
        let mode = RuntimeMode::for_environment(&requested);
        Self { requested, mode }
    }

    /// Derives the context from ambient variables: `APP_ENV` wins, a bare
    /// `NODE_ENV` is promoted to the requested name, else `fallback`.
    pub fn from_ambient(ambient: &HashMap<String, String>, fallback: &str) -> Self {
        let non_empty = |key: &str| ambient.get(key).filter(|v| !v.trim().is_empty());
        if let Some(requested) = non_empty(REQUESTED_ENV_VAR) {
            return Self::new(requested.trim());
        }
        if let Some(mode) = non_empty(RUNTIME_MODE_VAR).and_then(|v| RuntimeMode::parse(v.trim())) {
            return Self::new(mode.as_str());
        }
        Self::new(fallback)
    }

    /// The `APP_ENV` / `NODE_ENV` pair to hand to a child process.
    pub fn as_env_pairs(&self) -> [(&'static str, String); 2] {
        [
            (REQUESTED_ENV_VAR, self.requested.clone()),
            (RUNTIME_MODE_VAR, self.mode.as_str().to_string()),
        ]
    }
}

// --- Resolved environment ---

/// An insertion-ordered key → value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl ResolvedEnvironment {
    /// The value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .and_then(|&i| self.entries.get(i))
            .map(|(_, v)| v.as_str())
    }

    /// Sets `key`, keeping its original position when it already exists.
    /// Returns the previous value.
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        if let Some(slot) = self.index.get(&key).and_then(|&i| self.entries.get_mut(i)) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    /// Entries in first-assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key has been set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An assignment that replaced a non-empty value with an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerWarning {
    /// The variable that was blanked.
    pub key: String,
    /// The file with the empty assignment.
    pub file: PathBuf,
    /// The file that set the value being blanked.
    pub previous_file: PathBuf,
}

impl fmt::Display for LayerWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' in '{}' overrides the non-empty value from '{}' with an empty string",
            self.key,
            self.file.display(),
            self.previous_file.display()
        )
    }
}

/// The outcome of folding every existing layer file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayeredEnvironment {
    /// The files that contributed, in application order.
    pub files: Vec<PathBuf>,
    /// Interpolated variables, first assignment order, last value wins.
    pub vars: ResolvedEnvironment,
    /// Empty-overwrite warnings, in the order they happened.
    pub warnings: Vec<LayerWarning>,
}

// --- Store ---

/// Holds the layer-template configuration for a workspace.
///
/// The template map is shared and never mutated after construction; every
/// call to [`collect_env_from_layers`](Self::collect_env_from_layers) builds a
/// fresh result.
#[derive(Debug, Clone)]
pub struct EnvironmentLayerStore {
    root: PathBuf,
    layers: Arc<BTreeMap<String, Vec<String>>>,
    ambient: HashMap<String, String>,
}

impl EnvironmentLayerStore {
    /// Creates a store that interpolates against the current process environment.
    pub fn new(root: impl Into<PathBuf>, layers: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            root: root.into(),
            layers: Arc::new(layers),
            ambient: std::env::vars().collect(),
        }
    }

    /// Replaces the ambient environment used as the interpolation fallback.
    pub fn with_ambient(mut self, ambient: HashMap<String, String>) -> Self {
        self.ambient = ambient;
        self
    }

    /// The workspace root templates are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The templates bound to `environment`, falling back to the defaults.
    pub fn templates_for(&self, environment: &str) -> Vec<String> {
        match self.layers.get(environment) {
            Some(templates) => templates.clone(),
            None => DEFAULT_LAYER_TEMPLATES.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Returns the existing layer files for `(app, environment)`, in order.
    ///
    /// Templates mentioning `{app}` are skipped when no app is given.
    pub fn resolve_layers(&self, app: Option<&str>, environment: &str) -> Vec<PathBuf> {
        self.templates_for(environment)
            .iter()
            .filter_map(|template| {
                let with_env = template.replace("{env}", environment);
                let name = match app {
                    Some(app) => with_env.replace("{app}", app),
                    None if with_env.contains("{app}") => return None,
                    None => with_env,
                };
                let path = self.root.join(name);
                if path.is_file() {
                    Some(path)
                } else {
                    log::trace!("Layer '{}' does not exist, skipping.", path.display());
                    None
                }
            })
            .collect()
    }

    /// Parses and folds every layer for `(app, environment)`.
    pub fn collect_env_from_layers(
        &self,
        app: Option<&str>,
        environment: &str,
    ) -> Result<LayeredEnvironment, LayerError> {
        let _timer = BlockTimer::new("collect_env_from_layers");
        let files = self.resolve_layers(app, environment);

        let mut vars = ResolvedEnvironment::default();
        let mut origins: HashMap<String, PathBuf> = HashMap::new();
        let mut warnings = Vec::new();

        for file in &files {
            let assignments = dotenv::parse_file(file).map_err(|source| LayerError::Io {
                path: file.clone(),
                source,
            })?;
            for assignment in assignments {
                let value = if assignment.is_verbatim() {
                    assignment.value
                } else {
                    self.interpolate(&assignment.value, &vars)
                };

                let previous = vars.insert(assignment.key.clone(), value.clone());
                if let Some(previous) = previous
                    && !previous.is_empty()
                    && value.is_empty()
                {
                    let previous_file = origins
                        .get(&assignment.key)
                        .cloned()
                        .unwrap_or_else(|| file.clone());
                    let warning = LayerWarning {
                        key: assignment.key.clone(),
                        file: file.clone(),
                        previous_file,
                    };
                    log::warn!("{}", warning);
                    warnings.push(warning);
                }
                origins.insert(assignment.key, file.clone());
            }
        }

        log::debug!(
            "Resolved {} variable(s) from {} layer(s) for app={:?}, env='{}'.",
            vars.len(),
            files.len(),
            app,
            environment
        );
        Ok(LayeredEnvironment {
            files,
            vars,
            warnings,
        })
    }

    fn interpolate(&self, value: &str, resolved: &ResolvedEnvironment) -> String {
        INTERPOLATION_RE
            .replace_all(value, |caps: &Captures<'_>| {
                let name = caps.get(1).map_or("", |m| m.as_str());
                resolved
                    .get(name)
                    .or_else(|| self.ambient.get(name).map(String::as_str))
                    .unwrap_or("")
                    .to_string()
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn store_with(root: &Path, env: &str, templates: &[&str]) -> EnvironmentLayerStore {
        let mut layers = BTreeMap::new();
        layers.insert(
            env.to_string(),
            templates.iter().map(|t| t.to_string()).collect(),
        );
        EnvironmentLayerStore::new(root, layers).with_ambient(HashMap::from([(
            "HOME_REGION".to_string(),
            "eu-west-1".to_string(),
        )]))
    }

    #[test]
    fn test_empty_override_records_a_warning() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env.base"), "X=1\n").unwrap();
        fs::write(dir.path().join(".env.override"), "X=\n").unwrap();
        let store = store_with(dir.path(), "development", &[".env.base", ".env.override"]);

        let layered = store.collect_env_from_layers(None, "development").unwrap();

        assert_eq!(layered.vars.get("X"), Some(""));
        assert_eq!(layered.warnings.len(), 1);
        let warning = &layered.warnings[0];
        assert_eq!(warning.key, "X");
        assert_eq!(warning.file, dir.path().join(".env.override"));
        assert_eq!(warning.previous_file, dir.path().join(".env.base"));
    }

    #[test]
    fn test_later_layers_override_and_keep_position() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env.a"), "A=1\nB=2\n").unwrap();
        fs::write(dir.path().join(".env.b"), "A=3\nC=4\n").unwrap();
        let store = store_with(dir.path(), "development", &[".env.a", ".env.b"]);

        let layered = store.collect_env_from_layers(None, "development").unwrap();
        let pairs: Vec<_> = layered.vars.iter().collect();
        assert_eq!(pairs, [("A", "3"), ("B", "2"), ("C", "4")]);
        assert!(layered.warnings.is_empty());
    }

    #[test]
    fn test_interpolates_resolved_keys_then_ambient_then_empty() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(".env.a"),
            "HOST=db.local\nURL=postgres://${HOST}/app\nREGION=${HOME_REGION}\nMISSING=[${NOPE}]\n",
        )
        .unwrap();
        let store = store_with(dir.path(), "development", &[".env.a"]);

        let vars = store.collect_env_from_layers(None, "development").unwrap().vars;
        assert_eq!(vars.get("URL"), Some("postgres://db.local/app"));
        assert_eq!(vars.get("REGION"), Some("eu-west-1"));
        assert_eq!(vars.get("MISSING"), Some("[]"));
    }

    #[test]
    fn test_single_quotes_suppress_interpolation() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(".env.a"),
            "HOST=x\nRAW='${HOST}'\nCOOKED=\"${HOST}\"\nTICK=`${HOST}`\n",
        )
        .unwrap();
        let store = store_with(dir.path(), "development", &[".env.a"]);

        let vars = store.collect_env_from_layers(None, "development").unwrap().vars;
        assert_eq!(vars.get("RAW"), Some("${HOST}"));
        assert_eq!(vars.get("COOKED"), Some("x"));
        assert_eq!(vars.get("TICK"), Some("x"));
    }

    #[test]
    fn test_app_templates_are_skipped_without_an_app() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env.staging"), "A=1\n").unwrap();
        fs::write(dir.path().join(".env.staging.api"), "B=2\n").unwrap();
        let store = EnvironmentLayerStore::new(dir.path(), BTreeMap::new());

        assert_eq!(
            store.resolve_layers(None, "staging"),
            vec![dir.path().join(".env.staging")]
        );
        assert_eq!(
            store.resolve_layers(Some("api"), "staging"),
            vec![
                dir.path().join(".env.staging"),
                dir.path().join(".env.staging.api")
            ]
        );
    }

    #[test]
    fn test_collection_is_deterministic() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env.a"), "A=1\nB=${A}\n").unwrap();
        fs::write(dir.path().join(".env.b"), "A=\nC=${B}\n").unwrap();
        let store = store_with(dir.path(), "test", &[".env.a", ".env.b"]);

        let first = store.collect_env_from_layers(None, "test").unwrap();
        let second = store.collect_env_from_layers(None, "test").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_runtime_mode_mapping_and_sync() {
        assert_eq!(RuntimeMode::for_environment("staging"), RuntimeMode::Production);
        assert_eq!(RuntimeMode::for_environment("production"), RuntimeMode::Production);
        assert_eq!(RuntimeMode::for_environment("e2e"), RuntimeMode::Test);
        assert_eq!(RuntimeMode::for_environment("preview"), RuntimeMode::Development);

        let ambient = HashMap::from([("NODE_ENV".to_string(), "production".to_string())]);
        let context = EnvironmentContext::from_ambient(&ambient, "development");
        assert_eq!(context.requested, "production");

        let ambient = HashMap::from([
            ("APP_ENV".to_string(), "staging".to_string()),
            ("NODE_ENV".to_string(), "development".to_string()),
        ]);
        let context = EnvironmentContext::from_ambient(&ambient, "development");
        assert_eq!(
            context.as_env_pairs(),
            [
                ("APP_ENV", "staging".to_string()),
                ("NODE_ENV", "production".to_string())
            ]
        );
    }
}
