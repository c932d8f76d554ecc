//! # Secret Policy
//!
//! The declarative document that classifies every configuration key and
//! names the committed/local file pair of each deployment target.
//!
//! Loading is strict: comments are stripped, the JSON is checked for the
//! required top-level fields, then for semantic consistency (disjoint key
//! sets, complete targets, resolvable app mappings). Every problem found is
//! reported in a single [`PolicyLoadError::Invalid`].

use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

const SUPPORTED_VERSION: u64 = 1;

/// Why a policy document could not be used. Always fatal.
#[derive(Error, Debug)]
pub enum PolicyLoadError {
    /// No document at the expected path.
    #[error("Secret policy not found at '{0}'.")]
    NotFound(PathBuf),
    /// The document exists but could not be read.
    #[error("Failed to read secret policy '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Not valid JSON once comments are stripped.
    #[error("Secret policy '{path}' is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Every structural and semantic problem found in the document.
    #[error("Secret policy '{}' is invalid:\n{}", path.display(), bullet_list(issues))]
    Invalid { path: PathBuf, issues: Vec<String> },
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The three disjoint key classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// Placeholder in committed files, real value only in local files.
    Secret,
    /// Never in a committed file.
    LocalOnly,
    /// May hold different values in committed and local files.
    LocalOverride,
}

impl KeyClass {
    /// The set name as written in the policy document.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::LocalOnly => "localOnly",
            Self::LocalOverride => "localOverride",
        }
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where environment files may live.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutPolicy {
    /// Root files that must not exist (legacy catch-alls).
    pub forbid_exact: Vec<String>,
    /// When non-empty, every root-level `.env*` file must match an entry.
    pub allow_root: Vec<String>,
    /// Relative paths (or `prefix*` globs) of permitted subdirectory env files.
    pub allow_subdir_globs: Vec<String>,
    /// Example/template file, `.env.example` when unset.
    pub example_file: Option<String>,
}

/// The declared key sets. They must be pairwise disjoint.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyPolicy {
    /// Placeholder when committed, real value only in local files.
    pub secret: Vec<String>,
    /// Only ever in local files.
    pub local_only: Vec<String>,
    /// Committed default, optionally overridden locally.
    pub local_override: Vec<String>,
}

/// File name templates of a target; `{env}` is replaced by the environment.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetFiles {
    /// The checked-in file, e.g. `.env.{env}`.
    pub committed: String,
    /// The git-ignored file, e.g. `.env.{env}.local`.
    pub local: String,
}

/// A deployment target: its file pair and required keys.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetPolicy {
    /// Committed and local file name templates.
    pub files: TargetFiles,
    /// `_common` plus per-environment additions.
    #[serde(default)]
    pub required: BTreeMap<String, Vec<String>>,
}

impl TargetPolicy {
    /// `_common` ∪ `required[environment]`, de-duplicated, first occurrence wins.
    pub fn required_keys(&self, environment: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.required
            .get("_common")
            .into_iter()
            .chain(self.required.get(environment))
            .flatten()
            .filter(|key| seen.insert(key.as_str()))
            .cloned()
            .collect()
    }

    /// The committed file name for `environment`.
    pub fn committed_file(&self, environment: &str) -> String {
        self.files.committed.replace("{env}", environment)
    }

    /// The local file name for `environment`.
    pub fn local_file(&self, environment: &str) -> String {
        self.files.local.replace("{env}", environment)
    }
}

/// A loaded and structurally validated secret policy.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SecretPolicy {
    /// Document format version; only `1` is accepted.
    pub version: u64,
    /// Environments whose file pairs are validated.
    pub environments: Vec<String>,
    /// The exact token committed files use instead of a secret.
    pub secret_placeholder: String,
    /// Where `.env*` files may live.
    #[serde(default)]
    pub layout: LayoutPolicy,
    /// Key classes: secret, local-only.
    pub keys: KeyPolicy,
    /// Runnable app → target id.
    #[serde(default)]
    pub app_to_target: BTreeMap<String, String>,
    /// Target id → its files and required keys.
    pub targets: BTreeMap<String, TargetPolicy>,
    #[serde(skip)]
    classes: HashMap<String, KeyClass>,
}

impl SecretPolicy {
    /// Reads and validates the policy document at `path`.
    pub fn load(path: &Path) -> Result<Self, PolicyLoadError> {
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                PolicyLoadError::NotFound(path.to_path_buf())
            } else {
                PolicyLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::parse(&text, path)
    }

    /// Parses a policy document. `path` is only used in error messages.
    pub fn parse(text: &str, path: &Path) -> Result<Self, PolicyLoadError> {
        let stripped = strip_json_comments(text);
        let document: Value =
            serde_json::from_str(&stripped).map_err(|source| PolicyLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let invalid = |issues: Vec<String>| PolicyLoadError::Invalid {
            path: path.to_path_buf(),
            issues,
        };

        let structural = check_structure(&document);
        if !structural.is_empty() {
            return Err(invalid(structural));
        }

        let mut policy: Self = serde_json::from_value(document)
            .map_err(|e| invalid(vec![format!("malformed document: {e}")]))?;

        let semantic = policy.check_semantics();
        if !semantic.is_empty() {
            return Err(invalid(semantic));
        }

        policy.classes = policy.build_class_index();
        log::debug!(
            "Loaded secret policy '{}': {} environment(s), {} target(s), {} classified key(s).",
            path.display(),
            policy.environments.len(),
            policy.targets.len(),
            policy.classes.len()
        );
        Ok(policy)
    }

    /// The class of `key`, if the policy declares it.
    pub fn classify(&self, key: &str) -> Option<KeyClass> {
        self.classes.get(key).copied()
    }

    /// Whether `value` is exactly the placeholder token.
    pub fn is_placeholder(&self, value: &str) -> bool {
        value == self.secret_placeholder
    }

    /// The target an app deploys to.
    pub fn target_for_app(&self, app: &str) -> Option<(&str, &TargetPolicy)> {
        let target_id = self.app_to_target.get(app)?;
        self.targets
            .get_key_value(target_id)
            .map(|(id, target)| (id.as_str(), target))
    }

    /// Required keys for `app` in `environment`; empty when the app is unmapped.
    pub fn required_keys_for_app(&self, app: &str, environment: &str) -> Vec<String> {
        self.target_for_app(app)
            .map(|(_, target)| target.required_keys(environment))
            .unwrap_or_default()
    }

    /// The example file name, `.env.example` unless configured.
    pub fn example_file(&self) -> &str {
        self.layout
            .example_file
            .as_deref()
            .unwrap_or(crate::constants::DEFAULT_EXAMPLE_FILE)
    }

    fn key_sets(&self) -> [(KeyClass, &Vec<String>); 3] {
        [
            (KeyClass::Secret, &self.keys.secret),
            (KeyClass::LocalOnly, &self.keys.local_only),
            (KeyClass::LocalOverride, &self.keys.local_override),
        ]
    }

    fn check_semantics(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.version != SUPPORTED_VERSION {
            issues.push(format!(
                "unsupported version {} (expected {})",
                self.version, SUPPORTED_VERSION
            ));
        }
        if self.secret_placeholder.trim().is_empty() {
            issues.push("'secretPlaceholder' must not be empty".to_string());
        }

        // Pairwise disjointness, every overlapping key reported once per pair.
        let sets = self.key_sets();
        for (i, (class_a, keys_a)) in sets.iter().enumerate() {
            for (class_b, keys_b) in sets.iter().skip(i + 1) {
                let b: BTreeSet<&String> = keys_b.iter().collect();
                let overlap: BTreeSet<&String> = keys_a.iter().filter(|k| b.contains(k)).collect();
                for key in overlap {
                    issues.push(format!(
                        "key '{key}' appears in both '{class_a}' and '{class_b}'"
                    ));
                }
            }
        }

        for (id, target) in &self.targets {
            if target.files.committed.trim().is_empty() {
                issues.push(format!("target '{id}' has an empty 'files.committed' template"));
            }
            if target.files.local.trim().is_empty() {
                issues.push(format!("target '{id}' has an empty 'files.local' template"));
            }
        }

        for (app, target_id) in &self.app_to_target {
            if !self.targets.contains_key(target_id) {
                issues.push(format!(
                    "app '{app}' maps to undeclared target '{target_id}'"
                ));
            }
        }

        issues
    }

    fn build_class_index(&self) -> HashMap<String, KeyClass> {
        self.key_sets()
            .into_iter()
            .flat_map(|(class, keys)| keys.iter().map(move |k| (k.clone(), class)))
            .collect()
    }
}

/// Checks presence and JSON type of every required field, collecting all issues.
fn check_structure(document: &Value) -> Vec<String> {
    let Some(root) = document.as_object() else {
        return vec!["the document must be a JSON object".to_string()];
    };
    let mut issues = Vec::new();

    match root.get("version") {
        None => issues.push("missing required field 'version'".to_string()),
        Some(v) if !v.is_u64() => issues.push("'version' must be a non-negative integer".to_string()),
        Some(_) => {}
    }
    check_string_array(root.get("environments"), "environments", true, &mut issues);
    match root.get("secretPlaceholder") {
        None => issues.push("missing required field 'secretPlaceholder'".to_string()),
        Some(v) if !v.is_string() => issues.push("'secretPlaceholder' must be a string".to_string()),
        Some(_) => {}
    }

    match root.get("keys") {
        None => issues.push("missing required field 'keys'".to_string()),
        Some(Value::Object(keys)) => {
            for set in ["secret", "localOnly", "localOverride"] {
                check_string_array(keys.get(set), &format!("keys.{set}"), false, &mut issues);
            }
        }
        Some(_) => issues.push("'keys' must be an object".to_string()),
    }

    match root.get("targets") {
        None => issues.push("missing required field 'targets'".to_string()),
        Some(Value::Object(targets)) => {
            for (id, target) in targets {
                let files = target.get("files");
                for side in ["committed", "local"] {
                    if !files.and_then(|f| f.get(side)).is_some_and(Value::is_string) {
                        issues.push(format!("target '{id}' is missing string 'files.{side}'"));
                    }
                }
                if let Some(required) = target.get("required") {
                    match required.as_object() {
                        Some(per_env) => {
                            for (env, keys) in per_env {
                                check_string_array(
                                    Some(keys),
                                    &format!("targets.{id}.required.{env}"),
                                    false,
                                    &mut issues,
                                );
                            }
                        }
                        None => issues.push(format!("'targets.{id}.required' must be an object")),
                    }
                }
            }
        }
        Some(_) => issues.push("'targets' must be an object".to_string()),
    }

    match root.get("appToTarget") {
        None => {}
        Some(Value::Object(map)) => {
            for (app, target) in map {
                if !target.is_string() {
                    issues.push(format!("'appToTarget.{app}' must be a string"));
                }
            }
        }
        Some(_) => issues.push("'appToTarget' must be an object".to_string()),
    }

    if let Some(layout) = root.get("layout") {
        match layout.as_object() {
            Some(layout) => {
                for field in ["forbidExact", "allowRoot", "allowSubdirGlobs"] {
                    check_string_array(layout.get(field), &format!("layout.{field}"), false, &mut issues);
                }
            }
            None => issues.push("'layout' must be an object".to_string()),
        }
    }

    issues
}

fn check_string_array(value: Option<&Value>, name: &str, required: bool, issues: &mut Vec<String>) {
    match value {
        None if required => issues.push(format!("missing required field '{name}'")),
        None => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(_) => issues.push(format!("'{name}' must be an array of strings")),
    }
}

/// Removes `//` line comments and `/* */` block comments outside of string
/// literals. Newlines are preserved so parse errors keep their line numbers.
pub fn strip_json_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        // Workspace secret policy
        "version": 1,
        "environments": ["development", "production"],
        "secretPlaceholder": "__PLACEHOLDER__",
        "layout": { "forbidExact": [".env"], "allowSubdirGlobs": ["apps/legacy/*"] },
        "keys": {
            "secret": ["APP_SECRET", "DB_PASSWORD"],
            "localOnly": ["DEBUG_TOKEN"],
            /* overrides */
            "localOverride": ["API_URL"]
        },
        "appToTarget": { "api": "backend", "web": "frontend" },
        "targets": {
            "backend": {
                "files": { "committed": ".env.{env}", "local": ".env.{env}.local" },
                "required": { "_common": ["DB_PASSWORD", "API_URL"], "production": ["APP_SECRET", "API_URL"] }
            },
            "frontend": {
                "files": { "committed": ".env.{env}.web", "local": ".env.{env}.web.local" }
            }
        }
    }"#;

    fn parse(text: &str) -> Result<SecretPolicy, PolicyLoadError> {
        SecretPolicy::parse(text, Path::new("secrets.policy.jsonc"))
    }

    fn issues(err: PolicyLoadError) -> Vec<String> {
        match err {
            PolicyLoadError::Invalid { issues, .. } => issues,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_policy_loads_and_classifies() {
        let policy = parse(VALID).unwrap();
        assert_eq!(policy.classify("APP_SECRET"), Some(KeyClass::Secret));
        assert_eq!(policy.classify("DEBUG_TOKEN"), Some(KeyClass::LocalOnly));
        assert_eq!(policy.classify("API_URL"), Some(KeyClass::LocalOverride));
        assert_eq!(policy.classify("UNKNOWN"), None);
        assert_eq!(policy.example_file(), ".env.example");
        assert!(policy.is_placeholder("__PLACEHOLDER__"));
    }

    #[test]
    fn test_required_keys_are_unioned_and_deduplicated() {
        let policy = parse(VALID).unwrap();
        assert_eq!(
            policy.required_keys_for_app("api", "production"),
            ["DB_PASSWORD", "API_URL", "APP_SECRET"]
        );
        assert_eq!(
            policy.required_keys_for_app("api", "development"),
            ["DB_PASSWORD", "API_URL"]
        );
        assert!(policy.required_keys_for_app("web", "production").is_empty());
        assert!(policy.required_keys_for_app("unmapped", "production").is_empty());
    }

    #[test]
    fn test_overlapping_key_sets_fail_naming_both_sets() {
        let text = VALID.replace(
            r#""localOnly": ["DEBUG_TOKEN"]"#,
            r#""localOnly": ["DEBUG_TOKEN", "APP_SECRET", "DB_PASSWORD"]"#,
        );
        let issues = issues(parse(&text).unwrap_err());
        assert_eq!(
            issues,
            [
                "key 'APP_SECRET' appears in both 'secret' and 'localOnly'",
                "key 'DB_PASSWORD' appears in both 'secret' and 'localOnly'",
            ]
        );
    }

    #[test]
    fn test_structural_issues_are_aggregated() {
        let issues = issues(
            parse(r#"{ "environments": "dev", "keys": { "secret": [1] }, "targets": { "x": {} } }"#)
                .unwrap_err(),
        );
        assert!(issues.contains(&"missing required field 'version'".to_string()));
        assert!(issues.contains(&"'environments' must be an array of strings".to_string()));
        assert!(issues.contains(&"missing required field 'secretPlaceholder'".to_string()));
        assert!(issues.contains(&"'keys.secret' must be an array of strings".to_string()));
        assert!(issues.contains(&"target 'x' is missing string 'files.committed'".to_string()));
        assert!(issues.contains(&"target 'x' is missing string 'files.local'".to_string()));
    }

    #[test]
    fn test_unknown_target_and_empty_templates_are_rejected() {
        let text = VALID
            .replace(r#""web": "frontend""#, r#""web": "mobile""#)
            .replace(r#""committed": ".env.{env}.web""#, r#""committed": """#);
        let issues = issues(parse(&text).unwrap_err());
        assert_eq!(
            issues,
            [
                "target 'frontend' has an empty 'files.committed' template",
                "app 'web' maps to undeclared target 'mobile'",
            ]
        );
    }

    #[test]
    fn test_strip_comments_keeps_comment_markers_inside_strings() {
        let text = "{\"url\": \"http://x//y\", /* c */ \"a\": \"/*no*/\" // tail\n}";
        let value: Value = serde_json::from_str(&strip_json_comments(text)).unwrap();
        assert_eq!(value["url"], "http://x//y");
        assert_eq!(value["a"], "/*no*/");
    }

    #[test]
    fn test_missing_file_is_reported_as_not_found() {
        let err = SecretPolicy::load(Path::new("/definitely/not/here.jsonc")).unwrap_err();
        assert!(matches!(err, PolicyLoadError::NotFound(_)));
    }
}
