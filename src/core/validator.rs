//! # Policy Validator
//!
//! Enforces the secret policy against the workspace before anything runs.
//!
//! ## Checks
//!
//! 1.  **Root layout**: forbidden legacy root files must not exist, and when
//!     `layout.allowRoot` is set every root-level `.env*` file must match it.
//! 2.  **Stray files**: no `.env*` file may live below the root unless it is
//!     on the built-in allow-list or matches `layout.allowSubdirGlobs`.
//! 3.  **Secret placement**: for every declared environment and target, the
//!     committed file holds placeholders only and the local file holds real
//!     values for declared keys only.
//! 4.  **Example file**: declared keys only, no `localOnly` keys, secrets as
//!     placeholders.
//!
//! A pass never stops at the first problem. Every violation is collected,
//! de-duplicated and returned in one [`ValidationError`].

use crate::{
    constants::{BUILTIN_ALLOWED_ENV_FILES, ENV_FILE_PREFIX, SCAN_SKIP_DIRS},
    core::{
        dotenv,
        paths::relative_display,
        policy::{KeyClass, SecretPolicy},
    },
    dev_utils::BlockTimer,
};
use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::Path,
};
use thiserror::Error;
use walkdir::WalkDir;

/// The two families of fatal validation findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// A forbidden or misplaced environment file.
    Layout,
    /// Placeholder/real-value misuse, undeclared key, missing committed template.
    Secret,
}

/// One problem found by a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Violation {
    /// Which family of rule was broken.
    pub kind: ViolationKind,
    /// Human-readable description naming the file and key involved.
    pub message: String,
}

impl Violation {
    fn layout(message: String) -> Self {
        Self {
            kind: ViolationKind::Layout,
            message,
        }
    }

    fn secret(message: String) -> Self {
        Self {
            kind: ViolationKind::Secret,
            message,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            ViolationKind::Layout => "layout",
            ViolationKind::Secret => "secret",
        };
        write!(f, "[{}] {}", tag, self.message)
    }
}

/// Every violation found in one validation pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Every violation, in check order, without duplicates.
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Misplaced or forbidden environment files.
    pub fn layout_violations(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.kind == ViolationKind::Layout)
    }

    /// Placeholder misuse, undeclared keys and missing templates.
    pub fn secret_violations(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.kind == ViolationKind::Secret)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Environment policy validation failed with {} violation(s):",
            self.violations.len()
        )?;
        for violation in &self.violations {
            write!(f, "\n  {violation}")?;
        }
        Ok(())
    }
}

/// Validates a workspace against a loaded [`SecretPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct PolicyValidator<'a> {
    root: &'a Path,
    policy: &'a SecretPolicy,
}

impl<'a> PolicyValidator<'a> {
    /// A validator for the workspace at `root`.
    pub fn new(root: &'a Path, policy: &'a SecretPolicy) -> Self {
        Self { root, policy }
    }

    /// Runs every check.
    ///
    /// # Errors
    /// A [`ValidationError`] listing every violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let violations = self.collect_violations();
        if violations.is_empty() {
            log::debug!("Environment policy validation passed.");
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    /// Runs every check and returns the de-duplicated violations in a stable order.
    pub fn collect_violations(&self) -> Vec<Violation> {
        let _timer = BlockTimer::new("PolicyValidator::collect_violations");
        let mut violations = Vec::new();

        self.check_root_layout(&mut violations);
        self.check_stray_files(&mut violations);
        self.check_secret_placement(&mut violations);
        self.check_example_file(&mut violations);

        let mut seen = HashSet::new();
        violations.retain(|v| seen.insert(v.clone()));
        violations
    }

    // --- 1. Root layout ---

    fn check_root_layout(&self, out: &mut Vec<Violation>) {
        let forbidden = &self.policy.layout.forbid_exact;
        for name in forbidden {
            if self.root.join(name).exists() {
                out.push(Violation::layout(format!(
                    "'{name}' is forbidden at the workspace root; move its keys into the per-environment files"
                )));
            }
        }

        let allow_root = &self.policy.layout.allow_root;
        if allow_root.is_empty() {
            return;
        }
        let Ok(entries) = fs::read_dir(self.root) else {
            return;
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(ENV_FILE_PREFIX))
            .collect();
        names.sort();
        for name in names {
            if forbidden.contains(&name) {
                continue;
            }
            if !allow_root.iter().any(|p| matches_trailing_glob(p, &name)) {
                out.push(Violation::layout(format!(
                    "'{name}' is not an allowed root environment file (see layout.allowRoot)"
                )));
            }
        }
    }

    // --- 2. Stray files below the root ---

    fn check_stray_files(&self, out: &mut Vec<Violation>) {
        let walker = WalkDir::new(self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && SCAN_SKIP_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
            });

        for entry in walker.filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("Skipping unreadable entry during scan: {}", err);
                None
            }
        }) {
            if entry.depth() < 2 || !entry.file_type().is_file() {
                continue;
            }
            if !entry.file_name().to_string_lossy().starts_with(ENV_FILE_PREFIX) {
                continue;
            }
            let relative = relative_display(self.root, entry.path());
            if self.is_allowed_subdir_file(&relative) {
                log::trace!("Allowed subdirectory env file: {}", relative);
                continue;
            }
            out.push(Violation::layout(format!(
                "'{relative}' lives outside the workspace root; environment files belong at the root"
            )));
        }
    }

    fn is_allowed_subdir_file(&self, relative: &str) -> bool {
        BUILTIN_ALLOWED_ENV_FILES.contains(&relative)
            || self
                .policy
                .layout
                .allow_subdir_globs
                .iter()
                .any(|pattern| matches_trailing_glob(pattern, relative))
    }

    // --- 3. Secret placement ---

    fn check_secret_placement(&self, out: &mut Vec<Violation>) {
        for environment in &self.policy.environments {
            let mut visited: HashSet<(String, String)> = HashSet::new();
            for (target_id, target) in &self.policy.targets {
                let committed_name = target.committed_file(environment);
                let local_name = target.local_file(environment);
                let committed_path = self.root.join(&committed_name);
                let local_path = self.root.join(&local_name);

                let committed = match (committed_path.is_file(), local_path.is_file()) {
                    (false, false) => continue,
                    (false, true) => {
                        out.push(Violation::secret(format!(
                            "'{local_name}' exists but its committed template '{committed_name}' does not (target '{target_id}', env '{environment}'); create the committed file first"
                        )));
                        continue;
                    }
                    (true, _) => match self.read_env_file(&committed_path, &committed_name, out) {
                        Some(values) => values,
                        None => continue,
                    },
                };

                // Content checks run once per file pair even if targets share files.
                if !visited.insert((committed_name.clone(), local_name.clone())) {
                    continue;
                }
                self.check_committed_content(&committed_name, &committed, out);
                self.check_secret_placeholders(target_id, environment, &committed_name, &committed, out);

                if local_path.is_file()
                    && let Some(local) = self.read_env_file(&local_path, &local_name, out)
                {
                    self.check_local_content(&local_name, &local, out);
                }
            }
        }
    }

    fn check_committed_content(
        &self,
        committed_name: &str,
        committed: &BTreeMap<String, String>,
        out: &mut Vec<Violation>,
    ) {
        let placeholder = &self.policy.secret_placeholder;
        for (key, value) in committed {
            match self.policy.classify(key) {
                Some(KeyClass::Secret) if !self.policy.is_placeholder(value) => {
                    out.push(Violation::secret(format!(
                        "secret '{key}' in committed file '{committed_name}' must hold the placeholder '{placeholder}', not a real value"
                    )));
                }
                Some(KeyClass::LocalOnly) => {
                    out.push(Violation::secret(format!(
                        "localOnly key '{key}' must not appear in committed file '{committed_name}'"
                    )));
                }
                _ => {}
            }
        }
    }

    /// Every declared secret must be templated in the committed file.
    fn check_secret_placeholders(
        &self,
        target_id: &str,
        environment: &str,
        committed_name: &str,
        committed: &BTreeMap<String, String>,
        out: &mut Vec<Violation>,
    ) {
        for key in &self.policy.keys.secret {
            if !committed.contains_key(key) {
                out.push(Violation::secret(format!(
                    "secret '{key}' is missing from committed file '{committed_name}' (target '{target_id}', env '{environment}'); add it as '{key}={}'",
                    self.policy.secret_placeholder
                )));
            }
        }
    }

    fn check_local_content(
        &self,
        local_name: &str,
        local: &BTreeMap<String, String>,
        out: &mut Vec<Violation>,
    ) {
        for (key, value) in local {
            match self.policy.classify(key) {
                None => out.push(Violation::secret(format!(
                    "undeclared key '{key}' in '{local_name}'; declare it as secret, localOnly or localOverride"
                ))),
                Some(KeyClass::Secret) if self.policy.is_placeholder(value) => {
                    out.push(Violation::secret(format!(
                        "secret '{key}' in '{local_name}' still holds the placeholder; set a real value"
                    )));
                }
                // A secret without a committed template and a localOnly key
                // also present in the committed file are reported by the
                // committed-file checks.
                Some(_) => {}
            }
        }
    }

    // --- 4. Example file ---

    fn check_example_file(&self, out: &mut Vec<Violation>) {
        let name = self.policy.example_file();
        let path = self.root.join(name);
        if !path.is_file() {
            return;
        }
        let Some(example) = self.read_env_file(&path, name, out) else {
            return;
        };
        for (key, value) in &example {
            match self.policy.classify(key) {
                None => out.push(Violation::secret(format!(
                    "undeclared key '{key}' in example file '{name}'"
                ))),
                Some(KeyClass::LocalOnly) => out.push(Violation::secret(format!(
                    "localOnly key '{key}' must not appear in example file '{name}'"
                ))),
                Some(KeyClass::Secret) if !self.policy.is_placeholder(value) => {
                    out.push(Violation::secret(format!(
                        "secret '{key}' in example file '{name}' must use the placeholder '{}'",
                        self.policy.secret_placeholder
                    )));
                }
                _ => {}
            }
        }
    }

    fn read_env_file(
        &self,
        path: &Path,
        name: &str,
        out: &mut Vec<Violation>,
    ) -> Option<BTreeMap<String, String>> {
        match dotenv::parse_file(path) {
            Ok(assignments) => Some(
                assignments
                    .into_iter()
                    .map(|a| (a.key, a.value))
                    .collect(),
            ),
            Err(e) => {
                out.push(Violation::secret(format!("could not read '{name}': {e}")));
                None
            }
        }
    }
}

/// Exact match, or prefix match when the pattern ends in a single `*`.
/// A `*` anywhere else is literal.
pub fn matches_trailing_glob(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) if !prefix.contains('*') => candidate.starts_with(prefix),
        _ => pattern == candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    const POLICY: &str = r#"{
        "version": 1,
        "environments": ["development", "production"],
        "secretPlaceholder": "__PLACEHOLDER__",
        "layout": {
            "forbidExact": [".env", ".env.local"],
            "allowSubdirGlobs": ["tools/fixtures/*"]
        },
        "keys": {
            "secret": ["APP_SECRET"],
            "localOnly": ["DEBUG_TOKEN"],
            "localOverride": ["API_URL"]
        },
        "appToTarget": { "api": "backend" },
        "targets": {
            "backend": {
                "files": { "committed": ".env.{env}", "local": ".env.{env}.local" },
                "required": { "production": ["APP_SECRET"] }
            }
        }
    }"#;

    fn workspace(files: &[(&str, &str)]) -> (TempDir, SecretPolicy) {
        let dir = tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        let policy = SecretPolicy::parse(POLICY, Path::new("policy.jsonc")).unwrap();
        (dir, policy)
    }

    fn violations(dir: &TempDir, policy: &SecretPolicy) -> Vec<Violation> {
        PolicyValidator::new(dir.path(), policy).collect_violations()
    }

    #[test]
    fn test_placeholder_in_committed_file_passes() {
        let (dir, policy) = workspace(&[(".env.development", "APP_SECRET=__PLACEHOLDER__\n")]);
        assert!(PolicyValidator::new(dir.path(), &policy).validate().is_ok());
    }

    #[test]
    fn test_real_secret_in_committed_file_is_reported_once() {
        let (dir, policy) = workspace(&[(".env.development", "APP_SECRET=sk_live_123\n")]);
        let found = violations(&dir, &policy);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::Secret);
        assert!(found[0].message.contains("APP_SECRET"));
        assert!(found[0].message.contains(".env.development"));
    }

    #[test]
    fn test_placeholder_committed_and_real_local_value_round_trips() {
        let (dir, policy) = workspace(&[
            (".env.development", "APP_SECRET=__PLACEHOLDER__\nAPI_URL=http://localhost\n"),
            (".env.development.local", "APP_SECRET=sk_test_1\nAPI_URL=http://127.0.0.1\nDEBUG_TOKEN=x\n"),
        ]);
        assert_eq!(violations(&dir, &policy), Vec::<Violation>::new());
    }

    #[test]
    fn test_undeclared_local_key_is_reported_once() {
        let (dir, policy) = workspace(&[
            (".env.development", "APP_SECRET=__PLACEHOLDER__\n"),
            (".env.development.local", "APP_SECRET=real\nMYSTERY=1\n"),
        ]);
        let found = violations(&dir, &policy);
        let undeclared: Vec<_> = found
            .iter()
            .filter(|v| v.message.contains("undeclared key 'MYSTERY'"))
            .collect();
        assert_eq!(undeclared.len(), 1);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_placeholder_leaking_into_local_file_is_reported() {
        let (dir, policy) = workspace(&[
            (".env.development", "APP_SECRET=__PLACEHOLDER__\n"),
            (".env.development.local", "APP_SECRET=__PLACEHOLDER__\n"),
        ]);
        let found = violations(&dir, &policy);
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("still holds the placeholder"));
    }

    #[test]
    fn test_local_secret_without_committed_template_is_reported() {
        let (dir, policy) = workspace(&[
            (".env.development", "API_URL=x\n"),
            (".env.development.local", "APP_SECRET=real\n"),
        ]);
        let found = violations(&dir, &policy);
        assert_eq!(found.len(), 1, "{found:#?}");
        assert!(found[0].message.contains("'APP_SECRET' is missing from committed file '.env.development'"));
    }

    #[test]
    fn test_local_file_without_committed_file_is_reported() {
        let (dir, policy) = workspace(&[(".env.production.local", "APP_SECRET=real\n")]);
        let found = violations(&dir, &policy);
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("committed template '.env.production'"));
    }

    #[test]
    fn test_local_only_key_in_committed_file_is_reported_once() {
        let (dir, policy) = workspace(&[
            (".env.development", "APP_SECRET=__PLACEHOLDER__\nDEBUG_TOKEN=abc\n"),
            (".env.development.local", "DEBUG_TOKEN=abc\n"),
        ]);
        let found = violations(&dir, &policy);
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("localOnly key 'DEBUG_TOKEN'"));
    }

    #[test]
    fn test_every_secret_must_be_templated_in_committed_file() {
        // Development requires nothing, the secret still needs its placeholder.
        let (dir, policy) = workspace(&[
            (".env.development", "API_URL=x\n"),
            (".env.production", "API_URL=https://api\n"),
        ]);
        let found = violations(&dir, &policy);
        assert_eq!(found.len(), 2, "{found:#?}");
        assert!(found[0].message.contains("'APP_SECRET' is missing from committed file '.env.development'"));
        assert!(found[1].message.contains("'APP_SECRET' is missing from committed file '.env.production'"));
        assert!(found[1].message.contains("add it as 'APP_SECRET=__PLACEHOLDER__'"));
    }

    #[test]
    fn test_identical_findings_are_reported_once() {
        let (dir, mut policy) = workspace(&[(".env", "A=1\n")]);
        policy.layout.forbid_exact = vec![".env".to_string(), ".env".to_string()];
        let found = violations(&dir, &policy);
        assert_eq!(found.len(), 1, "{found:#?}");
        assert_eq!(found[0].kind, ViolationKind::Layout);
    }

    #[test]
    fn test_layout_violations_for_forbidden_and_stray_files() {
        let (dir, policy) = workspace(&[
            (".env", "A=1\n"),
            (".env.local", "A=1\n"),
            ("apps/web/.env.development", "A=1\n"),
            ("tools/fixtures/.env.test", "A=1\n"),
            ("node_modules/pkg/.env", "A=1\n"),
            (".devcontainer/.env", "A=1\n"),
        ]);
        let err = PolicyValidator::new(dir.path(), &policy).validate().unwrap_err();
        let layout: Vec<_> = err.layout_violations().map(|v| v.message.clone()).collect();
        assert_eq!(layout.len(), 3, "{layout:#?}");
        assert!(layout[0].starts_with("'.env' is forbidden"));
        assert!(layout[1].starts_with("'.env.local' is forbidden"));
        assert!(layout[2].starts_with("'apps/web/.env.development' lives outside"));
        assert_eq!(err.secret_violations().count(), 0);
    }

    #[test]
    fn test_allow_root_restricts_root_files() {
        let (dir, mut policy) = workspace(&[
            (".env.development", "APP_SECRET=__PLACEHOLDER__\n"),
            (".env.sandbox", "A=1\n"),
        ]);
        policy.layout.allow_root = vec![".env.development*".to_string(), ".env.production*".to_string()];
        let found = violations(&dir, &policy);
        assert_eq!(found.len(), 1);
        assert!(found[0].message.starts_with("'.env.sandbox' is not an allowed"));
    }

    #[test]
    fn test_example_file_rules() {
        let (dir, policy) = workspace(&[(
            ".env.example",
            "APP_SECRET=changeme\nDEBUG_TOKEN=\nAPI_URL=http://localhost\nOTHER=1\n",
        )]);
        let messages: Vec<_> = violations(&dir, &policy)
            .into_iter()
            .map(|v| v.message)
            .collect();
        assert_eq!(messages.len(), 3, "{messages:#?}");
        assert!(messages.iter().any(|m| m.contains("secret 'APP_SECRET' in example file")));
        assert!(messages.iter().any(|m| m.contains("localOnly key 'DEBUG_TOKEN'")));
        assert!(messages.iter().any(|m| m.contains("undeclared key 'OTHER'")));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let (dir, policy) = workspace(&[
            (".env", "A=1\n"),
            ("apps/api/.env.test", "A=1\n"),
            (".env.development", "APP_SECRET=live\nDEBUG_TOKEN=1\n"),
            (".env.development.local", "X=1\nY=2\n"),
        ]);
        let first = PolicyValidator::new(dir.path(), &policy).validate().unwrap_err();
        let second = PolicyValidator::new(dir.path(), &policy).validate().unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(first.violations.len(), 6);
    }

    #[test]
    fn test_trailing_glob_semantics() {
        assert!(matches_trailing_glob("apps/legacy/*", "apps/legacy/.env"));
        assert!(matches_trailing_glob("apps/legacy/.env", "apps/legacy/.env"));
        assert!(!matches_trailing_glob("apps/*/.env", "apps/web/.env"));
        assert!(!matches_trailing_glob("apps/legacy/*", "apps/other/.env"));
    }
}
