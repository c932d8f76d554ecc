// src/constants.rs

//! File names, variable names and built-in defaults.

/// The name of the directory holding dx configuration for a workspace.
pub const DX_DIR: &str = ".dx";

/// The name of the workspace configuration file (inside .dx/).
pub const PROJECT_CONFIG_FILENAME: &str = "dx.toml";

/// The name of the secret policy document (inside the config directory).
pub const POLICY_FILENAME: &str = "secrets.policy.jsonc";

/// Overrides workspace root discovery when set.
pub const WORKSPACE_ROOT_VAR: &str = "DX_WORKSPACE_ROOT";

/// Overrides the configuration directory when set.
pub const CONFIG_DIR_VAR: &str = "DX_CONFIG_DIR";

/// Every environment file starts with this prefix.
pub const ENV_FILE_PREFIX: &str = ".env";

/// The example/template file validated when no other name is configured.
pub const DEFAULT_EXAMPLE_FILE: &str = ".env.example";

/// The requested (rich) environment name, e.g. `staging`.
pub const REQUESTED_ENV_VAR: &str = "APP_ENV";

/// The simplified runtime mode understood by most tooling.
pub const RUNTIME_MODE_VAR: &str = "NODE_ENV";

/// Set by virtually every CI provider.
pub const CI_VAR: &str = "CI";

/// The environment used when neither the caller nor the ambient state names one.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Layer templates applied to any environment that `dx.toml` does not configure.
pub const DEFAULT_LAYER_TEMPLATES: &[&str] = &[
    ".env.{env}",
    ".env.{env}.local",
    ".env.{env}.{app}",
    ".env.{env}.{app}.local",
];

/// Directories never descended into while looking for stray environment files.
pub const SCAN_SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".next",
    ".turbo",
    ".vercel",
    "coverage",
];

/// Environment files allowed below the workspace root regardless of policy.
pub const BUILTIN_ALLOWED_ENV_FILES: &[&str] = &[".devcontainer/.env", "docker/.env.example"];

/// File watchers fall back to polling when these are set.
pub const POLLING_VARS: &[&str] = &["CHOKIDAR_USEPOLLING", "WATCHPACK_POLLING"];

/// Disables task-runner caches while an auto-fix regenerates artifacts.
pub const NO_CACHE_VARS: &[&str] = &["TURBO_FORCE", "NX_SKIP_NX_CACHE"];
