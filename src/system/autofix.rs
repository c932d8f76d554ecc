// src/system/autofix.rs

//! Recognizes well-known failures in a command's stderr and maps each to one
//! remedy. Rules are plain data, checked in order.

use lazy_static::lazy_static;
use regex::Regex;

/// What the executor does when a rule matches a failed command's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    /// Re-run port resolution (forced) for the invocation's ports.
    FreePorts,
    /// Print which environment files to fill in. Never retries.
    MissingEnvGuidance,
    /// Run the configured ORM generate command with caches disabled.
    GenerateOrmClient,
    /// Run the configured dependency install command.
    InstallDependencies,
}

/// A failure class recognized in a command's stderr.
#[derive(Debug)]
pub struct FixRule {
    /// Shown to the user when the rule fires.
    pub name: &'static str,
    pub matches: fn(&str) -> bool,
    pub remedy: Remedy,
}

/// Result of applying a [`Remedy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOutcome {
    /// The remedy did something.
    pub applied: bool,
    /// The failed command should run again.
    pub retry: bool,
}

impl FixOutcome {
    /// Nothing was done; surface the original error.
    pub const NOT_APPLIED: Self = Self {
        applied: false,
        retry: false,
    };
    /// Fixed; run the command again.
    pub const RETRY: Self = Self {
        applied: true,
        retry: true,
    };
    /// Advice printed; surface the original error.
    pub const GUIDANCE_ONLY: Self = Self {
        applied: true,
        retry: false,
    };
}

lazy_static! {
    static ref PORT_IN_USE_RE: Regex =
        Regex::new(r"(?i)EADDRINUSE|address already in use|port \d+ is already in use").unwrap();
    static ref PORT_NUMBER_RE: Regex =
        Regex::new(r"(?i)(?:EADDRINUSE|address already in use|port)\D{0,40}?(\d{2,5})").unwrap();
    static ref MISSING_ENV_RE: Regex =
        Regex::new(r"Missing required environment variable|Invalid environment variables").unwrap();
    static ref ORM_CLIENT_RE: Regex = Regex::new(
        r"@prisma/client did not initialize yet|prisma generate|Cannot find module '\.prisma/client"
    )
    .unwrap();
    static ref NOT_FOUND_RE: Regex =
        Regex::new(r"Cannot find module|MODULE_NOT_FOUND|command not found|not recognized as an internal or external command")
            .unwrap();
}

/// Evaluated in order; the first match wins.
pub static FIX_RULES: &[FixRule] = &[
    FixRule {
        name: "port in use",
        matches: |output| PORT_IN_USE_RE.is_match(output),
        remedy: Remedy::FreePorts,
    },
    FixRule {
        name: "missing environment variable",
        matches: |output| MISSING_ENV_RE.is_match(output),
        remedy: Remedy::MissingEnvGuidance,
    },
    FixRule {
        name: "ORM client not generated",
        matches: |output| ORM_CLIENT_RE.is_match(output),
        remedy: Remedy::GenerateOrmClient,
    },
    FixRule {
        name: "module or command not found",
        matches: |output| NOT_FOUND_RE.is_match(output),
        remedy: Remedy::InstallDependencies,
    },
];

/// The first rule matching `output`.
pub fn match_rule(output: &str) -> Option<&'static FixRule> {
    FIX_RULES.iter().find(|rule| (rule.matches)(output))
}

/// The port named in an "address in use" message, if any.
pub fn port_from_output(output: &str) -> Option<u16> {
    PORT_NUMBER_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
