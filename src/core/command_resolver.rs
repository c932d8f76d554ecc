// src/core/command_resolver.rs

//! Lookup in the `[commands]` tree of `dx.toml`.

use crate::core::layers::RuntimeMode;
use crate::models::{CommandLeaf, CommandNode};
use std::collections::BTreeMap;
use thiserror::Error;

/// The key a branch may use for "any other environment".
const DEFAULT_BRANCH: &str = "default";

/// Why a command name did not resolve to a leaf.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandLookupError {
    /// No node at that dotted path.
    #[error("Command '{0}' is not defined in the [commands] table.")]
    NotFound(String),
    /// The branch has neither the environment, its mode, nor `default`.
    #[error("Command '{path}' has no entry for environment '{environment}' (and no 'default').")]
    NoEnvironmentBranch { path: String, environment: String },
}

/// A leaf picked out of the command tree, with the path that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand<'a> {
    /// Full dotted path, including the selected environment branches.
    pub path: String,
    pub leaf: &'a CommandLeaf,
}

/// Resolves a dotted command name (`build.backend`) for an environment.
///
/// The name walks branches by child name. Once the name is consumed, any
/// remaining branches are selected by environment: the exact environment
/// name first, then its runtime mode (`production` for `staging`), then
/// `default`.
pub fn resolve_command<'a>(
    commands: &'a BTreeMap<String, CommandNode>,
    name: &str,
    environment: &str,
) -> Result<ResolvedCommand<'a>, CommandLookupError> {
    let not_found = || CommandLookupError::NotFound(name.to_string());

    let mut segments = name.split('.').filter(|s| !s.is_empty());
    let first = segments.next().ok_or_else(not_found)?;
    let mut node = commands.get(first).ok_or_else(not_found)?;
    let mut path = first.to_string();

    for segment in segments {
        match node {
            CommandNode::Branch(children) => {
                node = children.get(segment).ok_or_else(not_found)?;
                path.push('.');
                path.push_str(segment);
            }
            CommandNode::Leaf(_) => return Err(not_found()),
        }
    }

    select_for_environment(node, path, environment)
}

fn select_for_environment<'a>(
    node: &'a CommandNode,
    path: String,
    environment: &str,
) -> Result<ResolvedCommand<'a>, CommandLookupError> {
    match node {
        CommandNode::Leaf(leaf) => Ok(ResolvedCommand { path, leaf }),
        CommandNode::Branch(children) => {
            let mode = RuntimeMode::for_environment(environment);
            let (key, child) = [environment, mode.as_str(), DEFAULT_BRANCH]
                .into_iter()
                .find_map(|key| children.get(key).map(|child| (key, child)))
                .ok_or_else(|| CommandLookupError::NoEnvironmentBranch {
                    path: path.clone(),
                    environment: environment.to_string(),
                })?;
            log::debug!("Command '{}' resolved via branch '{}'.", path, key);
            select_for_environment(child, format!("{path}.{key}"), environment)
        }
    }
}

/// Every runnable path in the tree, sorted, for listings and suggestions.
pub fn list_commands(commands: &BTreeMap<String, CommandNode>) -> Vec<String> {
    fn walk(prefix: &str, node: &CommandNode, out: &mut Vec<String>) {
        match node {
            CommandNode::Leaf(_) => out.push(prefix.to_string()),
            CommandNode::Branch(children) => {
                for (name, child) in children {
                    walk(&format!("{prefix}.{name}"), child, out);
                }
            }
        }
    }

    let mut out = Vec::new();
    for (name, node) in commands {
        walk(name, node, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DxConfig;

    fn commands() -> BTreeMap<String, CommandNode> {
        let config: DxConfig = toml::from_str(
            r#"
            [commands.lint]
            command = "pnpm lint"

            [commands.dev.development]
            command = "pnpm dev"

            [commands.dev.production]
            command = "pnpm start"

            [commands.seed.production]
            command = "pnpm seed --prod"

            [commands.seed.default]
            command = "pnpm seed"

            [commands.build.backend.production]
            command = "pnpm --filter api build"

            [commands.build.backend.test]
            command = "pnpm --filter api build:test"
            "#,
        )
        .unwrap();
        config.commands
    }

    #[test]
    fn test_leaf_ignores_environment() {
        let commands = commands();
        let resolved = resolve_command(&commands, "lint", "production").unwrap();
        assert_eq!(resolved.leaf.command, "pnpm lint");
        assert_eq!(resolved.path, "lint");
    }

    #[test]
    fn test_environment_selection_order() {
        let commands = commands();
        let exact = resolve_command(&commands, "dev", "development").unwrap();
        assert_eq!(exact.leaf.command, "pnpm dev");

        // `staging` runs in production mode.
        let by_mode = resolve_command(&commands, "dev", "staging").unwrap();
        assert_eq!(by_mode.leaf.command, "pnpm start");
        assert_eq!(by_mode.path, "dev.production");

        let e2e = resolve_command(&commands, "build.backend", "e2e").unwrap();
        assert_eq!(e2e.leaf.command, "pnpm --filter api build:test");

        // `preview` maps to development mode, which `seed` does not define.
        let fallback = resolve_command(&commands, "seed", "preview").unwrap();
        assert_eq!(fallback.path, "seed.default");
    }

    #[test]
    fn test_lookup_errors() {
        let commands = commands();
        assert_eq!(
            resolve_command(&commands, "deploy", "production"),
            Err(CommandLookupError::NotFound("deploy".to_string()))
        );
        assert_eq!(
            resolve_command(&commands, "lint.extra", "production"),
            Err(CommandLookupError::NotFound("lint.extra".to_string()))
        );
        assert_eq!(
            resolve_command(&commands, "build.backend", "development"),
            Err(CommandLookupError::NoEnvironmentBranch {
                path: "build.backend".to_string(),
                environment: "development".to_string(),
            })
        );
    }

    #[test]
    fn test_list_commands_is_sorted_and_flat() {
        assert_eq!(
            list_commands(&commands()),
            vec![
                "build.backend.production",
                "build.backend.test",
                "dev.development",
                "dev.production",
                "lint",
                "seed.default",
                "seed.production",
            ]
        );
    }
}
