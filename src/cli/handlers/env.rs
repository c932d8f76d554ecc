//! `dx env`: prints the layered environment with secrets masked.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::handlers::commons::{self, WorkspaceArgs},
    core::{
        layers::{EnvironmentContext, EnvironmentLayerStore, LayeredEnvironment},
        paths::relative_display,
        policy::{KeyClass, SecretPolicy},
    },
    state::AppContext,
};

const MASK: &str = "********";

#[derive(Parser, Debug)]
#[command(
    no_binary_name = true,
    about = "Prints the layered environment an app would run with."
)]
struct EnvArgs {
    #[arg(long)]
    app: Option<String>,

    #[arg(long = "env", value_name = "ENV")]
    environment: Option<String>,

    /// Print secret values instead of masking them.
    #[arg(long)]
    show_secrets: bool,

    #[command(flatten)]
    workspace: WorkspaceArgs,
}

/// Renders `KEY=VALUE` lines, masking real secret values unless `reveal`.
fn render(layered: &LayeredEnvironment, policy: Option<&SecretPolicy>, reveal: bool) -> Vec<String> {
    layered
        .vars
        .iter()
        .map(|(key, value)| {
            let hide = !reveal
                && policy.is_some_and(|p| {
                    p.classify(key) == Some(KeyClass::Secret) && !p.is_placeholder(value)
                });
            format!("{}={}", key, if hide { MASK } else { value })
        })
        .collect()
}

/// Entry point for `dx env`.
pub fn handle(args: Vec<String>, ctx: &AppContext) -> Result<()> {
    let env_args = EnvArgs::try_parse_from(&args)?;
    let (workspace, config) = commons::load_workspace(&env_args.workspace)?;

    let store = EnvironmentLayerStore::new(workspace.root.clone(), config.layers);
    let context = match env_args.environment {
        Some(env) => EnvironmentContext::new(env),
        None => EnvironmentContext::from_ambient(
            &std::env::vars().collect(),
            crate::constants::DEFAULT_ENVIRONMENT,
        ),
    };
    let layered = store.collect_env_from_layers(env_args.app.as_deref(), &context.requested)?;

    let policy = match ctx.policy_cache.load(&workspace.config_dir) {
        Ok(policy) => Some(policy),
        Err(e) => {
            log::debug!("No policy for masking: {}", e);
            None
        }
    };

    println!(
        "{} {} ({})",
        "Environment".bold(),
        context.requested.cyan(),
        context.mode
    );
    for file in &layered.files {
        println!("{} {}", "  layer".dimmed(), relative_display(&workspace.root, file));
    }
    if layered.vars.is_empty() {
        println!("{}", "  (no variables)".dimmed());
    }
    for line in render(&layered, policy.as_deref(), env_args.show_secrets) {
        println!("{line}");
    }
    for warning in &layered.warnings {
        println!("{} {}", "Warning:".yellow(), warning);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeMap, fs, path::Path};
    use tempfile::tempdir;

    #[test]
    fn test_real_secrets_are_masked() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(".env.development"),
            "APP_SECRET=__PLACEHOLDER__\nAPI_URL=http://localhost\n",
        )
        .unwrap();
        fs::write(dir.path().join(".env.development.local"), "APP_SECRET=sk_test\n").unwrap();
        let policy = SecretPolicy::parse(
            r#"{ "version": 1, "environments": ["development"], "secretPlaceholder": "__PLACEHOLDER__",
                 "keys": { "secret": ["APP_SECRET"], "localOverride": ["API_URL"] }, "targets": {} }"#,
            Path::new("policy.jsonc"),
        )
        .unwrap();
        let layered = EnvironmentLayerStore::new(dir.path(), BTreeMap::new())
            .collect_env_from_layers(None, "development")
            .unwrap();

        assert_eq!(
            render(&layered, Some(&policy), false),
            vec!["APP_SECRET=********", "API_URL=http://localhost"]
        );
        assert_eq!(
            render(&layered, Some(&policy), true)[0],
            "APP_SECRET=sk_test"
        );
    }
}
