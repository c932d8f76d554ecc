//! # Command Executor
//!
//! Runs a shell command inside a fully prepared environment:
//!
//! 1.  Pick the effective environment (options, ambient `APP_ENV`, default).
//! 2.  Unless skipped, validate the secret policy (once per executor) and,
//!     outside CI, check that the app's required variables are set.
//! 3.  Free any requested ports.
//! 4.  Compose the child's variables: layered files, the `APP_ENV`/`NODE_ENV`
//!     pair, polling fallbacks, caller overrides, and finally the forced
//!     runtime mode for build and dev-server commands.
//! 5.  Spawn through the platform shell, tracked by the [`ProcessRegistry`].
//! 6.  On failure, try one matching auto-fix and retry while budget remains.

use crate::{
    constants::{CI_VAR, DEFAULT_ENVIRONMENT, NO_CACHE_VARS, POLLING_VARS, RUNTIME_MODE_VAR},
    core::{
        cache::PolicyCache,
        layers::{EnvironmentContext, EnvironmentLayerStore, LayerError, LayeredEnvironment, RuntimeMode},
        paths::{Workspace, relative_display},
        policy::PolicyLoadError,
        validator::{PolicyValidator, ValidationError},
    },
    models::{AutofixConfig, DxConfig, ExecutionOptions},
    system::{
        autofix::{self, FixOutcome, FixRule, Remedy},
        ports::{self, PortError, PortInspector, PortSettings, SystemPortInspector},
        process_registry::{ProcessRegistry, Termination, terminate_pid},
        prompt::Confirmation,
    },
};
use colored::*;
use lazy_static::lazy_static;
use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io::IsTerminal,
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    task::JoinSet,
    time::Instant,
};

/// Lines of stderr kept for error reports and auto-fix matching.
const STDERR_TAIL_LINES: usize = 40;

/// How long stderr may keep draining after the shell exits. A background
/// process still holding the pipe is not waited for beyond this.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Everything that can stop a command from running to a clean exit.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The command line was blank.
    #[error("No command specified to run.")]
    EmptyCommand,
    /// The secret policy could not be loaded.
    #[error(transparent)]
    Policy(#[from] PolicyLoadError),
    /// The workspace breaks the secret policy.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A layer file could not be read.
    #[error(transparent)]
    Layers(#[from] LayerError),
    /// Required variables of the app are unset or still placeholders.
    #[error("{}", required_vars_message(app, environment, missing, placeholders))]
    RequiredVars {
        app: String,
        environment: String,
        missing: Vec<String>,
        placeholders: Vec<String>,
    },
    /// A requested port could not be freed.
    #[error(transparent)]
    PortConflict(#[from] PortError),
    /// The shell could not be started or waited on.
    #[error("Command '{command}' could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// The command exited unsuccessfully.
    #[error("Command '{command}' exited with {}.", describe_exit(*code))]
    ProcessExit {
        command: String,
        /// `None` when a signal ended it.
        code: Option<i32>,
        /// Last lines written to stderr.
        stderr_tail: String,
    },
    /// The command ran past its timeout and was stopped. Never retried.
    #[error("Command '{command}' timed out after {} ms.", timeout.as_millis())]
    ProcessTimeout { command: String, timeout: Duration },
}

impl ExecutionError {
    /// Whether an auto-fix may be attempted for this failure.
    fn is_fixable(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::ProcessExit { .. })
    }

    /// The text auto-fix rules are matched against.
    fn diagnostic_output(&self) -> String {
        match self {
            Self::ProcessExit { stderr_tail, .. } => stderr_tail.clone(),
            other => other.to_string(),
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by a signal)".to_string(),
    }
}

fn required_vars_message(
    app: &str,
    environment: &str,
    missing: &[String],
    placeholders: &[String],
) -> String {
    let mut message = format!(
        "App '{app}' cannot run in '{environment}': required variables are not set."
    );
    if !missing.is_empty() {
        message.push_str(&format!("\n  missing: {}", missing.join(", ")));
    }
    if !placeholders.is_empty() {
        message.push_str(&format!(
            "\n  still placeholders: {}",
            placeholders.join(", ")
        ));
    }
    message
}

// --- Command classification ---

lazy_static! {
    static ref BUILD_RE: Regex =
        Regex::new(r"(?:^|[\s/:;&|])(?:build|compile)(?:$|[\s:;&|])").unwrap();
    static ref DEV_SERVER_RE: Regex =
        Regex::new(r"(?:^|[\s/:;&|])(?:dev|serve)(?:$|[\s:;&|])|--watch\b").unwrap();
}

/// What a command line looks like it does, which decides its runtime mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Always runs in production mode.
    Build,
    /// Always runs in development mode.
    DevServer,
    /// Runs in the environment's own mode.
    Other,
}

impl CommandKind {
    /// Build wins when a line matches both patterns.
    pub fn classify(command: &str) -> Self {
        if BUILD_RE.is_match(command) {
            Self::Build
        } else if DEV_SERVER_RE.is_match(command) {
            Self::DevServer
        } else {
            Self::Other
        }
    }

    /// The runtime mode this kind of command always runs in, if any.
    pub fn forced_mode(self) -> Option<RuntimeMode> {
        match self {
            Self::Build => Some(RuntimeMode::Production),
            Self::DevServer => Some(RuntimeMode::Development),
            Self::Other => None,
        }
    }
}

// --- Settings and results ---

/// The parts of `dx.toml` the executor needs.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Port wait and sweep settings.
    pub ports: PortSettings,
    /// Time between `SIGTERM` and `SIGKILL` for a timed-out command.
    pub kill_grace: Duration,
    /// Commands run by the auto-fix remedies.
    pub autofix: AutofixConfig,
}

impl From<&DxConfig> for ExecutorSettings {
    fn from(config: &DxConfig) -> Self {
        Self {
            ports: PortSettings::from(&config.ports),
            kill_grace: Duration::from_millis(config.process.kill_grace_ms),
            autofix: config.autofix.clone(),
        }
    }
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// The command line as run.
    pub command: String,
    /// The requested environment name, e.g. `staging`.
    pub environment: String,
    /// Spawns performed, including the successful one.
    pub attempts: u32,
    /// Layer files whose variables were injected.
    pub env_files: Vec<PathBuf>,
    /// Ports that had to be freed before the spawn.
    pub freed_ports: Vec<u16>,
}

/// Outcome of [`CommandExecutor::execute_parallel`], in submission order.
#[derive(Debug, Default)]
pub struct ParallelReport {
    /// Submission index and outcome of every command that succeeded.
    pub succeeded: Vec<(usize, ExecutionOutcome)>,
    /// Submission index, command line and error of every failure.
    pub failed: Vec<(usize, String, ExecutionError)>,
}

impl ParallelReport {
    /// Whether every command succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

// --- Executor ---

/// Runs commands for one workspace. Shared across parallel runs via `Arc`.
#[derive(Debug)]
pub struct CommandExecutor {
    workspace: Workspace,
    layers: EnvironmentLayerStore,
    policy_cache: Arc<PolicyCache>,
    registry: Arc<ProcessRegistry>,
    port_inspector: Arc<dyn PortInspector>,
    settings: ExecutorSettings,
    ambient: HashMap<String, String>,
    interactive: bool,
    validated: AtomicBool,
}

impl CommandExecutor {
    /// An executor inheriting this process's environment and terminal state.
    pub fn new(
        workspace: Workspace,
        config: &DxConfig,
        policy_cache: Arc<PolicyCache>,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        let layers = EnvironmentLayerStore::new(workspace.root.clone(), config.layers.clone());
        Self {
            workspace,
            layers,
            policy_cache,
            registry,
            port_inspector: Arc::new(SystemPortInspector),
            settings: ExecutorSettings::from(config),
            ambient: std::env::vars().collect(),
            interactive: std::io::stdin().is_terminal() && std::io::stdout().is_terminal(),
            validated: AtomicBool::new(false),
        }
    }

    /// Replaces how port owners are found and killed.
    pub fn with_port_inspector(mut self, inspector: Arc<dyn PortInspector>) -> Self {
        self.port_inspector = inspector;
        self
    }

    /// Replaces the variables children inherit and interpolation falls back to.
    pub fn with_ambient(mut self, ambient: HashMap<String, String>) -> Self {
        self.layers = self.layers.with_ambient(ambient.clone());
        self.ambient = ambient;
        self
    }

    /// Overrides whether a person is there to answer prompts.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// The workspace commands run in.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The layer store used to build child environments.
    pub fn layers(&self) -> &EnvironmentLayerStore {
        &self.layers
    }

    /// The environment an invocation with `options` runs in.
    pub fn environment_context(&self, options: &ExecutionOptions) -> EnvironmentContext {
        match options.environment.as_deref().map(str::trim) {
            Some(env) if !env.is_empty() => EnvironmentContext::new(env),
            _ => EnvironmentContext::from_ambient(&self.ambient, DEFAULT_ENVIRONMENT),
        }
    }

    /// Runs the policy validator, at most once successfully per executor.
    pub fn validate_policy(&self) -> Result<(), ExecutionError> {
        if self.validated.load(Ordering::SeqCst) {
            return Ok(());
        }
        let policy = self.policy_cache.load(&self.workspace.config_dir)?;
        PolicyValidator::new(&self.workspace.root, &policy).validate()?;
        self.validated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn in_ci(&self) -> bool {
        self.ambient.get(CI_VAR).is_some_and(|value| {
            let value = value.trim();
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        })
    }

    /// Executes `command` with every preparation step and the retry loop.
    ///
    /// # Errors
    /// The first fatal problem (policy, validation, required variables, port
    /// conflict) or the last runtime failure, unchanged.
    pub async fn execute_command(
        &self,
        command: &str,
        options: &ExecutionOptions,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ExecutionError::EmptyCommand);
        }

        let context = self.environment_context(options);
        let kind = CommandKind::classify(command);
        log::debug!(
            "Executing '{}' as {:?} in '{}' ({}).",
            command,
            kind,
            context.requested,
            context.mode
        );

        let layered = self.prepare_environment(options, &context)?;
        let freed_ports = self.resolve_ports(&options.ports, kind, options).await?;
        let (child_env, injected) = self.compose_environment(&context, kind, &layered, options);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.spawn_and_wait(command, &child_env, options.timeout).await {
                Ok(()) => {
                    return Ok(ExecutionOutcome {
                        command: command.to_string(),
                        environment: context.requested,
                        attempts,
                        env_files: injected,
                        freed_ports,
                    });
                }
                Err(error) => error,
            };

            if !error.is_fixable() || attempts > options.retries {
                return Err(error);
            }
            let output = error.diagnostic_output();
            let Some(rule) = autofix::match_rule(&output) else {
                return Err(error);
            };

            println!(
                "{} '{}' failed ({}), trying auto-fix: {}",
                "→".yellow(),
                command,
                error,
                rule.name.bold()
            );
            let outcome = self.apply_fix(rule, &output, options, &layered).await;
            if !(outcome.applied && outcome.retry) {
                return Err(error);
            }
            println!(
                "{} Retrying '{}' (attempt {} of {})",
                "→".cyan(),
                command,
                attempts + 1,
                options.retries + 1
            );
        }
    }

    /// Validation, layering and the required-variable check.
    fn prepare_environment(
        &self,
        options: &ExecutionOptions,
        context: &EnvironmentContext,
    ) -> Result<LayeredEnvironment, ExecutionError> {
        if options.skip_env_validation {
            log::debug!("Environment validation skipped by request.");
        } else {
            self.validate_policy()?;
        }

        let layered = self
            .layers
            .collect_env_from_layers(options.app.as_deref(), &context.requested)?;
        for warning in &layered.warnings {
            println!("{} {}", "Warning:".yellow(), warning);
        }

        if !options.skip_env_validation
            && !self.in_ci()
            && let Some(app) = options.app.as_deref()
        {
            self.check_required_vars(app, &context.requested, &layered, options)?;
        }
        Ok(layered)
    }

    fn check_required_vars(
        &self,
        app: &str,
        environment: &str,
        layered: &LayeredEnvironment,
        options: &ExecutionOptions,
    ) -> Result<(), ExecutionError> {
        let policy = self.policy_cache.load(&self.workspace.config_dir)?;
        let mut missing = Vec::new();
        let mut placeholders = Vec::new();

        for key in policy.required_keys_for_app(app, environment) {
            let value = options
                .extra_env
                .get(&key)
                .map(String::as_str)
                .or_else(|| layered.vars.get(&key))
                .or_else(|| self.ambient.get(&key).map(String::as_str));
            match value {
                None | Some("") => missing.push(key),
                Some(value) if policy.is_placeholder(value) => placeholders.push(key),
                Some(_) => {}
            }
        }

        if missing.is_empty() && placeholders.is_empty() {
            return Ok(());
        }
        Err(ExecutionError::RequiredVars {
            app: app.to_string(),
            environment: environment.to_string(),
            missing,
            placeholders,
        })
    }

    async fn resolve_ports(
        &self,
        ports: &[u16],
        kind: CommandKind,
        options: &ExecutionOptions,
    ) -> Result<Vec<u16>, ExecutionError> {
        if ports.is_empty() {
            return Ok(Vec::new());
        }
        let confirmation = Confirmation::auto_if(
            !self.interactive || kind == CommandKind::DevServer || options.force_port_cleanup,
        );
        let freed = ports::free_ports(
            Arc::clone(&self.port_inspector),
            ports,
            &self.settings.ports,
            confirmation,
        )
        .await?;
        Ok(freed)
    }

    /// The variables set on top of the inherited ambient environment, plus the
    /// layer files they came from.
    fn compose_environment(
        &self,
        context: &EnvironmentContext,
        kind: CommandKind,
        layered: &LayeredEnvironment,
        options: &ExecutionOptions,
    ) -> (BTreeMap<String, String>, Vec<PathBuf>) {
        let mut env = BTreeMap::new();
        let mut injected = Vec::new();

        if options.app.is_some() && !layered.files.is_empty() {
            for (key, value) in layered.vars.iter() {
                if kind == CommandKind::Build && self.ambient.contains_key(key) {
                    log::debug!("Build keeps pinned '{}' over the layered value.", key);
                    continue;
                }
                env.insert(key.to_string(), value.to_string());
            }
            injected = layered.files.clone();
            log::debug!(
                "Injecting {} variable(s) from: {}",
                env.len(),
                injected
                    .iter()
                    .map(|f| relative_display(&self.workspace.root, f))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (key, value) in context.as_env_pairs() {
            env.insert(key.to_string(), value);
        }

        if !self.interactive || self.in_ci() || context.mode == RuntimeMode::Production {
            for var in POLLING_VARS {
                env.insert((*var).to_string(), "true".to_string());
            }
        }

        env.extend(options.extra_env.clone());

        let mode = kind.forced_mode().unwrap_or(context.mode);
        env.insert(RUNTIME_MODE_VAR.to_string(), mode.as_str().to_string());

        (env, injected)
    }

    /// Spawns one attempt and waits for it, honouring `timeout`.
    async fn spawn_and_wait(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError> {
        let mut shell = shell_command(command);
        shell
            .current_dir(dunce::simplified(&self.workspace.root))
            .env_clear()
            .envs(&self.ambient)
            .envs(env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // A child in its own group loses the terminal, so interactive runs
        // stay in ours and rely on the terminal delivering Ctrl+C to all.
        if !self.interactive {
            lead_own_process_group(&mut shell);
        }

        let id = self.registry.register(command);
        let registry = Arc::clone(&self.registry);
        let _registration = scopeguard::guard(id, move |id| {
            registry.unregister(id);
        });

        let mut child = shell.spawn().map_err(|source| ExecutionError::Spawn {
            command: command.to_string(),
            source,
        })?;
        if let Some(pid) = child.id() {
            self.registry.attach_pid(id, pid);
        }
        let tail = StderrTail::default();
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(tee_stderr(stderr, tail.clone())));

        let deadline = timeout.map(|limit| Instant::now() + limit);
        let waited = match timeout.zip(deadline) {
            None => child.wait().await,
            Some((limit, deadline)) => match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    self.stop_timed_out(&mut child).await;
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                    return Err(ExecutionError::ProcessTimeout {
                        command: command.to_string(),
                        timeout: limit,
                    });
                }
            },
        };
        let status = waited.map_err(|source| ExecutionError::Spawn {
            command: command.to_string(),
            source,
        })?;

        if let Some(mut task) = stderr_task {
            let grace_end = match deadline {
                Some(deadline) => deadline.min(Instant::now() + STDERR_DRAIN_GRACE),
                None => Instant::now() + STDERR_DRAIN_GRACE,
            };
            if tokio::time::timeout_at(grace_end, &mut task).await.is_err() {
                log::debug!("A background process still holds stderr, no longer reading it.");
                task.abort();
            }
        }
        let stderr_tail = tail.text();

        if status.success() {
            Ok(())
        } else {
            Err(ExecutionError::ProcessExit {
                command: command.to_string(),
                code: status.code(),
                stderr_tail,
            })
        }
    }

    /// `SIGTERM`, then `SIGKILL` once the grace period runs out.
    async fn stop_timed_out(&self, child: &mut Child) {
        let pid = child.id();
        if let Some(pid) = pid {
            log::debug!("Timeout reached, asking pid {} to terminate.", pid);
            terminate_pid(pid, Termination::Polite);
        }
        if tokio::time::timeout(self.settings.kill_grace, child.wait())
            .await
            .is_ok()
        {
            return;
        }
        log::debug!("Grace period over, killing the process.");
        if let Some(pid) = pid {
            terminate_pid(pid, Termination::Forced);
        }
        if let Err(e) = child.kill().await {
            log::debug!("Timed-out process already gone: {}", e);
        }
    }

    async fn apply_fix(
        &self,
        rule: &FixRule,
        output: &str,
        options: &ExecutionOptions,
        layered: &LayeredEnvironment,
    ) -> FixOutcome {
        match rule.remedy {
            Remedy::FreePorts => {
                let ports: Vec<u16> = if options.ports.is_empty() {
                    autofix::port_from_output(output).into_iter().collect()
                } else {
                    options.ports.clone()
                };
                if ports.is_empty() {
                    log::debug!("No port could be identified in the failure output.");
                    return FixOutcome::NOT_APPLIED;
                }
                match ports::free_ports(
                    Arc::clone(&self.port_inspector),
                    &ports,
                    &self.settings.ports,
                    Confirmation::AssumeYes,
                )
                .await
                {
                    Ok(_) => FixOutcome::RETRY,
                    Err(e) => {
                        log::warn!("Port cleanup failed: {}", e);
                        FixOutcome::NOT_APPLIED
                    }
                }
            }
            Remedy::MissingEnvGuidance => {
                self.print_env_guidance(layered);
                FixOutcome::GUIDANCE_ONLY
            }
            Remedy::GenerateOrmClient => {
                let env = NO_CACHE_VARS
                    .iter()
                    .map(|var| ((*var).to_string(), "true".to_string()))
                    .collect();
                let command = self.settings.autofix.orm_generate.clone();
                self.run_fix_command("Generate the ORM client", &command, &env, options)
                    .await
            }
            Remedy::InstallDependencies => {
                let command = self.settings.autofix.install.clone();
                self.run_fix_command("Install dependencies", &command, &BTreeMap::new(), options)
                    .await
            }
        }
    }

    fn print_env_guidance(&self, layered: &LayeredEnvironment) {
        println!(
            "{} A required environment variable is missing or invalid.",
            "Hint:".yellow().bold()
        );
        if layered.files.is_empty() {
            println!("  No environment files were loaded for this app and environment.");
        } else {
            println!("  Loaded, in order:");
            for file in &layered.files {
                println!("    {}", relative_display(&self.workspace.root, file));
            }
        }
        println!("  Add the missing keys to the matching '.local' file, then run the command again.");
    }

    async fn run_fix_command(
        &self,
        label: &str,
        command: &str,
        env: &BTreeMap<String, String>,
        options: &ExecutionOptions,
    ) -> FixOutcome {
        let confirmation = Confirmation::auto_if(options.assume_yes || !self.interactive);
        match confirmation.ask(format!("{label} with `{command}`?")).await {
            Ok(true) => {}
            Ok(false) => return FixOutcome::NOT_APPLIED,
            Err(e) => {
                log::warn!("Could not ask for confirmation: {}", e);
                return FixOutcome::NOT_APPLIED;
            }
        }

        println!("{} {}", "→".cyan(), command);
        match self.spawn_and_wait(command, env, None).await {
            Ok(()) => FixOutcome::RETRY,
            Err(e) => {
                log::warn!("Auto-fix '{}' failed: {}", label, e);
                FixOutcome::NOT_APPLIED
            }
        }
    }

    /// Runs several commands at once with the same options. Failures do not
    /// stop the others; every result lands in the report.
    pub async fn execute_parallel(
        executor: &Arc<Self>,
        commands: Vec<String>,
        options: &ExecutionOptions,
    ) -> ParallelReport {
        let mut set = JoinSet::new();
        for (index, command) in commands.into_iter().enumerate() {
            let executor = Arc::clone(executor);
            let options = options.clone();
            set.spawn(async move {
                let result = executor.execute_command(&command, &options).await;
                (index, command, result)
            });
        }

        let mut report = ParallelReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, _, Ok(outcome))) => report.succeeded.push((index, outcome)),
                Ok((index, command, Err(error))) => report.failed.push((index, command, error)),
                Err(e) => log::warn!("A parallel command task panicked or was cancelled: {}", e),
            }
        }
        report.succeeded.sort_by_key(|(index, _)| *index);
        report.failed.sort_by_key(|(index, _, _)| *index);
        report
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut shell = Command::new("cmd");
        shell.arg("/C").arg(command);
        shell
    } else {
        let mut shell = Command::new("sh");
        shell.arg("-c").arg(command);
        shell
    }
}

#[cfg(unix)]
fn lead_own_process_group(shell: &mut Command) {
    shell.process_group(0);
}

#[cfg(not(unix))]
fn lead_own_process_group(_shell: &mut Command) {}

/// The last stderr lines of a child, shared with the task reading them so
/// they survive that task being aborted.
#[derive(Debug, Clone, Default)]
struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn text(&self) -> String {
        let lines = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Forwards a child's stderr to ours, keeping its last lines in `tail`.
async fn tee_stderr(stderr: impl AsyncRead + Unpin, tail: StderrTail) {
    let mut reader = BufReader::new(stderr);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\r', '\n']);
                eprintln!("{line}");
                tail.push(line.to_string());
            }
            Err(e) => {
                log::debug!("Stopped reading child stderr: {}", e);
                break;
            }
        }
    }
}
