mod bridge;
mod compose;
mod config;
mod docker;
mod error;
mod install;
mod oneshot;
mod probe;
mod process;
mod reactor;
mod retry;
mod session;
mod shutdown;
mod status;
mod supervisor;

use crate::bridge::VirtualizationBridge;
use crate::compose::{build_descriptors, PHPUNIT_SECONDARY_SERVICE, PHPUNIT_SERVICE};
use crate::config::{
    read_preferences, resolve_config_path, resolve_tools_dir, write_preferences, Preferences,
    Snapshot,
};
use crate::docker::compose_down;
use crate::error::TestpressError;
use crate::oneshot::{run_cli_command, run_service};
use crate::probe::fallback_required;
use crate::process::{ProcessRunner, SystemRunner, DOCKER, DOCKER_COMPOSE, DOCKER_MACHINE};
use crate::reactor::{start_watch, watch_preferences, PreferenceWatcher};
use crate::retry::SystemClock;
use crate::session::Session;
use crate::shutdown::{install_handler, stop_stack};
use crate::status::{read_status, FileStatusSink};
use crate::supervisor::Supervisor;
use clap::{Parser, Subcommand};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Input;
use serde::Serialize;
use serde_json::json;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "testpress", version, about = "WordPress development environment")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the stack and keep it in sync with the preference file.
    Up,
    /// Stop the stack.
    Down,
    /// Show the last published status.
    Status,
    /// Run a WP-CLI command against the site.
    Wp {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run the PHPUnit suite.
    Test {
        /// Run the Gutenberg suite instead of WordPress core's.
        #[arg(long, default_value_t = false)]
        gutenberg: bool,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the compose files the current preferences produce.
    Render,
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    Doctor,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Init {
        #[arg(long, default_value_t = false)]
        interactive: bool,
    },
    Show,
    Path,
    Set {
        section: String,
        key: String,
        value: String,
    },
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct Context {
    config_path: PathBuf,
    tools_dir: PathBuf,
    json: bool,
}

impl Context {
    fn session(&self, prefs: &Preferences) -> Session {
        let session = Session::new(self.tools_dir.clone(), prefs.compose.project_name.clone());
        if let Err(err) = session.load_docker_env() {
            warn!(
                "ignoring {}: {err}",
                session.docker_env_path().display()
            );
        }
        session
    }
}

fn main() -> Result<(), TestpressError> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TESTPRESS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        config_path: resolve_config_path(cli.config.as_ref()),
        tools_dir: resolve_tools_dir(),
        json: cli.json,
    };
    let runner = SystemRunner;

    let result = match cli.command {
        Commands::Up => handle_up(&ctx),
        Commands::Down => handle_down(&ctx, &runner),
        Commands::Status => handle_status(&ctx),
        Commands::Wp { args } => handle_wp(&ctx, &runner, args),
        Commands::Test { gutenberg, args } => handle_test(&ctx, &runner, gutenberg, args),
        Commands::Render => handle_render(&ctx),
        Commands::Config { command } => handle_config(&ctx, command),
        Commands::Doctor => handle_doctor(&ctx, &runner),
    };

    if let Err(err) = result {
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn handle_up(ctx: &Context) -> Result<(), TestpressError> {
    let prefs = read_preferences(&ctx.config_path)?;
    fs::create_dir_all(&ctx.tools_dir)?;
    let session = Arc::new(ctx.session(&prefs));
    let (control_tx, control_rx) = mpsc::channel();
    install_handler(Arc::clone(&session), control_tx.clone())?;

    let runner = SystemRunner;
    let clock = SystemClock;
    let bridge = fallback_required(&runner, env::consts::OS).then(VirtualizationBridge::from_env);
    if bridge.is_some() {
        info!("using Docker Toolbox");
    } else {
        session.forget_docker_env()?;
    }

    let (_watch, events) = start_watch(&ctx.config_path)?;
    let watcher = PreferenceWatcher::new(ctx.config_path.clone());
    {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            watch_preferences(watcher, &events, &SystemRunner, &session, &control_tx);
        });
    }

    let status = FileStatusSink::new(session.status_path());
    let supervisor = Supervisor::new(&runner, &clock, &status, &session, &ctx.config_path)
        .with_bridge(bridge.as_ref());
    info!("preferences: {}", ctx.config_path.display());

    let runs = supervisor.supervise(&control_rx);
    debug!(runs, "supervisor stopped");
    stop_stack(&runner, &session);
    Ok(())
}

fn handle_down<R: ProcessRunner + ?Sized>(ctx: &Context, runner: &R) -> Result<(), TestpressError> {
    let prefs = read_preferences(&ctx.config_path)?;
    let session = ctx.session(&prefs);
    if !session.persistent_descriptor().exists() {
        return output(ctx, json!({"stopped": false, "reason": "stack was never started"}));
    }
    compose_down(runner, &session)?;
    output(ctx, json!({"stopped": true, "project": session.project_name()}))
}

fn handle_status(ctx: &Context) -> Result<(), TestpressError> {
    let prefs = read_preferences(&ctx.config_path)?;
    let board = read_status(&ctx.session(&prefs).status_path())?;
    output(ctx, serde_json::to_value(board)?)
}

fn handle_wp<R: ProcessRunner + ?Sized>(
    ctx: &Context,
    runner: &R,
    args: Vec<String>,
) -> Result<(), TestpressError> {
    let prefs = read_preferences(&ctx.config_path)?;
    let outcome = run_cli_command(runner, &ctx.session(&prefs), &args);
    finish_one_shot(ctx, "wp", outcome.success, outcome.stdout)
}

fn handle_test<R: ProcessRunner + ?Sized>(
    ctx: &Context,
    runner: &R,
    gutenberg: bool,
    args: Vec<String>,
) -> Result<(), TestpressError> {
    let prefs = read_preferences(&ctx.config_path)?;
    let service = if gutenberg {
        if Snapshot::from_preferences(&prefs).secondary_folder.is_none() {
            return Err(TestpressError::Config(
                "basic.gutenberg-folder is not set; the Gutenberg test service is unavailable"
                    .to_string(),
            ));
        }
        PHPUNIT_SECONDARY_SERVICE
    } else {
        PHPUNIT_SERVICE
    };
    let outcome = run_service(runner, &ctx.session(&prefs), service, &args);
    finish_one_shot(ctx, service, outcome.success, outcome.stdout)
}

fn finish_one_shot(
    ctx: &Context,
    label: &str,
    success: bool,
    stdout: String,
) -> Result<(), TestpressError> {
    if ctx.json {
        output(ctx, json!({"success": success, "stdout": stdout}))?;
    } else {
        print!("{stdout}");
    }
    if success {
        Ok(())
    } else {
        Err(TestpressError::Process(format!("`{label}` command failed")))
    }
}

fn handle_render(ctx: &Context) -> Result<(), TestpressError> {
    let prefs = read_preferences(&ctx.config_path)?;
    let snapshot = Snapshot::from_preferences(&prefs);
    let Some((primary, port)) = snapshot.startable() else {
        return Err(TestpressError::Config(format!(
            "basic.wordpress-folder is not set; run `testpress config set basic wordpress-folder <path>` (preferences: {})",
            ctx.config_path.display()
        )));
    };
    let descriptors = build_descriptors(primary, snapshot.secondary_folder.as_deref(), port);
    let persistent = descriptors.persistent.to_yaml()?;
    let scripts = descriptors.scripts.to_yaml()?;
    if ctx.json {
        return output(ctx, json!({"persistent": persistent, "scripts": scripts}));
    }
    println!("# {}", session::PERSISTENT_DESCRIPTOR);
    print!("{persistent}");
    println!("# {}", session::SCRIPTS_DESCRIPTOR);
    print!("{scripts}");
    Ok(())
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), TestpressError> {
    match command {
        ConfigCommand::Init { interactive } => {
            if ctx.config_path.exists() {
                return output(ctx, json!({"path": ctx.config_path, "created": false}));
            }
            let prefs = if interactive {
                prompt_preferences()?
            } else {
                Preferences::default()
            };
            write_preferences(&ctx.config_path, &prefs)?;
            output(ctx, json!({"path": ctx.config_path, "created": true}))
        }
        ConfigCommand::Show => {
            let prefs = read_preferences(&ctx.config_path)?;
            output(ctx, serde_json::to_value(prefs)?)
        }
        ConfigCommand::Path => output(
            ctx,
            json!({"path": ctx.config_path, "exists": ctx.config_path.exists(), "tools_dir": ctx.tools_dir}),
        ),
        ConfigCommand::Set {
            section,
            key,
            value,
        } => {
            let mut prefs = read_preferences(&ctx.config_path)?;
            prefs.set(&section, &key, &value)?;
            write_preferences(&ctx.config_path, &prefs)?;
            let stored = prefs.get(&section, &key)?;
            output(
                ctx,
                json!({"section": section, "key": key, "value": stored}),
            )
        }
    }
}

fn prompt_preferences() -> Result<Preferences, TestpressError> {
    let theme = ColorfulTheme::default();
    let mut prefs = Preferences::default();
    let wordpress_folder = Input::<String>::with_theme(&theme)
        .with_prompt("WordPress develop checkout")
        .allow_empty(true)
        .interact_text()?;
    prefs.set(config::SECTION_BASIC, config::KEY_WORDPRESS_FOLDER, &wordpress_folder)?;
    let gutenberg_folder = Input::<String>::with_theme(&theme)
        .with_prompt("Gutenberg checkout (optional)")
        .allow_empty(true)
        .interact_text()?;
    prefs.set(config::SECTION_BASIC, config::KEY_GUTENBERG_FOLDER, &gutenberg_folder)?;
    let port = Input::<String>::with_theme(&theme)
        .with_prompt("Site port")
        .default(prefs.site.port.to_string())
        .interact_text()?;
    prefs.set(config::SECTION_SITE, config::KEY_PORT, &port)?;
    Ok(prefs)
}

#[derive(Debug, Clone, Serialize)]
struct DoctorCheck {
    id: &'static str,
    ok: bool,
    message: String,
}

fn doctor_check(id: &'static str, ok: bool, message: impl Into<String>) -> DoctorCheck {
    DoctorCheck {
        id,
        ok,
        message: message.into(),
    }
}

fn collect_doctor_checks<R: ProcessRunner + ?Sized>(ctx: &Context, runner: &R) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    let fallback = fallback_required(runner, env::consts::OS);
    checks.push(doctor_check(
        "engine_mode",
        true,
        if fallback {
            "Docker Toolbox (docker-machine + VirtualBox)"
        } else {
            "native Docker"
        },
    ));

    let mut tools = vec![DOCKER, DOCKER_COMPOSE];
    if fallback {
        tools.push(DOCKER_MACHINE);
    }
    for tool in tools {
        let found = which::which(tool);
        checks.push(doctor_check(
            tool,
            found.is_ok(),
            match found {
                Ok(path) => format!("found at {}", path.display()),
                Err(_) => format!("{tool} is not installed or not in PATH"),
            },
        ));
    }

    match read_preferences(&ctx.config_path) {
        Ok(prefs) => {
            let snapshot = Snapshot::from_preferences(&prefs);
            let folder_ok = snapshot
                .primary_folder
                .as_ref()
                .is_some_and(|folder| folder.is_dir());
            checks.push(doctor_check(
                "wordpress_folder",
                folder_ok,
                if folder_ok {
                    snapshot.primary_display()
                } else {
                    "basic.wordpress-folder is unset or not a directory".to_string()
                },
            ));
            checks.push(doctor_check("port", true, snapshot.port.to_string()));
        }
        Err(err) => checks.push(doctor_check("preferences", false, err.to_string())),
    }

    checks
}

fn handle_doctor<R: ProcessRunner + ?Sized>(ctx: &Context, runner: &R) -> Result<(), TestpressError> {
    let checks = collect_doctor_checks(ctx, runner);
    let ok = checks.iter().all(|check| check.ok);
    let first_failure = checks
        .iter()
        .find(|check| !check.ok)
        .map(|check| check.message.clone());

    if ctx.json {
        let payload = JsonResult {
            ok,
            result: Some(json!({ "checks": checks })),
            error: first_failure,
        };
        print_json(&payload)?;
        return Ok(());
    }

    for check in &checks {
        let state = if check.ok { "ok" } else { "fail" };
        println!("[{state}] {} - {}", check.id, check.message);
    }
    match first_failure {
        None => Ok(()),
        Some(message) => Err(TestpressError::Process(message)),
    }
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), TestpressError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), TestpressError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::MockRunner;
    use tempfile::tempdir;

    fn context(dir: &std::path::Path) -> Context {
        Context {
            config_path: dir.join("preferences.yaml"),
            tools_dir: dir.join("tools"),
            json: true,
        }
    }

    #[test]
    fn cli_parses_trailing_wp_arguments() {
        let cli = Cli::parse_from(["testpress", "wp", "plugin", "list", "--status=active"]);
        match cli.command {
            Commands::Wp { args } => assert_eq!(args, vec!["plugin", "list", "--status=active"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_gutenberg_test_flag() {
        let cli = Cli::parse_from([
            "testpress",
            "--json",
            "test",
            "--gutenberg",
            "--",
            "--filter",
            "Blocks",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Test { gutenberg, args } => {
                assert!(gutenberg);
                assert_eq!(args, vec!["--filter", "Blocks"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn session_uses_configured_project_name() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let mut prefs = Preferences::default();
        prefs.compose.project_name = "wpdev".to_string();
        let session = ctx.session(&prefs);
        assert_eq!(session.project_name(), "wpdev");
        assert_eq!(session.tools_dir(), dir.path().join("tools"));
    }

    #[test]
    fn gutenberg_tests_require_secondary_folder() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::default();
        let err = handle_test(&ctx, &runner, true, Vec::new()).expect_err("no gutenberg folder");
        assert!(err.to_string().contains("gutenberg-folder"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn down_skips_compose_when_never_started() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::default();
        handle_down(&ctx, &runner).unwrap();
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn later_commands_reuse_toolbox_environment() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let tools = dir.path().join("tools");
        fs::create_dir_all(&tools).unwrap();
        fs::write(tools.join("docker-compose.yml"), "services: {}\n").unwrap();
        fs::write(
            tools.join("docker-env.json"),
            r#"{"DOCKER_HOST":"tcp://192.168.99.100:2376","DOCKER_TLS_VERIFY":"1"}"#,
        )
        .unwrap();
        let runner = MockRunner::default();

        handle_down(&ctx, &runner).unwrap();
        handle_wp(&ctx, &runner, vec!["plugin".to_string(), "list".to_string()]).unwrap();

        let down = &runner.calls_with(&["down"])[0];
        assert_eq!(down.env_overrides["DOCKER_HOST"], "tcp://192.168.99.100:2376");
        let wp = &runner.calls_with(&["plugin", "list"])[0];
        assert_eq!(wp.env_overrides["DOCKER_TLS_VERIFY"], "1");
    }

    #[test]
    fn doctor_flags_missing_wordpress_folder() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let runner = MockRunner::default();
        let checks = collect_doctor_checks(&ctx, &runner);
        let folder = checks
            .iter()
            .find(|check| check.id == "wordpress_folder")
            .expect("folder check");
        assert!(!folder.ok);
    }
}
