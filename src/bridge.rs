use crate::process::{args, render_command, run_checked, ProcessRunner, DOCKER_MACHINE};
use crate::session::Session;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MACHINE_NAME: &str = "default";
pub const FORWARD_RULE: &str = "wphttp";
const VBOX_INSTALL_ENV: &str = "VBOX_MSI_INSTALL_PATH";

// `SET NAME=VALUE` lines from `docker-machine env --shell cmd`; REM hints are skipped.
pub fn parse_machine_env(text: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for line in text.lines() {
        let Some(assignment) = line.trim().strip_prefix("SET ") else {
            continue;
        };
        let Some((name, value)) = assignment.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        env.insert(name.to_string(), value.trim().to_string());
    }
    env
}

pub fn forward_rule(port: u16) -> String {
    format!("{FORWARD_RULE},tcp,127.0.0.1,{port},,{port}")
}

#[derive(Debug, Clone)]
pub struct VirtualizationBridge {
    vbox_manage: PathBuf,
}

impl VirtualizationBridge {
    pub fn new(vbox_manage: PathBuf) -> Self {
        Self { vbox_manage }
    }

    pub fn from_env() -> Self {
        let vbox_manage = env::var(VBOX_INSTALL_ENV)
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map_or_else(
                || PathBuf::from("VBoxManage"),
                |dir| Path::new(&dir).join("VBoxManage"),
            );
        Self::new(vbox_manage)
    }

    /// Brings the VM up for `port` and replaces the session's docker
    /// environment with the VM's connection variables, saved for later
    /// commands.
    pub fn bring_up<R: ProcessRunner + ?Sized>(&self, runner: &R, session: &Session, port: u16) {
        let cwd = Some(session.tools_dir());
        let no_env = BTreeMap::new();

        debug!("starting docker machine");
        if let Err(err) = run_checked(
            runner,
            DOCKER_MACHINE,
            &args(&["start", MACHINE_NAME]),
            cwd,
            &no_env,
        ) {
            debug!("{err}");
        }

        debug!("configuring machine port forwarding");
        let vbox = self.vbox_manage.to_string_lossy().to_string();
        let delete = args(&["controlvm", MACHINE_NAME, "natpf1", "delete", FORWARD_RULE]);
        if let Err(err) = run_checked(runner, &vbox, &delete, cwd, &no_env) {
            debug!("{err}");
        }
        let create = vec![
            "controlvm".to_string(),
            MACHINE_NAME.to_string(),
            "natpf1".to_string(),
            forward_rule(port),
        ];
        if let Err(err) = run_checked(runner, &vbox, &create, cwd, &no_env) {
            warn!("{err}");
        }

        debug!("collecting docker environment info");
        let query = args(&["env", MACHINE_NAME, "--shell", "cmd"]);
        let env = match run_checked(runner, DOCKER_MACHINE, &query, cwd, &no_env) {
            Ok(output) => parse_machine_env(&output.stdout_text()),
            Err(err) => {
                warn!("{err}");
                BTreeMap::new()
            }
        };
        if env.is_empty() {
            warn!(
                "`{}` produced no environment; docker will use its defaults",
                render_command(DOCKER_MACHINE, &query)
            );
        }
        debug!(?env, "docker environment");
        session.replace_docker_env(env);
        if let Err(err) = session.save_docker_env() {
            warn!(
                "failed to save {}: {err}",
                session.docker_env_path().display()
            );
        }
    }
}
