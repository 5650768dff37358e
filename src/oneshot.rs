use crate::compose::CLI_SERVICE;
use crate::docker::compose_base_args;
use crate::process::{render_command, ProcessRunner, DOCKER_COMPOSE};
use crate::session::{Session, PERSISTENT_DESCRIPTOR, SCRIPTS_DESCRIPTOR};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotOutcome {
    pub success: bool,
    pub stdout: String,
}

impl OneShotOutcome {
    fn failed() -> Self {
        Self {
            success: false,
            stdout: String::new(),
        }
    }
}

pub fn one_shot_args<S: AsRef<str>>(session: &Session, service: &str, command: &[S]) -> Vec<String> {
    let mut full = compose_base_args(session, &[PERSISTENT_DESCRIPTOR, SCRIPTS_DESCRIPTOR]);
    full.push("run".to_string());
    full.push("--rm".to_string());
    full.push(service.to_string());
    full.extend(command.iter().map(|part| part.as_ref().to_string()));
    full
}

/// Runs `command` in an auto-removed `service` container. Failures are
/// logged and reported through `success`, never returned as errors.
pub fn run_service<R, S>(runner: &R, session: &Session, service: &str, command: &[S]) -> OneShotOutcome
where
    R: ProcessRunner + ?Sized,
    S: AsRef<str>,
{
    let full = one_shot_args(session, service, command);
    let rendered = render_command(DOCKER_COMPOSE, &full);
    debug!("running `{rendered}`");
    match runner.run(
        DOCKER_COMPOSE,
        &full,
        Some(session.tools_dir()),
        &session.docker_env(),
    ) {
        Ok(output) if output.success() => OneShotOutcome {
            success: true,
            stdout: output.stdout_text(),
        },
        Ok(output) => {
            debug!("`{rendered}` exited with {}: {}", output.status_code, output.stderr_text());
            OneShotOutcome::failed()
        }
        Err(err) => {
            warn!("failed to run `{rendered}`: {err}");
            OneShotOutcome::failed()
        }
    }
}

pub fn run_cli_command<R, S>(runner: &R, session: &Session, command: &[S]) -> OneShotOutcome
where
    R: ProcessRunner + ?Sized,
    S: AsRef<str>,
{
    run_service(runner, session, CLI_SERVICE, command)
}
