use crate::compose::DATABASE_SERVICE;
use crate::error::TestpressError;
use crate::process::{args, run_checked, ProcessRunner, DOCKER, DOCKER_COMPOSE};
use crate::session::{Session, PERSISTENT_DESCRIPTOR};
use tracing::debug;

pub const HEALTHY: &str = "healthy";

pub fn compose_base_args(session: &Session, files: &[&str]) -> Vec<String> {
    let mut base = vec!["-p".to_string(), session.project_name().to_string()];
    for file in files {
        base.push("-f".to_string());
        base.push((*file).to_string());
    }
    base
}

pub fn compose<R: ProcessRunner + ?Sized>(
    runner: &R,
    session: &Session,
    files: &[&str],
    subcommand: &[&str],
) -> Result<String, TestpressError> {
    let mut full = compose_base_args(session, files);
    full.extend(args(subcommand));
    let output = run_checked(
        runner,
        DOCKER_COMPOSE,
        &full,
        Some(session.tools_dir()),
        &session.docker_env(),
    )?;
    Ok(output.stdout_text())
}

pub fn compose_up<R: ProcessRunner + ?Sized>(
    runner: &R,
    session: &Session,
) -> Result<(), TestpressError> {
    compose(runner, session, &[PERSISTENT_DESCRIPTOR], &["up", "-d"]).map(|_| ())
}

pub fn compose_down<R: ProcessRunner + ?Sized>(
    runner: &R,
    session: &Session,
) -> Result<(), TestpressError> {
    compose(runner, session, &[PERSISTENT_DESCRIPTOR], &["down"]).map(|_| ())
}

pub fn engine_available<R: ProcessRunner + ?Sized>(runner: &R, session: &Session) -> bool {
    match run_checked(
        runner,
        DOCKER,
        &args(&["info"]),
        Some(session.tools_dir()),
        &session.docker_env(),
    ) {
        Ok(_) => true,
        Err(err) => {
            debug!("{err}");
            false
        }
    }
}

pub fn parse_health(output: &str) -> Option<String> {
    serde_json::from_str::<String>(output.trim()).ok()
}

/// Asks compose for the database container, whatever naming scheme the
/// installed compose version uses.
pub fn database_container_id<R: ProcessRunner + ?Sized>(
    runner: &R,
    session: &Session,
) -> Option<String> {
    match compose(
        runner,
        session,
        &[PERSISTENT_DESCRIPTOR],
        &["ps", "-q", DATABASE_SERVICE],
    ) {
        Ok(stdout) => stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string),
        Err(err) => {
            debug!("{err}");
            None
        }
    }
}

pub fn database_health<R: ProcessRunner + ?Sized>(runner: &R, session: &Session) -> Option<String> {
    let Some(container) = database_container_id(runner, session) else {
        debug!("no {DATABASE_SERVICE} container yet");
        return None;
    };
    let inspect = vec![
        "inspect".to_string(),
        "--format".to_string(),
        "{{json .State.Health.Status}}".to_string(),
        container,
    ];
    match run_checked(
        runner,
        DOCKER,
        &inspect,
        Some(session.tools_dir()),
        &session.docker_env(),
    ) {
        Ok(output) => parse_health(&output.stdout_text()),
        Err(err) => {
            debug!("{err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{failed, ok, MockRunner};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn session() -> Session {
        Session::new(PathBuf::from("/tmp/tools"), "testpress")
    }

    #[test]
    fn parse_health_decodes_json_string() {
        assert_eq!(parse_health("\"healthy\"\n"), Some("healthy".to_string()));
        assert_eq!(parse_health("\"starting\""), Some("starting".to_string()));
        assert_eq!(parse_health("null"), None);
        assert_eq!(parse_health(""), None);
    }

    #[test]
    fn compose_up_targets_persistent_descriptor_with_session_env() {
        let runner = MockRunner::default();
        let session = session();
        session.replace_docker_env(BTreeMap::from([(
            "DOCKER_HOST".to_string(),
            "tcp://192.168.99.100:2376".to_string(),
        )]));
        compose_up(&runner, &session).unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0].program, "docker-compose");
        assert_eq!(
            calls[0].args,
            args(&["-p", "testpress", "-f", "docker-compose.yml", "up", "-d"])
        );
        assert_eq!(
            calls[0].env_overrides["DOCKER_HOST"],
            "tcp://192.168.99.100:2376"
        );
    }

    #[test]
    fn database_health_inspects_container_compose_reports() {
        let runner = MockRunner::default();
        runner.push_for("ps -q mysql", ok("4f1c2a9be0d3\n"));
        runner.push_for("inspect", ok("\"starting\"\n"));
        assert_eq!(
            database_health(&runner, &session()),
            Some("starting".to_string())
        );

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, "docker-compose");
        assert_eq!(
            calls[0].args,
            args(&["-p", "testpress", "-f", "docker-compose.yml", "ps", "-q", "mysql"])
        );
        assert_eq!(calls[1].program, "docker");
        assert_eq!(
            calls[1].args,
            args(&["inspect", "--format", "{{json .State.Health.Status}}", "4f1c2a9be0d3"])
        );
    }

    #[test]
    fn database_health_without_container_skips_inspect() {
        let runner = MockRunner::default();
        assert_eq!(database_health(&runner, &session()), None);
        runner.push_for("ps -q mysql", failed("no configuration file provided"));
        assert_eq!(database_health(&runner, &session()), None);
        assert!(runner.calls_with(&["inspect"]).is_empty());

        runner.push_for("ps -q mysql", ok("4f1c2a9be0d3\n"));
        runner.push_for("inspect", failed("Error: No such object: 4f1c2a9be0d3"));
        assert_eq!(database_health(&runner, &session()), None);
    }

    #[test]
    fn engine_availability_follows_docker_info() {
        let runner = MockRunner::default();
        assert!(engine_available(&runner, &session()));
        runner.push_for("info", failed("Cannot connect to the Docker daemon"));
        assert!(!engine_available(&runner, &session()));
    }
}
