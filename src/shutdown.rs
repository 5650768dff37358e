use crate::docker::compose_base_args;
use crate::error::TestpressError;
use crate::process::{render_command, ProcessRunner, SystemRunner, DOCKER_COMPOSE};
use crate::session::{Session, PERSISTENT_DESCRIPTOR};
use crate::supervisor::Control;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{info, warn};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Issues `docker-compose down` without waiting for it, so containers are
/// stopped even though this process is about to exit.
pub fn stop_stack<R: ProcessRunner + ?Sized>(runner: &R, session: &Session) {
    let mut down = compose_base_args(session, &[PERSISTENT_DESCRIPTOR]);
    down.push("down".to_string());
    if let Err(err) = runner.spawn_detached(
        DOCKER_COMPOSE,
        &down,
        Some(session.tools_dir()),
        &session.docker_env(),
    ) {
        warn!(
            "failed to run `{}`: {err}",
            render_command(DOCKER_COMPOSE, &down)
        );
    }
}

/// Stops the active run and asks the supervise loop to return. False when
/// the loop cannot be reached or this is a repeated signal.
fn forward_signal(requested: &AtomicBool, session: &Session, control: &Sender<Control>) -> bool {
    if requested.swap(true, Ordering::SeqCst) {
        return false;
    }
    info!("shutdown requested, stopping containers");
    session.invalidate_runs();
    control.send(Control::Shutdown).is_ok()
}

/// On SIGINT/SIGTERM the supervise loop returns and `up` stops the stack. A
/// second signal stops it from here and exits.
pub fn install_handler(
    session: Arc<Session>,
    control: Sender<Control>,
) -> Result<(), TestpressError> {
    ctrlc::set_handler(move || {
        if !forward_signal(&SHUTDOWN_REQUESTED, &session, &control) {
            stop_stack(&SystemRunner, &session);
            std::process::exit(1);
        }
    })?;
    Ok(())
}
