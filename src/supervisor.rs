use crate::bridge::VirtualizationBridge;
use crate::compose::{build_descriptors, write_descriptors};
use crate::config::{read_preferences, Snapshot};
use crate::docker::{compose_up, database_health, engine_available, HEALTHY};
use crate::install::{provision, site_url};
use crate::process::ProcessRunner;
use crate::retry::{Clock, PollOutcome, PollStep, RetryPolicy};
use crate::session::{RunToken, Session};
use crate::status::{ApplicationStatus, DockerStatus, StatusSink, StatusUpdate};
use std::path::Path;
use std::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Restart,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ready,
    /// No project folder is configured; waits for a preference change.
    MissingProjectFolder,
    Superseded,
    GaveUp,
}

pub struct Supervisor<'a, R: ?Sized, C: ?Sized, S: ?Sized> {
    runner: &'a R,
    clock: &'a C,
    status: &'a S,
    session: &'a Session,
    preferences_path: &'a Path,
    policy: RetryPolicy,
    bridge: Option<&'a VirtualizationBridge>,
}

impl<'a, R, C, S> Supervisor<'a, R, C, S>
where
    R: ProcessRunner + ?Sized,
    C: Clock + ?Sized,
    S: StatusSink + ?Sized,
{
    pub fn new(
        runner: &'a R,
        clock: &'a C,
        status: &'a S,
        session: &'a Session,
        preferences_path: &'a Path,
    ) -> Self {
        Self {
            runner,
            clock,
            status,
            session,
            preferences_path,
            policy: RetryPolicy::every_second(),
            bridge: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_bridge(mut self, bridge: Option<&'a VirtualizationBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    fn load_snapshot(&self) -> Snapshot {
        match read_preferences(self.preferences_path) {
            Ok(prefs) => Snapshot::from_preferences(&prefs),
            Err(err) => {
                warn!(
                    "failed to read preferences {}: {err}",
                    self.preferences_path.display()
                );
                Snapshot::default()
            }
        }
    }

    fn current(&self, token: RunToken) -> bool {
        let current = self.session.is_current(token);
        if !current {
            debug!("run superseded");
        }
        current
    }

    /// Starts a run, then a fresh one per restart request, until a shutdown
    /// request arrives or every sender is gone. Returns the number of runs.
    pub fn supervise(&self, control: &Receiver<Control>) -> u32 {
        let mut runs = 0;
        loop {
            let outcome = self.run(self.session.begin_run());
            runs += 1;
            debug!(?outcome, "run finished");
            match control.recv() {
                Ok(Control::Restart) => {}
                Ok(Control::Shutdown) | Err(_) => return runs,
            }
            if control.try_iter().any(|pending| pending == Control::Shutdown) {
                return runs;
            }
            info!("restarting with updated preferences");
        }
    }

    pub fn run(&self, token: RunToken) -> RunOutcome {
        if !self.current(token) {
            return RunOutcome::Superseded;
        }
        self.status.reset();
        let snapshot = self.load_snapshot();
        debug!(
            primary = %snapshot.primary_display(),
            secondary = %snapshot.secondary_display(),
            port = snapshot.port,
            "applying preferences"
        );
        self.session.set_applied(snapshot.clone());

        if let Some(bridge) = self.bridge {
            bridge.bring_up(self.runner, self.session, snapshot.port);
            if !self.current(token) {
                return RunOutcome::Superseded;
            }
        }

        debug!("checking if daemon is running");
        match self.wait_for_engine(token) {
            PollOutcome::Ready(()) => {}
            PollOutcome::Stopped => return RunOutcome::Superseded,
            PollOutcome::Exhausted => return RunOutcome::GaveUp,
        }

        self.status
            .publish(StatusUpdate::Docker(DockerStatus::Starting));

        let Some((primary, port)) = snapshot.startable() else {
            info!("no WordPress folder configured; waiting for preferences");
            self.status
                .publish(StatusUpdate::Docker(DockerStatus::MissingProjectFolder));
            return RunOutcome::MissingProjectFolder;
        };

        self.start_stack(primary, snapshot.secondary_folder.as_deref(), port);
        self.status.publish(StatusUpdate::Docker(DockerStatus::Ready));

        if !self.current(token) {
            return RunOutcome::Superseded;
        }
        self.install(token, primary, port)
    }

    fn wait_for_engine(&self, token: RunToken) -> PollOutcome<()> {
        self.policy.poll(self.clock, |attempt| {
            if !self.current(token) {
                return PollStep::Stop;
            }
            if engine_available(self.runner, self.session) {
                return PollStep::Ready(());
            }
            debug!(attempt, "docker daemon not available");
            self.status
                .publish(StatusUpdate::Docker(DockerStatus::MissingDaemon));
            PollStep::Pending
        })
    }

    fn start_stack(&self, primary: &Path, secondary: Option<&Path>, port: u16) {
        debug!("preparing to start docker");
        let descriptors = build_descriptors(primary, secondary, port);
        if let Err(err) = write_descriptors(self.session.tools_dir(), &descriptors) {
            warn!(
                "failed to write compose files to {}: {err}",
                self.session.tools_dir().display()
            );
        }

        info!("starting docker containers");
        match compose_up(self.runner, self.session) {
            Ok(()) => debug!("docker containers started"),
            Err(err) => warn!("{err}"),
        }
    }

    fn wait_for_health(&self, token: RunToken) -> PollOutcome<()> {
        debug!("waiting for mysqld to start in the MySQL container");
        self.policy.poll(self.clock, |attempt| {
            if !self.current(token) {
                return PollStep::Stop;
            }
            match database_health(self.runner, self.session) {
                Some(health) if health == HEALTHY => PollStep::Ready(()),
                health => {
                    debug!(attempt, ?health, "database not healthy yet");
                    PollStep::Pending
                }
            }
        })
    }

    fn install(&self, token: RunToken, primary: &Path, port: u16) -> RunOutcome {
        self.status
            .publish(StatusUpdate::Application(ApplicationStatus::Installing));

        match self.wait_for_health(token) {
            PollOutcome::Ready(()) => {}
            PollOutcome::Stopped => return RunOutcome::Superseded,
            PollOutcome::Exhausted => return RunOutcome::GaveUp,
        }

        let report = provision(self.runner, self.session, primary, port);
        debug!(?report, "provisioning finished");
        if !self.current(token) {
            return RunOutcome::Superseded;
        }

        self.status
            .publish(StatusUpdate::Application(ApplicationStatus::Ready));
        info!("WordPress ready at {}/", site_url(port));
        RunOutcome::Ready
    }
}
