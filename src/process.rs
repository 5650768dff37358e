use crate::error::TestpressError;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

pub const DOCKER: &str = "docker";
pub const DOCKER_COMPOSE: &str = "docker-compose";
pub const DOCKER_MACHINE: &str = "docker-machine";

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

pub trait ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        env_overrides: &BTreeMap<String, String>,
    ) -> Result<CommandOutput, io::Error>;

    /// Starts `program` with null stdio and returns without waiting for it.
    fn spawn_detached(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        env_overrides: &BTreeMap<String, String>,
    ) -> Result<(), io::Error>;
}

pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        env_overrides: &BTreeMap<String, String>,
    ) -> Result<CommandOutput, io::Error> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in env_overrides {
            cmd.env(key, value);
        }
        let output = cmd.output()?;
        let status_code = output
            .status
            .code()
            .unwrap_or(if output.status.success() { 0 } else { 1 });
        Ok(CommandOutput {
            status_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn spawn_detached(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        env_overrides: &BTreeMap<String, String>,
    ) -> Result<(), io::Error> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in env_overrides {
            cmd.env(key, value);
        }
        // Own process group, so a terminal Ctrl-C does not reach it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        // Not reaped; it must outlive us.
        let _child = cmd.spawn()?;
        Ok(())
    }
}

pub fn render_command(program: &str, args: &[String]) -> String {
    fn shell_quote(part: &str) -> String {
        if part.is_empty() {
            return "\"\"".to_string();
        }
        if part.chars().any(char::is_whitespace) {
            return format!("\"{}\"", part.replace('"', "\\\""));
        }
        part.to_string()
    }
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}

fn classify_failure(stderr: &str) -> Option<&'static str> {
    let lower = stderr.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("error during connect")
    {
        return Some("Docker daemon is unreachable. Start Docker (or docker-machine) and retry.");
    }

    if lower.contains("port is already allocated") || lower.contains("address already in use") {
        return Some("The configured site port is already in use. Pick another port with `testpress config set site port <port>`.");
    }

    if lower.contains("no such container") {
        return Some("The stack is not running. Start it with `testpress up`.");
    }

    None
}

/// Runs a command and turns spawn failures and non-zero exits into errors
/// carrying the rendered command line and captured stderr.
pub fn run_checked<R: ProcessRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    env_overrides: &BTreeMap<String, String>,
) -> Result<CommandOutput, TestpressError> {
    let command = render_command(program, args);
    let output = runner
        .run(program, args, cwd, env_overrides)
        .map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                TestpressError::Process(format!(
                    "failed to run `{command}`: {program} was not found on PATH"
                ))
            } else {
                TestpressError::Process(format!("failed to run `{command}`: {err}"))
            }
        })?;
    if !output.success() {
        let stderr = output.stderr_text();
        let mut message = format!(
            "command failed with status {} while running `{command}`",
            output.status_code
        );
        if !stderr.is_empty() {
            message = format!("{message}: {stderr}");
        }
        if let Some(hint) = classify_failure(&stderr) {
            message = format!("{message}\nHint: {hint}");
        }
        return Err(TestpressError::Process(message));
    }
    Ok(output)
}

pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub program: String,
        pub args: Vec<String>,
        pub env_overrides: BTreeMap<String, String>,
        pub detached: bool,
    }

    impl RecordedCall {
        pub fn has_args(&self, expected: &[&str]) -> bool {
            self.args
                .windows(expected.len())
                .any(|window| window.iter().zip(expected).all(|(a, b)| a == b))
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            status_code: 0,
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    pub fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            status_code: 1,
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    type Responder = Box<dyn Fn(&RecordedCall) -> Option<CommandOutput>>;

    /// Scripted runner: responders are consulted in registration order and the
    /// first `Some` wins; calls nobody answers succeed with empty output.
    #[derive(Default)]
    pub struct MockRunner {
        calls: RefCell<Vec<RecordedCall>>,
        responders: RefCell<Vec<Responder>>,
        queued: RefCell<VecDeque<(String, CommandOutput)>>,
    }

    impl MockRunner {
        pub fn respond<F>(&self, responder: F)
        where
            F: Fn(&RecordedCall) -> Option<CommandOutput> + 'static,
        {
            self.responders.borrow_mut().push(Box::new(responder));
        }

        /// Queues a one-off output for the next call whose rendered args
        /// contain `needle`.
        pub fn push_for(&self, needle: &str, output: CommandOutput) {
            self.queued
                .borrow_mut()
                .push_back((needle.to_string(), output));
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.borrow().clone()
        }

        pub fn calls_with(&self, expected: &[&str]) -> Vec<RecordedCall> {
            self.calls()
                .into_iter()
                .filter(|call| call.has_args(expected))
                .collect()
        }

        fn answer(&self, call: RecordedCall) -> CommandOutput {
            let rendered = call.args.join(" ");
            self.calls.borrow_mut().push(call.clone());
            {
                let mut queued = self.queued.borrow_mut();
                if let Some(idx) = queued
                    .iter()
                    .position(|(needle, _)| rendered.contains(needle.as_str()))
                {
                    if let Some((_, output)) = queued.remove(idx) {
                        return output;
                    }
                }
            }
            for responder in self.responders.borrow().iter() {
                if let Some(output) = responder(&call) {
                    return output;
                }
            }
            ok("")
        }
    }

    impl ProcessRunner for MockRunner {
        fn run(
            &self,
            program: &str,
            args: &[String],
            _cwd: Option<&Path>,
            env_overrides: &BTreeMap<String, String>,
        ) -> Result<CommandOutput, io::Error> {
            Ok(self.answer(RecordedCall {
                program: program.to_string(),
                args: args.to_vec(),
                env_overrides: env_overrides.clone(),
                detached: false,
            }))
        }

        fn spawn_detached(
            &self,
            program: &str,
            args: &[String],
            _cwd: Option<&Path>,
            env_overrides: &BTreeMap<String, String>,
        ) -> Result<(), io::Error> {
            self.answer(RecordedCall {
                program: program.to_string(),
                args: args.to_vec(),
                env_overrides: env_overrides.clone(),
                detached: true,
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{failed, MockRunner};
    use super::*;

    #[test]
    fn render_command_quotes_whitespace() {
        let rendered = render_command(
            DOCKER_COMPOSE,
            &args(&["run", "--rm", "cli", "--title=WordPress Develop"]),
        );
        assert_eq!(
            rendered,
            "docker-compose run --rm cli \"--title=WordPress Develop\""
        );
    }

    #[test]
    fn run_checked_reports_stderr_and_hint() {
        let runner = MockRunner::default();
        runner.push_for(
            "up",
            failed("Bind for 0.0.0.0:9999 failed: port is already allocated"),
        );
        let err = run_checked(
            &runner,
            DOCKER_COMPOSE,
            &args(&["up", "-d"]),
            None,
            &BTreeMap::new(),
        )
        .expect_err("non-zero exit should fail");
        let message = err.to_string();
        assert!(message.contains("status 1"));
        assert!(message.contains("port is already allocated"));
        assert!(message.contains("Hint:"));
    }

    #[cfg(target_os = "linux")]
    fn process_group_of(stat: &str) -> Option<String> {
        let (_, rest) = stat.rsplit_once(')')?;
        rest.split_whitespace().nth(2).map(str::to_string)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn detached_child_leads_its_own_process_group() {
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stat");
        SystemRunner
            .spawn_detached(
                "sh",
                &args(&["-c", "cat /proc/self/stat > stat.tmp && mv stat.tmp stat"]),
                Some(dir.path()),
                &BTreeMap::new(),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while !out.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let child = process_group_of(&std::fs::read_to_string(&out).unwrap()).unwrap();
        let own = process_group_of(&std::fs::read_to_string("/proc/self/stat").unwrap()).unwrap();
        assert_ne!(child, own);
    }
}
