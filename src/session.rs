use crate::config::Snapshot;
use crate::error::TestpressError;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

pub const PERSISTENT_DESCRIPTOR: &str = "docker-compose.yml";
pub const SCRIPTS_DESCRIPTOR: &str = "docker-compose.scripts.yml";
pub const STATUS_FILE: &str = "status.json";
pub const DOCKER_ENV_FILE: &str = "docker-env.json";

/// Identifies one supervisor run. Only the most recently issued token is
/// current; issuing a new one retires every earlier token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken {
    generation: u64,
}

#[derive(Debug)]
pub struct Session {
    tools_dir: PathBuf,
    project_name: String,
    applied: Mutex<Snapshot>,
    docker_env: Mutex<BTreeMap<String, String>>,
    generation: AtomicU64,
}

impl Session {
    pub fn new(tools_dir: PathBuf, project_name: impl Into<String>) -> Self {
        Self {
            tools_dir,
            project_name: project_name.into(),
            applied: Mutex::new(Snapshot::default()),
            docker_env: Mutex::new(BTreeMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn tools_dir(&self) -> &Path {
        &self.tools_dir
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn persistent_descriptor(&self) -> PathBuf {
        self.tools_dir.join(PERSISTENT_DESCRIPTOR)
    }

    pub fn status_path(&self) -> PathBuf {
        self.tools_dir.join(STATUS_FILE)
    }

    pub fn docker_env_path(&self) -> PathBuf {
        self.tools_dir.join(DOCKER_ENV_FILE)
    }

    pub fn applied(&self) -> Snapshot {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_applied(&self, snapshot: Snapshot) {
        *self.applied.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub fn docker_env(&self) -> BTreeMap<String, String> {
        self.docker_env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace_docker_env(&self, env: BTreeMap<String, String>) {
        *self.docker_env.lock().unwrap_or_else(PoisonError::into_inner) = env;
    }

    pub fn save_docker_env(&self) -> Result<(), TestpressError> {
        fs::create_dir_all(&self.tools_dir)?;
        let content = serde_json::to_string_pretty(&self.docker_env())?;
        fs::write(self.docker_env_path(), content)?;
        Ok(())
    }

    pub fn load_docker_env(&self) -> Result<(), TestpressError> {
        let content = match fs::read_to_string(self.docker_env_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        self.replace_docker_env(serde_json::from_str(&content)?);
        Ok(())
    }

    pub fn forget_docker_env(&self) -> Result<(), TestpressError> {
        self.replace_docker_env(BTreeMap::new());
        match fs::remove_file(self.docker_env_path()) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    pub fn begin_run(&self) -> RunToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        RunToken { generation }
    }

    pub fn invalidate_runs(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_current(&self, token: RunToken) -> bool {
        self.generation.load(Ordering::SeqCst) == token.generation
    }
}
