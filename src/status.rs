use crate::error::TestpressError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DockerStatus {
    MissingDaemon,
    Starting,
    Ready,
    MissingProjectFolder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationStatus {
    Installing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Docker(DockerStatus),
    Application(ApplicationStatus),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBoard {
    pub docker: Option<DockerStatus>,
    pub application: Option<ApplicationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StatusBoard {
    pub fn apply(&mut self, update: StatusUpdate) -> bool {
        match update {
            StatusUpdate::Docker(status) => {
                let changed = self.docker != Some(status);
                self.docker = Some(status);
                changed
            }
            StatusUpdate::Application(status) => {
                let changed = self.application != Some(status);
                self.application = Some(status);
                changed
            }
        }
    }
}

pub trait StatusSink {
    fn reset(&self);
    fn publish(&self, update: StatusUpdate);
}

/// Mirrors the status board into a JSON file for `testpress status`.
pub struct FileStatusSink {
    path: PathBuf,
    board: Mutex<StatusBoard>,
}

impl FileStatusSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            board: Mutex::new(StatusBoard::default()),
        }
    }

    fn persist(&self, board: &StatusBoard) {
        let write = || -> Result<(), TestpressError> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let body = serde_json::to_string_pretty(board)?;
            fs::write(&self.path, format!("{body}\n"))?;
            Ok(())
        };
        if let Err(err) = write() {
            warn!("failed to write status file {}: {err}", self.path.display());
        }
    }
}

impl StatusSink for FileStatusSink {
    fn reset(&self) {
        let mut board = self.board.lock().unwrap_or_else(PoisonError::into_inner);
        *board = StatusBoard {
            updated_at: Some(Utc::now().to_rfc3339()),
            ..StatusBoard::default()
        };
        self.persist(&board);
    }

    fn publish(&self, update: StatusUpdate) {
        let mut board = self.board.lock().unwrap_or_else(PoisonError::into_inner);
        if board.apply(update) {
            info!(?update, "status changed");
        } else {
            debug!(?update, "status unchanged");
        }
        board.updated_at = Some(Utc::now().to_rfc3339());
        self.persist(&board);
    }
}

pub fn read_status(path: &Path) -> Result<StatusBoard, TestpressError> {
    if !path.exists() {
        return Ok(StatusBoard::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
