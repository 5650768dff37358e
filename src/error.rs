use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestpressError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("process error: {0}")]
    Process(String),
    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}
