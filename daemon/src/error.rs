//! Error types for stk-wrapper.

use std::path::PathBuf;

use thiserror::Error;

/// stk-wrapper error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log file {} did not appear after {attempts} attempts", .path.display())]
    LogNotFound { path: PathBuf, attempts: u32 },

    #[error("Failed reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("No server command given")]
    EmptyCommand,
}
