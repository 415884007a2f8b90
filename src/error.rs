//! 错误类型 (Error types)
//!
//! Startup and configuration failures. Nothing here is produced per tick.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServoError {
    /// The negotiated model output is not `[1, 4 + classes, slots]`.
    #[error("unexpected model output shape {shape:?}, expected [1, 4 + classes, slots]")]
    OutputShape { shape: Vec<usize> },

    #[error("unknown target class `{0}`")]
    UnknownTargetClass(String),

    #[error("target class `{name}` has id {id} but the model only reports {classes} classes")]
    ClassOutOfRange { name: String, id: u32, classes: usize },

    #[error("invalid breakpoint table: {0}")]
    Breakpoints(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to access config file {path}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = ServoError> = std::result::Result<T, E>;
