//! Reasons the relay refuses a configuration.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read relay settings at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not JSON, or its fields have the wrong types.
    #[error("relay settings are not well-formed: {0}")]
    Json(#[from] serde_json::Error),
    /// A numeric limit the pumps or the hub cannot run with.
    #[error("{key} = {value} is outside the supported range {min}..={max}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    /// A string setting with an unusable shape.
    #[error("{key} {problem}: {value:?}")]
    Malformed {
        key: &'static str,
        value: String,
        problem: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, SettingsError>;
