//! Error types for envsensor-flux
//!
//! Problems found in the sensor data itself are never raised; they are recorded
//! as [`Issue`](crate::state::Issue)s on the conversion state. `ConvertError`
//! covers the conditions a caller must handle outside a conversion pass:
//! unreadable registry tables, configuration, and export metadata.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading inputs around a conversion
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid table row: {0}")]
    TableRow(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Header parse error: {0}")]
    HeaderParse(String),
}

impl ConvertError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }
}
