use std::io;
use std::path::PathBuf;
use thiserror::Error as ThisError;

use super::CommandError;

#[derive(Debug, ThisError)]
pub enum AccountError {
    #[error("{kind} `{name}` not found in {source_file}")]
    NotFound {
        kind: &'static str,
        name: String,
        source_file: PathBuf,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to inspect {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to re-own {failed} entries under {root}; first error: {first}")]
    Ownership {
        root: PathBuf,
        failed: u64,
        first: String,
    },

    #[error("ownership worker failed: {0}")]
    Join(String),
}
