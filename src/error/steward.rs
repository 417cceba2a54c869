use std::io;
use std::path::PathBuf;
use thiserror::Error as ThisError;

use super::CommandError;

#[derive(Debug, ThisError)]
pub enum StewardError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Administrative start failed: {0}")]
    AdminStart(#[source] CommandError),

    #[error("Service did not become ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("Handoff to {} failed: {source}", program.display())]
    Handoff {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<figment::Error> for StewardError {
    fn from(err: figment::Error) -> Self {
        StewardError::Config(Box::new(err))
    }
}
