use std::io;
use thiserror::Error as ThisError;

/// Failure of an external tool invoked by a service or account binding.
#[derive(Debug, ThisError)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to feed script to `{program}`: {source}")]
    Stdin {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with {}: {stderr}", display_code(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{program}` is not running")]
    NotRunning { program: String },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}
