use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StateError;
use crate::record::PersistedState;

/// What was found on disk at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorState {
    /// No record: the reconciler has never completed a pass on this volume.
    Absent,
    Present(PersistedState),
}

impl PriorState {
    pub fn is_absent(&self) -> bool {
        matches!(self, PriorState::Absent)
    }

    pub fn as_record(&self) -> Option<&PersistedState> {
        match self {
            PriorState::Absent => None,
            PriorState::Present(state) => Some(state),
        }
    }
}

/// Location of the state record. Writes replace the whole file atomically.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<PriorState, StateError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => PersistedState::parse(&text).map(PriorState::Present),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state record found");
                Ok(PriorState::Absent)
            }
            Err(source) => Err(StateError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn store(&self, state: &PersistedState) -> Result<(), StateError> {
        self.write_atomic(state.render().as_bytes())
            .map_err(|source| StateError::Write {
                path: self.path.clone(),
                source,
            })
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| err.error)?;

        #[cfg(unix)]
        {
            if let Ok(dir) = fs::File::open(dir) {
                let _ = dir.sync_all();
            }
        }
        debug!(path = %self.path.display(), bytes = bytes.len(), "state record written");
        Ok(())
    }
}
