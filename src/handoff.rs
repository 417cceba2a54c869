use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use tracing::info;

use crate::error::StewardError;

/// Replaces the current process with `program`. Only returns on failure.
pub fn exec(program: &Path, args: Vec<OsString>) -> StewardError {
    info!(program = %program.display(), args = args.len(), "handing off");
    let source = Command::new(program).args(args).exec();
    StewardError::Handoff {
        program: program.to_path_buf(),
        source,
    }
}
