//! Service account identity: lookup, UID/GID changes and data ownership.

mod passwd;
mod system;

pub use passwd::{parse_group_gid, parse_passwd_uid};
pub use system::SystemAccounts;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::error::AccountError;

/// UID/GID pair of the account the service runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl ServiceIdentity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// `self` with any declared component substituted.
    pub fn with_overrides(self, uid: Option<u32>, gid: Option<u32>) -> Self {
        Self {
            uid: uid.unwrap_or(self.uid),
            gid: gid.unwrap_or(self.gid),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Operating-system account operations the reconciler depends on.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn lookup(&self, user: &str, group: &str) -> Result<ServiceIdentity, AccountError>;

    async fn set_uid(&self, user: &str, uid: u32) -> Result<(), AccountError>;

    async fn set_gid(&self, group: &str, gid: u32) -> Result<(), AccountError>;

    /// Owner of `path` itself (not following symlinks).
    async fn owner_of(&self, path: &Path) -> Result<ServiceIdentity, AccountError>;

    /// Recursively re-owns `path`. Returns the number of entries changed.
    async fn chown_tree(&self, path: &Path, owner: ServiceIdentity) -> Result<u64, AccountError>;
}
