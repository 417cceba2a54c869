use async_trait::async_trait;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::passwd::{parse_group_gid, parse_passwd_uid};
use super::{AccountDirectory, ServiceIdentity};
use crate::controller::Tool;
use crate::error::AccountError;

/// Account binding backed by the container's `/etc` files and shadow-utils.
#[derive(Debug, Clone)]
pub struct SystemAccounts {
    passwd_file: PathBuf,
    group_file: PathBuf,
}

impl Default for SystemAccounts {
    fn default() -> Self {
        Self {
            passwd_file: PathBuf::from("/etc/passwd"),
            group_file: PathBuf::from("/etc/group"),
        }
    }
}

impl SystemAccounts {
    pub fn with_files(passwd_file: impl Into<PathBuf>, group_file: impl Into<PathBuf>) -> Self {
        Self {
            passwd_file: passwd_file.into(),
            group_file: group_file.into(),
        }
    }

    async fn read(path: &Path) -> Result<String, AccountError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AccountError::Read {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl AccountDirectory for SystemAccounts {
    async fn lookup(&self, user: &str, group: &str) -> Result<ServiceIdentity, AccountError> {
        let passwd = Self::read(&self.passwd_file).await?;
        let uid = parse_passwd_uid(&passwd, user).ok_or_else(|| AccountError::NotFound {
            kind: "user",
            name: user.to_string(),
            source_file: self.passwd_file.clone(),
        })?;

        let groups = Self::read(&self.group_file).await?;
        let gid = parse_group_gid(&groups, group).ok_or_else(|| AccountError::NotFound {
            kind: "group",
            name: group.to_string(),
            source_file: self.group_file.clone(),
        })?;

        Ok(ServiceIdentity::new(uid, gid))
    }

    async fn set_uid(&self, user: &str, uid: u32) -> Result<(), AccountError> {
        Tool::new("usermod")
            .args(["-o", "-u", uid.to_string().as_str(), user])
            .output()
            .await?;
        info!(user, uid, "service account uid updated");
        Ok(())
    }

    async fn set_gid(&self, group: &str, gid: u32) -> Result<(), AccountError> {
        Tool::new("groupmod")
            .args(["-o", "-g", gid.to_string().as_str(), group])
            .output()
            .await?;
        info!(group, gid, "service group gid updated");
        Ok(())
    }

    async fn owner_of(&self, path: &Path) -> Result<ServiceIdentity, AccountError> {
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|source| AccountError::Metadata {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(ServiceIdentity::new(meta.uid(), meta.gid()))
    }

    async fn chown_tree(&self, path: &Path, owner: ServiceIdentity) -> Result<u64, AccountError> {
        let root = path.to_path_buf();
        tokio::task::spawn_blocking(move || chown_tree_blocking(&root, owner))
            .await
            .map_err(|e| AccountError::Join(e.to_string()))?
    }
}

fn chown_tree_blocking(root: &Path, owner: ServiceIdentity) -> Result<u64, AccountError> {
    if !root.exists() {
        debug!(path = %root.display(), "nothing to re-own; path does not exist");
        return Ok(0);
    }

    let mut changed = 0u64;
    let mut failed = 0u64;
    let mut first: Option<String> = None;

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                failed += 1;
                first.get_or_insert_with(|| err.to_string());
                continue;
            }
        };

        let path = entry.path();
        let current = match entry.metadata() {
            Ok(meta) => ServiceIdentity::new(meta.uid(), meta.gid()),
            Err(err) => {
                failed += 1;
                first.get_or_insert_with(|| format!("{}: {err}", path.display()));
                continue;
            }
        };
        if current == owner {
            continue;
        }

        match std::os::unix::fs::lchown(path, Some(owner.uid), Some(owner.gid)) {
            Ok(()) => changed += 1,
            Err(err) => {
                failed += 1;
                first.get_or_insert_with(|| format!("{}: {err}", path.display()));
            }
        }
    }

    if failed > 0 {
        warn!(path = %root.display(), failed, changed, "some entries could not be re-owned");
        return Err(AccountError::Ownership {
            root: root.to_path_buf(),
            failed,
            first: first.unwrap_or_default(),
        });
    }

    debug!(path = %root.display(), changed, %owner, "ownership aligned");
    Ok(changed)
}
