#![allow(dead_code)]

use async_trait::async_trait;
use dbsteward::accounts::{AccountDirectory, ServiceIdentity};
use dbsteward::controller::{AdminStatement, ServiceController};
use dbsteward::error::{AccountError, CommandError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// In-memory database service that applies statements semantically.
#[derive(Debug, Default)]
pub struct ServiceState {
    pub initialized: bool,
    pub running: bool,
    pub roles: BTreeMap<String, Option<String>>,
    pub databases: BTreeMap<String, Option<String>>,
    /// Enabled extensions keyed by database (`None` for server-wide plugins).
    pub extensions: BTreeMap<Option<String>, BTreeSet<String>>,
    /// Extensions the server can install; anything else fails to enable.
    pub available: BTreeSet<String>,
    pub never_ready: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub starts: u32,
    pub ready_polls: u32,
    pub stops: u32,
    pub statements: Vec<AdminStatement>,
    /// Statements that actually changed something.
    pub mutations: u32,
}

#[derive(Debug, Default)]
pub struct FakeService {
    pub state: Mutex<ServiceState>,
}

impl FakeService {
    /// An initialized server that can install the given extensions.
    pub fn initialized(available: &[&str]) -> Self {
        let service = Self::default();
        {
            let mut state = service.state.lock().unwrap();
            state.initialized = true;
            state.roles.insert("postgres".to_string(), None);
            state.databases.insert("postgres".to_string(), None);
            state.available = available.iter().map(|s| s.to_string()).collect();
        }
        service
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ServiceState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn authenticates(&self, name: &str, password: &str) -> bool {
        self.with(|s| s.roles.get(name) == Some(&Some(password.to_string())))
    }

    pub fn extension_enabled(&self, database: Option<&str>, name: &str) -> bool {
        self.with(|s| {
            s.extensions
                .get(&database.map(str::to_string))
                .is_some_and(|set| set.contains(name))
        })
    }

    pub fn reset_counters(&self) {
        self.with(|s| {
            s.starts = 0;
            s.ready_polls = 0;
            s.stops = 0;
            s.statements.clear();
            s.mutations = 0;
        });
    }
}

fn failure(stderr: &str) -> CommandError {
    CommandError::Exit {
        program: "fake".to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl ServiceController for FakeService {
    fn data_store_initialized(&self) -> bool {
        self.with(|s| s.initialized)
    }

    async fn start_admin(&self) -> Result<(), CommandError> {
        self.with(|s| {
            s.starts += 1;
            if s.fail_start {
                return Err(failure("could not bind socket"));
            }
            s.running = true;
            Ok(())
        })
    }

    async fn is_ready(&self) -> bool {
        self.with(|s| {
            s.ready_polls += 1;
            s.running && !s.never_ready
        })
    }

    async fn run_admin_statement(&self, statement: &AdminStatement) -> Result<(), CommandError> {
        self.with(|s| {
            if !s.running {
                return Err(CommandError::NotRunning {
                    program: "fake".to_string(),
                });
            }
            s.statements.push(statement.clone());
            let changed = match statement {
                AdminStatement::EnsureLogin { name, password } => {
                    let password = password.as_ref().map(|p| p.expose().to_string());
                    let previous = s.roles.insert(name.clone(), password.clone());
                    previous != Some(password)
                }
                AdminStatement::EnsureDatabase { name, owner } => {
                    if let Some(owner) = owner {
                        if !s.roles.contains_key(owner) {
                            return Err(failure("role does not exist"));
                        }
                    }
                    let previous = s.databases.insert(name.clone(), owner.clone());
                    previous != Some(owner.clone())
                }
                AdminStatement::EnableExtension { name, database } => {
                    if !s.available.contains(name) {
                        return Err(failure("extension is not available"));
                    }
                    s.extensions
                        .entry(database.clone())
                        .or_default()
                        .insert(name.clone())
                }
                AdminStatement::DisableExtension { name, database } => s
                    .extensions
                    .get_mut(database)
                    .is_some_and(|set| set.remove(name)),
            };
            if changed {
                s.mutations += 1;
            }
            Ok(())
        })
    }

    async fn stop_admin(&self) -> Result<(), CommandError> {
        self.with(|s| {
            s.stops += 1;
            s.running = false;
            if s.fail_stop {
                return Err(failure("server did not shut down"));
            }
            Ok(())
        })
    }
}

#[derive(Debug)]
pub struct AccountState {
    pub identity: ServiceIdentity,
    pub data_owner: ServiceIdentity,
    pub chowns: Vec<(PathBuf, ServiceIdentity)>,
    pub fail_set_uid: bool,
    pub calls: u32,
}

#[derive(Debug)]
pub struct FakeAccounts {
    pub state: Mutex<AccountState>,
}

impl FakeAccounts {
    /// Account and data directory both owned by `uid:gid`.
    pub fn new(uid: u32, gid: u32) -> Self {
        let identity = ServiceIdentity::new(uid, gid);
        Self {
            state: Mutex::new(AccountState {
                identity,
                data_owner: identity,
                chowns: Vec::new(),
                fail_set_uid: false,
                calls: 0,
            }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut AccountState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn identity(&self) -> ServiceIdentity {
        self.with(|s| s.identity)
    }
}

#[async_trait]
impl AccountDirectory for FakeAccounts {
    async fn lookup(&self, _user: &str, _group: &str) -> Result<ServiceIdentity, AccountError> {
        Ok(self.with(|s| {
            s.calls += 1;
            s.identity
        }))
    }

    async fn set_uid(&self, user: &str, uid: u32) -> Result<(), AccountError> {
        self.with(|s| {
            s.calls += 1;
            if s.fail_set_uid {
                return Err(AccountError::Join(format!("usermod refused {user}")));
            }
            s.identity.uid = uid;
            Ok(())
        })
    }

    async fn set_gid(&self, _group: &str, gid: u32) -> Result<(), AccountError> {
        self.with(|s| {
            s.calls += 1;
            s.identity.gid = gid;
            Ok(())
        })
    }

    async fn owner_of(&self, _path: &Path) -> Result<ServiceIdentity, AccountError> {
        Ok(self.with(|s| {
            s.calls += 1;
            s.data_owner
        }))
    }

    async fn chown_tree(&self, path: &Path, owner: ServiceIdentity) -> Result<u64, AccountError> {
        self.with(|s| {
            s.calls += 1;
            s.chowns.push((path.to_path_buf(), owner));
            s.data_owner = owner;
            Ok(3)
        })
    }
}
