use figment::{Figment, providers::Env};
use serde::Deserialize;
use std::{fmt, fs, path::PathBuf};

use super::extensions::ExtensionSet;
use super::lax;
use super::service::ServiceKind;
use crate::error::StewardError;

/// Service-independent keys read without a prefix.
const COMMON_KEYS: &[&str] = &["PUID", "PGID", "SKIP_UPDATE", "VERBOSE"];

/// Raw shape of the declared environment after prefix stripping.
///
/// Only lists, ids and flags go through figment. Names and credentials are
/// read verbatim from the process environment, since figment would parse
/// `[x]` or `{a=b}` into arrays and dicts.
#[derive(Debug, Clone, Default, Deserialize)]
struct DeclaredEnv {
    #[serde(default, alias = "plugins", deserialize_with = "lax::list")]
    extensions: Vec<String>,

    #[serde(default, alias = "disable_plugins", deserialize_with = "lax::list")]
    disable_extensions: Vec<String>,

    #[serde(default, deserialize_with = "lax::opt_u32")]
    puid: Option<u32>,

    #[serde(default, deserialize_with = "lax::opt_u32")]
    pgid: Option<u32>,

    #[serde(default, deserialize_with = "lax::flag")]
    skip_update: bool,

    #[serde(default, deserialize_with = "lax::flag")]
    verbose: bool,
}

/// Desired state for this container start. Built once, never re-read.
#[derive(Clone, PartialEq, Eq)]
pub struct DeclaredConfig {
    pub service: ServiceKind,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub extensions: ExtensionSet,
    pub disable_extensions: ExtensionSet,
    pub puid: Option<u32>,
    pub pgid: Option<u32>,
    pub skip_update: bool,
    pub verbose: bool,
    /// Credential the MariaDB binding authenticates with. Never persisted.
    pub admin_password: Option<String>,
}

impl DeclaredConfig {
    /// An empty declaration: no opinion on anything.
    pub fn new(service: ServiceKind) -> Self {
        Self {
            service,
            user: None,
            password: None,
            database: None,
            extensions: ExtensionSet::new(),
            disable_extensions: ExtensionSet::new(),
            puid: None,
            pgid: None,
            skip_update: false,
            verbose: false,
            admin_password: None,
        }
    }

    pub fn figment(service: ServiceKind) -> Figment {
        let figment = service
            .env_prefixes()
            .iter()
            .fold(Figment::new(), |figment, prefix| {
                figment.merge(Env::prefixed(prefix))
            });
        figment.merge(Env::raw().only(COMMON_KEYS))
    }

    pub fn from_env(service: ServiceKind) -> Result<Self, StewardError> {
        let mut declared = Self::from_figment(service, &Self::figment(service))?;
        declared.user = raw_env(service, &["USER"]);
        declared.database = raw_env(service, &["DB", "DATABASE"]);
        declared.password = resolve_secret(service, "PASSWORD")?;
        declared.admin_password = resolve_secret(service, "ROOT_PASSWORD")?;
        Ok(declared)
    }

    /// Lists, ids and flags only; names and credentials stay unset.
    pub fn from_figment(service: ServiceKind, figment: &Figment) -> Result<Self, StewardError> {
        let env: DeclaredEnv = figment.extract()?;

        Ok(Self {
            extensions: env.extensions.into_iter().collect(),
            disable_extensions: env.disable_extensions.into_iter().collect(),
            puid: env.puid,
            pgid: env.pgid,
            skip_update: env.skip_update,
            verbose: env.verbose,
            ..Self::new(service)
        })
    }

    /// Login to reconcile: the declared user, or the service's default login
    /// when only a credential was declared.
    pub fn login(&self) -> Option<&str> {
        self.user.as_deref().or_else(|| {
            self.password
                .as_ref()
                .and_then(|_| self.service.default_login())
        })
    }

    /// Database to ensure and to host per-database extensions.
    pub fn target_database(&self) -> Option<&str> {
        self.database.as_deref().or_else(|| {
            if self.service.database_defaults_to_login() {
                self.login()
            } else {
                None
            }
        })
    }

    /// Enable list minus anything that is also listed for removal.
    pub fn extensions_to_enable(&self) -> impl Iterator<Item = &str> {
        self.extensions
            .iter()
            .filter(|name| !self.disable_extensions.contains(name))
    }

    /// Names listed in both the enable and disable lists.
    pub fn conflicting_extensions(&self) -> Vec<&str> {
        self.extensions
            .iter()
            .filter(|name| self.disable_extensions.contains(name))
            .collect()
    }

    pub fn declares_identity(&self) -> bool {
        self.puid.is_some() || self.pgid.is_some()
    }
}

impl fmt::Debug for DeclaredConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeclaredConfig")
            .field("service", &self.service)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("extensions", &self.extensions)
            .field("disable_extensions", &self.disable_extensions)
            .field("puid", &self.puid)
            .field("pgid", &self.pgid)
            .field("skip_update", &self.skip_update)
            .field("verbose", &self.verbose)
            .field(
                "admin_password",
                &self.admin_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Value from the highest-precedence prefix that sets one, unparsed.
fn raw_env(service: ServiceKind, suffixes: &[&str]) -> Option<String> {
    service
        .env_prefixes()
        .iter()
        .rev()
        .find_map(|prefix| {
            suffixes
                .iter()
                .rev()
                .find_map(|suffix| env_value(&format!("{prefix}{suffix}")))
        })
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolves `<KEY>` / `<KEY>_FILE`. The highest-precedence prefix declaring
/// either form wins; only that prefix declaring both is rejected.
fn resolve_secret(service: ServiceKind, key: &str) -> Result<Option<String>, StewardError> {
    for prefix in service.env_prefixes().iter().rev() {
        let inline = env_value(&format!("{prefix}{key}"));
        let file = env_value(&format!("{prefix}{key}_FILE")).map(PathBuf::from);
        match (inline, file) {
            (Some(_), Some(_)) => {
                return Err(StewardError::InvalidConfig(format!(
                    "both {prefix}{key} and {prefix}{key}_FILE are set; they are mutually exclusive"
                )));
            }
            (Some(value), None) => return Ok(Some(value)),
            (None, Some(path)) => {
                let contents = fs::read_to_string(&path).map_err(|e| {
                    StewardError::InvalidConfig(format!(
                        "cannot read {prefix}{key}_FILE {}: {e}",
                        path.display()
                    ))
                })?;
                let value = contents.trim_end_matches(['\n', '\r']);
                return Ok((!value.trim().is_empty()).then(|| value.to_string()));
            }
            (None, None) => {}
        }
    }
    Ok(None)
}
