mod declared;
mod extensions;
mod lax;
mod service;

pub use declared::DeclaredConfig;
pub use extensions::ExtensionSet;
pub use service::ServiceKind;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::StewardError;

const DEFAULT_CONFIG_FILE: &str = "/etc/dbsteward.toml";
const CONFIG_FILE_ENV: &str = "STEWARD_CONFIG";

/// Settings of the entrypoint itself, as opposed to the declared database state.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Wrapped service.
    /// Env: `STEWARD_SERVICE` (`postgres` | `mariadb` | `mysql`). Default: `postgres`.
    #[serde(default)]
    pub service: ServiceKind,

    /// Persistent data directory.
    /// Env: `STEWARD_DATA_DIR`, then `PGDATA` for postgres. Default: the image's data path.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// `PGDATA` as exported by the postgres image.
    #[serde(default)]
    pub pgdata: Option<PathBuf>,

    /// OS account the service runs as.
    /// Env: `STEWARD_SERVICE_USER`. Default: `postgres` / `mysql`.
    #[serde(default)]
    pub service_user: Option<String>,

    /// OS group the service runs as.
    /// Env: `STEWARD_SERVICE_GROUP`. Default: same as the account.
    #[serde(default)]
    pub service_group: Option<String>,

    /// Unix socket directory used while in administrative mode.
    /// Env: `STEWARD_SOCKET_DIR`. Default: `/var/run/postgresql` / `/run/mysqld`.
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,

    /// Postgres role used for administrative statements.
    /// Env: `STEWARD_ADMIN_USER`. Default: the last applied login, else `postgres`.
    #[serde(default)]
    pub admin_user: Option<String>,

    /// State record location; relative paths resolve against the data directory.
    /// Env: `STEWARD_STATE_FILE`. Default: `.dbsteward.state`.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Readiness polls before giving up on administrative mode.
    /// Env: `STEWARD_READY_ATTEMPTS`. Default: `30`.
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,

    /// Fixed delay between readiness polls, in milliseconds.
    /// Env: `STEWARD_READY_INTERVAL_MS`. Default: `1000`.
    #[serde(default = "default_ready_interval_ms")]
    pub ready_interval_ms: u64,

    /// Wrapped image's entrypoint, exec'd last with the original arguments.
    /// Env: `STEWARD_ENTRYPOINT`. Default: `docker-entrypoint.sh`.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: PathBuf,

    /// Log level for tracing subscriber initialization.
    /// Env: `STEWARD_LOGLEVEL`. Default: `info`.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service: ServiceKind::default(),
            data_dir: None,
            pgdata: None,
            service_user: None,
            service_group: None,
            socket_dir: None,
            admin_user: None,
            state_file: default_state_file(),
            ready_attempts: default_ready_attempts(),
            ready_interval_ms: default_ready_interval_ms(),
            entrypoint: default_entrypoint(),
            loglevel: default_loglevel(),
        }
    }
}

impl Settings {
    /// Builds a Figment that merges defaults, an optional TOML file and the environment.
    pub fn figment() -> Figment {
        let config_file = std::env::var_os(CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let figment = Figment::new().merge(Serialized::defaults(Settings::default()));
        let figment = if config_file.is_file() {
            figment.merge(Toml::file(config_file))
        } else {
            figment
        };
        figment
            .merge(Env::prefixed("STEWARD_").ignore(&["config"]))
            .merge(Env::raw().only(&["PGDATA"]))
    }

    pub fn load() -> Result<Self, StewardError> {
        Self::from_figment(&Self::figment())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, StewardError> {
        let settings: Self = figment.extract()?;
        if settings.ready_attempts == 0 {
            return Err(StewardError::InvalidConfig(
                "STEWARD_READY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if settings.state_file.as_os_str().is_empty() {
            return Err(StewardError::InvalidConfig(
                "STEWARD_STATE_FILE must not be empty".to_string(),
            ));
        }
        Ok(settings)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| match self.service {
                ServiceKind::Postgres => self.pgdata.clone(),
                ServiceKind::Mariadb => None,
            })
            .unwrap_or_else(|| self.service.default_data_dir())
    }

    pub fn service_user(&self) -> &str {
        self.service_user
            .as_deref()
            .unwrap_or_else(|| self.service.default_account())
    }

    pub fn service_group(&self) -> &str {
        self.service_group
            .as_deref()
            .unwrap_or_else(|| self.service_user())
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir
            .clone()
            .unwrap_or_else(|| self.service.default_socket_dir())
    }

    pub fn state_path(&self) -> PathBuf {
        resolve_against(&self.data_dir(), &self.state_file)
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".dbsteward.state")
}

fn default_ready_attempts() -> u32 {
    30
}

fn default_ready_interval_ms() -> u64 {
    1000
}

fn default_entrypoint() -> PathBuf {
    PathBuf::from("docker-entrypoint.sh")
}

fn default_loglevel() -> String {
    "info".to_string()
}
