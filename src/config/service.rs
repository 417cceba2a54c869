use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The database service wrapped by this entrypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    #[serde(alias = "postgresql")]
    Postgres,
    #[serde(alias = "mysql")]
    Mariadb,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Postgres => "postgres",
            ServiceKind::Mariadb => "mariadb",
        }
    }

    /// Environment prefixes carrying declared configuration, lowest precedence first.
    pub fn env_prefixes(&self) -> &'static [&'static str] {
        match self {
            ServiceKind::Postgres => &["POSTGRES_"],
            ServiceKind::Mariadb => &["MYSQL_", "MARIADB_"],
        }
    }

    pub fn default_data_dir(&self) -> PathBuf {
        match self {
            ServiceKind::Postgres => PathBuf::from("/var/lib/postgresql/data"),
            ServiceKind::Mariadb => PathBuf::from("/var/lib/mysql"),
        }
    }

    pub fn default_socket_dir(&self) -> PathBuf {
        match self {
            ServiceKind::Postgres => PathBuf::from("/var/run/postgresql"),
            ServiceKind::Mariadb => PathBuf::from("/run/mysqld"),
        }
    }

    /// OS account (and group of the same name) the service runs as.
    pub fn default_account(&self) -> &'static str {
        match self {
            ServiceKind::Postgres => "postgres",
            ServiceKind::Mariadb => "mysql",
        }
    }

    /// Login the wrapped image falls back to when only a credential is declared.
    pub fn default_login(&self) -> Option<&'static str> {
        match self {
            ServiceKind::Postgres => Some("postgres"),
            ServiceKind::Mariadb => None,
        }
    }

    /// Whether an unset database name falls back to the login name.
    pub fn database_defaults_to_login(&self) -> bool {
        matches!(self, ServiceKind::Postgres)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
