use serde::Serialize;
use std::fmt;

use crate::config::ServiceKind;

/// A login credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One idempotent administrative step. Bindings render it for their dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdminStatement {
    /// Create the login if absent, otherwise reset its credential.
    EnsureLogin {
        name: String,
        #[serde(skip)]
        password: Option<Credential>,
    },
    /// Create the database if absent and grant `owner` full rights on it.
    EnsureDatabase { name: String, owner: Option<String> },
    /// Enable an extension (postgres) or plugin (mariadb).
    EnableExtension {
        name: String,
        database: Option<String>,
    },
    /// Remove an extension, cascading to dependent objects.
    DisableExtension {
        name: String,
        database: Option<String>,
    },
}

impl AdminStatement {
    pub fn step(&self) -> &'static str {
        match self {
            AdminStatement::EnsureLogin { .. } => "login",
            AdminStatement::EnsureDatabase { .. } => "database",
            AdminStatement::EnableExtension { .. } => "enable_extension",
            AdminStatement::DisableExtension { .. } => "disable_extension",
        }
    }

    /// Name of the object the statement acts on.
    pub fn subject(&self) -> &str {
        match self {
            AdminStatement::EnsureLogin { name, .. }
            | AdminStatement::EnsureDatabase { name, .. }
            | AdminStatement::EnableExtension { name, .. }
            | AdminStatement::DisableExtension { name, .. } => name,
        }
    }

    /// Query whose output is `1` when the statement has nothing to do.
    /// Only needed where the dialect lacks an `IF NOT EXISTS` form.
    pub fn precheck(&self, service: ServiceKind) -> Option<String> {
        match (service, self) {
            (ServiceKind::Mariadb, AdminStatement::EnableExtension { name, .. }) => Some(format!(
                "SELECT 1 FROM information_schema.PLUGINS WHERE PLUGIN_LIBRARY = {} LIMIT 1;\n",
                my_literal(&format!("{name}.so"))
            )),
            _ => None,
        }
    }

    pub fn render(&self, service: ServiceKind) -> String {
        match service {
            ServiceKind::Postgres => self.render_postgres(),
            ServiceKind::Mariadb => self.render_mariadb(),
        }
    }

    fn render_postgres(&self) -> String {
        match self {
            AdminStatement::EnsureLogin { name, password } => {
                let options = match password {
                    Some(password) => format!("LOGIN PASSWORD {}", pg_literal(password.expose())),
                    None => "LOGIN".to_string(),
                };
                let body = format!(
                    "\nBEGIN\n  IF EXISTS (SELECT FROM pg_catalog.pg_roles WHERE rolname = {lit}) THEN\n    ALTER ROLE {ident} WITH {options};\n  ELSE\n    CREATE ROLE {ident} WITH {options};\n  END IF;\nEND\n",
                    lit = pg_literal(name),
                    ident = pg_ident(name),
                );
                format!("DO {};\n", dollar_quote(&body))
            }
            AdminStatement::EnsureDatabase { name, owner } => {
                let owner_clause = owner
                    .as_deref()
                    .map(|o| format!(" || ' OWNER ' || quote_ident({})", pg_literal(o)))
                    .unwrap_or_default();
                let mut script = format!(
                    "SELECT 'CREATE DATABASE ' || quote_ident({lit}){owner_clause} WHERE NOT EXISTS (SELECT FROM pg_catalog.pg_database WHERE datname = {lit})\\gexec\n",
                    lit = pg_literal(name),
                );
                if let Some(owner) = owner {
                    script.push_str(&format!(
                        "GRANT ALL PRIVILEGES ON DATABASE {} TO {};\n",
                        pg_ident(name),
                        pg_ident(owner)
                    ));
                    script.push_str(&format!("\\connect {}\n", pg_ident(name)));
                    script.push_str(&format!(
                        "GRANT ALL ON SCHEMA public TO {};\n",
                        pg_ident(owner)
                    ));
                }
                script
            }
            AdminStatement::EnableExtension { name, database } => format!(
                "{}CREATE EXTENSION IF NOT EXISTS {} CASCADE;\n",
                pg_connect(database.as_deref()),
                pg_ident(name)
            ),
            AdminStatement::DisableExtension { name, database } => format!(
                "{}DROP EXTENSION IF EXISTS {} CASCADE;\n",
                pg_connect(database.as_deref()),
                pg_ident(name)
            ),
        }
    }

    fn render_mariadb(&self) -> String {
        match self {
            AdminStatement::EnsureLogin { name, password } => {
                let account = format!("{}@'%'", my_literal(name));
                match password {
                    Some(password) => {
                        let secret = my_literal(password.expose());
                        format!(
                            "CREATE USER IF NOT EXISTS {account} IDENTIFIED BY {secret};\nALTER USER {account} IDENTIFIED BY {secret};\nFLUSH PRIVILEGES;\n"
                        )
                    }
                    None => format!("CREATE USER IF NOT EXISTS {account};\nFLUSH PRIVILEGES;\n"),
                }
            }
            AdminStatement::EnsureDatabase { name, owner } => {
                let mut script = format!("CREATE DATABASE IF NOT EXISTS {};\n", my_ident(name));
                if let Some(owner) = owner {
                    // `_` and `%` are wildcards in database-level grants.
                    let grant_target = my_ident(&name.replace('_', "\\_").replace('%', "\\%"));
                    script.push_str(&format!(
                        "GRANT ALL PRIVILEGES ON {grant_target}.* TO {}@'%';\nFLUSH PRIVILEGES;\n",
                        my_literal(owner)
                    ));
                }
                script
            }
            AdminStatement::EnableExtension { name, .. } => {
                format!("INSTALL SONAME {};\n", my_literal(name))
            }
            AdminStatement::DisableExtension { name, .. } => {
                format!("UNINSTALL SONAME IF EXISTS {};\n", my_literal(name))
            }
        }
    }
}

impl fmt::Display for AdminStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminStatement::EnsureLogin { name, .. } => write!(f, "ensure login `{name}`"),
            AdminStatement::EnsureDatabase { name, .. } => write!(f, "ensure database `{name}`"),
            AdminStatement::EnableExtension { name, .. } => write!(f, "enable extension `{name}`"),
            AdminStatement::DisableExtension { name, .. } => {
                write!(f, "disable extension `{name}`")
            }
        }
    }
}

fn pg_connect(database: Option<&str>) -> String {
    database
        .map(|db| format!("\\connect {}\n", pg_ident(db)))
        .unwrap_or_default()
}

fn pg_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn pg_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Dollar-quotes `body` with a tag that does not occur inside it.
fn dollar_quote(body: &str) -> String {
    let mut tag = String::from("$dbsteward$");
    let mut n = 0u32;
    while body.contains(&tag) {
        n += 1;
        tag = format!("$dbsteward{n}$");
    }
    format!("{tag}{body}{tag}")
}

fn my_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn my_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
