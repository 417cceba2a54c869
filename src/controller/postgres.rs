use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::OnceCell;

use super::{AdminStatement, ServiceController, Streams, Tool, prepare_socket_dir, resolve_identity};
use crate::accounts::{ServiceIdentity, SystemAccounts};
use crate::config::{ServiceKind, Settings};
use crate::error::CommandError;

/// Database the administrative session connects to.
const ADMIN_DATABASE: &str = "postgres";

/// Drives a PostgreSQL cluster through `pg_ctl`, `pg_isready` and `psql`,
/// listening on the unix socket only.
pub struct PostgresController {
    data_dir: PathBuf,
    socket_dir: PathBuf,
    user: String,
    group: String,
    admin_role: String,
    accounts: SystemAccounts,
    identity: OnceCell<Option<ServiceIdentity>>,
}

impl PostgresController {
    pub fn new(settings: &Settings, admin_role: &str) -> Self {
        Self {
            data_dir: settings.data_dir(),
            socket_dir: settings.socket_dir(),
            user: settings.service_user().to_string(),
            group: settings.service_group().to_string(),
            admin_role: admin_role.to_string(),
            accounts: SystemAccounts::default(),
            identity: OnceCell::new(),
        }
    }

    /// Resolved lazily so the lookup sees the UID/GID after convergence.
    async fn identity(&self) -> Option<ServiceIdentity> {
        *self
            .identity
            .get_or_init(|| resolve_identity(&self.accounts, &self.user, &self.group))
            .await
    }
}

#[async_trait]
impl ServiceController for PostgresController {
    fn data_store_initialized(&self) -> bool {
        self.data_dir.join("PG_VERSION").is_file()
    }

    async fn start_admin(&self) -> Result<(), CommandError> {
        let identity = self.identity().await;
        prepare_socket_dir(&self.socket_dir, identity);

        let server_options = format!(
            "-c listen_addresses='' -c unix_socket_directories='{}'",
            self.socket_dir.display()
        );
        Tool::new("pg_ctl")
            .arg("-D")
            .arg(&self.data_dir)
            .args(["-o", server_options.as_str(), "-W", "start"])
            .run_as(identity)
            .streams(Streams::Inherit)
            .output()
            .await?;
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        Tool::new("pg_isready")
            .arg("-q")
            .arg("-h")
            .arg(&self.socket_dir)
            .run_as(self.identity().await)
            .output()
            .await
            .is_ok()
    }

    async fn run_admin_statement(&self, statement: &AdminStatement) -> Result<(), CommandError> {
        Tool::new("psql")
            .args(["-v", "ON_ERROR_STOP=1", "--no-psqlrc", "--no-password", "--quiet"])
            .arg("-h")
            .arg(&self.socket_dir)
            .args(["-U", self.admin_role.as_str(), "-d", ADMIN_DATABASE, "-f", "-"])
            .run_as(self.identity().await)
            .stdin(statement.render(ServiceKind::Postgres))
            .output()
            .await?;
        Ok(())
    }

    async fn stop_admin(&self) -> Result<(), CommandError> {
        Tool::new("pg_ctl")
            .arg("-D")
            .arg(&self.data_dir)
            .args(["-m", "fast", "-w", "stop"])
            .run_as(self.identity().await)
            .output()
            .await?;
        Ok(())
    }
}
