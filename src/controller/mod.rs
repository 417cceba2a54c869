//! Administrative control of the wrapped database service.
//!
//! The reconciler only sees [`ServiceController`]; the bindings in this
//! module drive the service's own command-line tools.

mod command;
mod mariadb;
mod postgres;
mod statement;

pub(crate) use command::{Streams, Tool};
pub use mariadb::MariadbController;
pub use postgres::PostgresController;
pub use statement::{AdminStatement, Credential};

use async_trait::async_trait;
use std::path::Path;
use tracing::warn;

use crate::accounts::{AccountDirectory, ServiceIdentity, SystemAccounts};
use crate::config::{DeclaredConfig, ServiceKind, Settings};
use crate::error::CommandError;

#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Whether the service's own first-boot initialization has already run.
    fn data_store_initialized(&self) -> bool;

    /// Starts the service without a network listener.
    async fn start_admin(&self) -> Result<(), CommandError>;

    async fn is_ready(&self) -> bool;

    async fn run_admin_statement(&self, statement: &AdminStatement) -> Result<(), CommandError>;

    async fn stop_admin(&self) -> Result<(), CommandError>;
}

/// Builds the binding for the configured service.
///
/// `admin_role` is the postgres role used for administrative statements; it
/// must already exist (the superuser created by the image's first boot).
pub fn for_service(
    settings: &Settings,
    declared: &DeclaredConfig,
    admin_role: &str,
) -> Box<dyn ServiceController> {
    match settings.service {
        ServiceKind::Postgres => Box::new(PostgresController::new(settings, admin_role)),
        ServiceKind::Mariadb => Box::new(MariadbController::new(
            settings,
            declared.admin_password.clone().map(Credential::new),
        )),
    }
}

/// Resolves the account a binding runs its tools as. Falls back to the
/// current user when the account cannot be resolved.
async fn resolve_identity(
    accounts: &SystemAccounts,
    user: &str,
    group: &str,
) -> Option<ServiceIdentity> {
    match accounts.lookup(user, group).await {
        Ok(identity) => Some(identity),
        Err(e) => {
            warn!(user, group, error = %e, "cannot resolve service account; running tools as current user");
            None
        }
    }
}

/// Creates the socket directory and hands it to the service account.
fn prepare_socket_dir(dir: &Path, identity: Option<ServiceIdentity>) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(path = %dir.display(), error = %e, "failed to create socket directory");
        return;
    }
    if let Some(identity) = identity {
        if let Err(e) = std::os::unix::fs::chown(dir, Some(identity.uid), Some(identity.gid)) {
            warn!(path = %dir.display(), error = %e, "failed to re-own socket directory");
        }
    }
}
