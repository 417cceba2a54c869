use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use super::{
    AdminStatement, Credential, ServiceController, Tool, prepare_socket_dir, resolve_identity,
};
use crate::accounts::{ServiceIdentity, SystemAccounts};
use crate::config::{ServiceKind, Settings};
use crate::error::CommandError;

const SERVER: &str = "mariadbd";
const CLIENT: &str = "mariadb";
const ADMIN: &str = "mariadb-admin";

/// How long the server may take to exit after `shutdown`.
const STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives a MariaDB server started in the background with networking
/// disabled; statements go through the `mariadb` client over the socket.
pub struct MariadbController {
    data_dir: PathBuf,
    socket_dir: PathBuf,
    user: String,
    group: String,
    root_password: Option<Credential>,
    accounts: SystemAccounts,
    identity: OnceCell<Option<ServiceIdentity>>,
    server: Mutex<Option<Child>>,
}

impl MariadbController {
    pub fn new(settings: &Settings, root_password: Option<Credential>) -> Self {
        Self {
            data_dir: settings.data_dir(),
            socket_dir: settings.socket_dir(),
            user: settings.service_user().to_string(),
            group: settings.service_group().to_string(),
            root_password,
            accounts: SystemAccounts::default(),
            identity: OnceCell::new(),
            server: Mutex::new(None),
        }
    }

    fn socket(&self) -> PathBuf {
        self.socket_dir.join("mysqld.sock")
    }

    async fn identity(&self) -> Option<ServiceIdentity> {
        *self
            .identity
            .get_or_init(|| resolve_identity(&self.accounts, &self.user, &self.group))
            .await
    }

    /// Client tool authenticated as root over the admin socket.
    fn client(&self, program: &str) -> Tool {
        let tool = Tool::new(program)
            .arg("--protocol=socket")
            .arg(format!("--socket={}", self.socket().display()))
            .arg("--user=root");
        match &self.root_password {
            Some(password) => tool.env("MYSQL_PWD", password.expose()),
            None => tool,
        }
    }

    async fn query(&self, sql: String) -> Result<String, CommandError> {
        self.client(CLIENT)
            .args(["--batch", "--skip-column-names"])
            .stdin(sql)
            .output()
            .await
    }
}

#[async_trait]
impl ServiceController for MariadbController {
    fn data_store_initialized(&self) -> bool {
        self.data_dir.join("mysql").is_dir()
    }

    async fn start_admin(&self) -> Result<(), CommandError> {
        let identity = self.identity().await;
        prepare_socket_dir(&self.socket_dir, identity);

        let child = Tool::new(SERVER)
            .arg(format!("--user={}", self.user))
            .arg(format!("--datadir={}", self.data_dir.display()))
            .arg("--skip-networking")
            .arg(format!("--socket={}", self.socket().display()))
            .spawn()?;
        *self.server.lock().await = Some(child);
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        {
            let mut server = self.server.lock().await;
            let Some(child) = server.as_mut() else {
                return false;
            };
            if let Ok(Some(status)) = child.try_wait() {
                warn!(%status, "administrative server exited before becoming ready");
                return false;
            }
        }
        self.client(ADMIN)
            .args(["--silent", "ping"])
            .output()
            .await
            .is_ok()
    }

    async fn run_admin_statement(&self, statement: &AdminStatement) -> Result<(), CommandError> {
        if let Some(check) = statement.precheck(ServiceKind::Mariadb) {
            if self.query(check).await?.trim() == "1" {
                debug!(%statement, "already satisfied");
                return Ok(());
            }
        }
        self.query(statement.render(ServiceKind::Mariadb)).await?;
        Ok(())
    }

    async fn stop_admin(&self) -> Result<(), CommandError> {
        let Some(mut child) = self.server.lock().await.take() else {
            return Err(CommandError::NotRunning {
                program: SERVER.to_string(),
            });
        };

        if let Err(e) = self.client(ADMIN).arg("shutdown").output().await {
            warn!(error = %e, "shutdown request failed; killing administrative server");
            let _ = child.kill().await;
            return Err(e);
        }

        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(CommandError::Exit {
                program: SERVER.to_string(),
                code: status.code(),
                stderr: String::new(),
            }),
            Ok(Err(source)) => Err(CommandError::Spawn {
                program: SERVER.to_string(),
                source,
            }),
            Err(_) => {
                let _ = child.kill().await;
                Err(CommandError::Exit {
                    program: SERVER.to_string(),
                    code: None,
                    stderr: format!("did not exit within {}s", STOP_TIMEOUT.as_secs()),
                })
            }
        }
    }
}
