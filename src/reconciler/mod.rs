//! The per-start reconciliation state machine.
//!
//! Identity convergence always runs first. Then either the pass is skipped,
//! deferred to the image's own first boot, or run against the service in
//! administrative mode.

mod readiness;
mod report;
pub mod snapshot;

pub use report::{AppliedStep, IdentityReport, ReconcilePath, ReconcileReport, StepFailure};

use chrono::Utc;
use dbsteward_state::{PersistedState, PriorState};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::accounts::AccountDirectory;
use crate::config::{DeclaredConfig, ServiceKind, Settings};
use crate::controller::{AdminStatement, Credential, ServiceController};
use crate::error::StewardError;
use crate::utils::logging::with_pretty_json_debug;

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub data_dir: PathBuf,
    pub service_user: String,
    pub service_group: String,
    pub ready_attempts: u32,
    pub ready_interval: Duration,
    /// Privileged role administrative statements run as, when the service
    /// has one. Recorded so later passes keep using it.
    pub admin_role: Option<String>,
}

impl ReconcilerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            data_dir: settings.data_dir(),
            service_user: settings.service_user().to_string(),
            service_group: settings.service_group().to_string(),
            ready_attempts: settings.ready_attempts,
            ready_interval: settings.ready_interval(),
            admin_role: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub path: ReconcilePath,
    /// Record to persist. Present only when the pass completed and the
    /// administrative instance stopped cleanly.
    pub new_state: Option<PersistedState>,
    pub report: ReconcileReport,
}

pub struct Reconciler {
    options: ReconcilerOptions,
}

impl Reconciler {
    pub fn new(options: ReconcilerOptions) -> Self {
        Self { options }
    }

    pub async fn reconcile(
        &self,
        declared: &DeclaredConfig,
        prior: &PriorState,
        controller: &dyn ServiceController,
        accounts: &dyn AccountDirectory,
    ) -> Result<ReconcileOutcome, StewardError> {
        let span = info_span!("dbsteward", service = %declared.service);
        async move {
            let mut report = ReconcileReport::default();
            self.converge_identity(declared, accounts, &mut report).await;

            if declared.skip_update {
                info!("SKIP_UPDATE set; leaving the service untouched");
                return Ok(finish(ReconcilePath::Skipped, None, report));
            }

            if prior.is_absent() && !controller.data_store_initialized() {
                info!("first start on an empty data store; deferring to the image's initialization");
                return Ok(finish(ReconcilePath::Deferred, None, report));
            }

            self.run_pass(declared, prior, controller, report).await
        }
        .instrument(span)
        .await
    }

    async fn converge_identity(
        &self,
        declared: &DeclaredConfig,
        accounts: &dyn AccountDirectory,
        report: &mut ReconcileReport,
    ) {
        if !declared.declares_identity() {
            return;
        }
        let user = self.options.service_user.as_str();
        let group = self.options.service_group.as_str();

        let current = match accounts.lookup(user, group).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(user, group, error = %e, "cannot look up service account; skipping UID/GID convergence");
                report.record_failure("identity", user, e);
                return;
            }
        };
        let desired = current.with_overrides(declared.puid, declared.pgid);
        let mut effective = current;

        if desired.gid != current.gid {
            match accounts.set_gid(group, desired.gid).await {
                Ok(()) => {
                    info!(group, from = current.gid, to = desired.gid, "group id updated");
                    effective.gid = desired.gid;
                    report.identity.account_updated = true;
                }
                Err(e) => {
                    warn!(group, gid = desired.gid, error = %e, "failed to update group id");
                    report.record_failure("gid", group, e);
                }
            }
        }
        if desired.uid != current.uid {
            match accounts.set_uid(user, desired.uid).await {
                Ok(()) => {
                    info!(user, from = current.uid, to = desired.uid, "user id updated");
                    effective.uid = desired.uid;
                    report.identity.account_updated = true;
                }
                Err(e) => {
                    warn!(user, uid = desired.uid, error = %e, "failed to update user id");
                    report.record_failure("uid", user, e);
                }
            }
        }
        report.identity.before = Some(current);
        report.identity.after = Some(effective);

        let data_dir = self.options.data_dir.as_path();
        let needs_chown = report.identity.account_updated
            || match accounts.owner_of(data_dir).await {
                Ok(owner) => owner != effective,
                Err(e) => {
                    debug!(path = %data_dir.display(), error = %e, "cannot read data directory owner");
                    false
                }
            };
        if !needs_chown {
            return;
        }

        match accounts.chown_tree(data_dir, effective).await {
            Ok(changed) => {
                info!(path = %data_dir.display(), owner = %effective, entries = changed, "data directory re-owned");
                report.identity.entries_reowned = changed;
            }
            Err(e) => {
                warn!(path = %data_dir.display(), owner = %effective, error = %e, "failed to re-own data directory");
                report.record_failure("ownership", &data_dir.display().to_string(), e);
            }
        }
    }

    async fn run_pass(
        &self,
        declared: &DeclaredConfig,
        prior: &PriorState,
        controller: &dyn ServiceController,
        mut report: ReconcileReport,
    ) -> Result<ReconcileOutcome, StewardError> {
        for name in declared.conflicting_extensions() {
            warn!(extension = name, "listed for both enable and disable; it will be disabled");
        }

        controller.start_admin().await.map_err(|e| {
            error!(error = %e, "failed to start administrative mode");
            StewardError::AdminStart(e)
        })?;

        let attempts = match readiness::wait_until_ready(
            controller,
            self.options.ready_attempts,
            self.options.ready_interval,
        )
        .await
        {
            Ok(attempts) => attempts,
            Err(e) => {
                error!(error = %e, "administrative mode never became ready");
                if let Err(stop) = controller.stop_admin().await {
                    warn!(error = %stop, "best-effort stop after readiness timeout failed");
                }
                return Err(e);
            }
        };
        debug!(attempts, "administrative mode ready");
        report.ready_after_attempts = Some(attempts);

        for statement in plan(declared) {
            match controller.run_admin_statement(&statement).await {
                Ok(()) => {
                    debug!(step = statement.step(), subject = statement.subject(), "applied");
                    report.record_applied(statement.step(), statement.subject());
                }
                Err(e) => {
                    warn!(step = statement.step(), subject = statement.subject(), error = %e, "statement failed; continuing");
                    report.record_failure(statement.step(), statement.subject(), e);
                }
            }
        }

        if let Err(e) = controller.stop_admin().await {
            error!(error = %e, "failed to stop administrative mode; state will not be recorded");
            report.record_failure("stop", declared.service.as_str(), e);
            return Ok(finish(ReconcilePath::StopFailed, None, report));
        }

        let new_state = snapshot::snapshot(declared, self.options.admin_role.as_deref(), Utc::now());
        report.changed_keys = log_changes(prior, &new_state);
        Ok(finish(ReconcilePath::Reconciled, Some(new_state), report))
    }
}

/// Statements of one pass, in application order.
pub fn plan(declared: &DeclaredConfig) -> Vec<AdminStatement> {
    let mut plan = Vec::new();
    let login = declared.login();

    if let Some(name) = login {
        plan.push(AdminStatement::EnsureLogin {
            name: name.to_string(),
            password: declared.password.clone().map(Credential::new),
        });
    }

    let database = declared.target_database();
    if let Some(name) = database {
        plan.push(AdminStatement::EnsureDatabase {
            name: name.to_string(),
            owner: login.map(str::to_string),
        });
    }

    // Postgres extensions live per database; MariaDB plugins are server wide.
    let extension_db = match declared.service {
        ServiceKind::Postgres => database.map(str::to_string),
        ServiceKind::Mariadb => None,
    };
    plan.extend(
        declared
            .extensions_to_enable()
            .map(|name| AdminStatement::EnableExtension {
                name: name.to_string(),
                database: extension_db.clone(),
            }),
    );
    plan.extend(
        declared
            .disable_extensions
            .iter()
            .map(|name| AdminStatement::DisableExtension {
                name: name.to_string(),
                database: extension_db.clone(),
            }),
    );
    plan
}

fn log_changes(prior: &PriorState, new_state: &PersistedState) -> Vec<String> {
    let empty = PersistedState::new();
    let before = prior.as_record().unwrap_or(&empty);
    let changed: Vec<String> = before
        .changed_keys(new_state, snapshot::VOLATILE_KEYS)
        .into_iter()
        .map(str::to_string)
        .collect();

    if changed.is_empty() {
        info!("declared configuration unchanged since last start");
    }
    for key in &changed {
        info!(
            "{}",
            snapshot::describe_change(key, before.get(key), new_state.get(key))
        );
    }
    changed
}

fn finish(
    path: ReconcilePath,
    new_state: Option<PersistedState>,
    report: ReconcileReport,
) -> ReconcileOutcome {
    with_pretty_json_debug(&report, |json| {
        debug!(?path, report = %json, "reconcile report");
    });
    ReconcileOutcome {
        path,
        new_state,
        report,
    }
}
