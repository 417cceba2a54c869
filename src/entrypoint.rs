//! Wires settings, the state record, the service binding and the reconciler
//! together for one container start.

use dbsteward_state::{PersistedState, PriorState, StateFile};
use tracing::{error, info, warn};

use crate::accounts::{AccountDirectory, SystemAccounts};
use crate::config::{DeclaredConfig, ServiceKind, Settings};
use crate::controller::{self, ServiceController};
use crate::error::StewardError;
use crate::reconciler::{ReconcileOutcome, Reconciler, ReconcilerOptions, snapshot};

/// Role postgres statements run as unless configured otherwise.
const DEFAULT_ADMIN_ROLE: &str = "postgres";

/// Runs one reconciliation against the real service and system accounts.
pub async fn run(
    settings: &Settings,
    declared: &DeclaredConfig,
) -> Result<ReconcileOutcome, StewardError> {
    let state_file = StateFile::new(settings.state_path());
    let prior = load_prior(&state_file);
    let role = admin_role(settings, declared, &prior);
    let controller = controller::for_service(
        settings,
        declared,
        role.as_deref().unwrap_or(DEFAULT_ADMIN_ROLE),
    );
    let accounts = SystemAccounts::default();

    run_with(
        settings,
        declared,
        &state_file,
        prior,
        controller.as_ref(),
        &accounts,
    )
    .await
}

pub async fn run_with(
    settings: &Settings,
    declared: &DeclaredConfig,
    state_file: &StateFile,
    prior: PriorState,
    controller: &dyn ServiceController,
    accounts: &dyn AccountDirectory,
) -> Result<ReconcileOutcome, StewardError> {
    let mut options = ReconcilerOptions::from_settings(settings);
    options.admin_role = admin_role(settings, declared, &prior);
    let reconciler = Reconciler::new(options);
    let outcome = reconciler
        .reconcile(declared, &prior, controller, accounts)
        .await?;

    info!(path = ?outcome.path, applied = outcome.report.applied.len(), failed = outcome.report.failures.len(), "reconciliation finished");

    if let Some(state) = &outcome.new_state {
        persist(settings, state_file, state, accounts).await;
    }
    Ok(outcome)
}

/// Reads the prior record. An unreadable record means a full pass.
pub fn load_prior(state_file: &StateFile) -> PriorState {
    match state_file.load() {
        Ok(prior) => prior,
        Err(e) => {
            warn!(path = %state_file.path().display(), error = %e, "state record unreadable; reconciling from scratch");
            PriorState::Present(PersistedState::new())
        }
    }
}

/// Postgres role used for administrative statements: the configured admin
/// user, else the role recorded by the last pass, else the declared login
/// on an adopted volume (the image made it the superuser), else `postgres`.
///
/// The last applied `USER` is never used: logins created here carry no
/// superuser rights. `None` for services without an admin role.
pub fn admin_role(
    settings: &Settings,
    declared: &DeclaredConfig,
    prior: &PriorState,
) -> Option<String> {
    if declared.service != ServiceKind::Postgres {
        return None;
    }
    let role = settings
        .admin_user
        .as_deref()
        .or_else(|| {
            prior
                .as_record()
                .and_then(|record| record.get(snapshot::KEY_ADMIN_ROLE))
        })
        .or_else(|| prior.is_absent().then(|| declared.login()).flatten())
        .unwrap_or(DEFAULT_ADMIN_ROLE);
    Some(role.to_string())
}

async fn persist(
    settings: &Settings,
    state_file: &StateFile,
    state: &PersistedState,
    accounts: &dyn AccountDirectory,
) {
    let path = state_file.path();
    if let Err(e) = state_file.store(state) {
        error!(path = %path.display(), error = %e, "failed to record applied state; next start reconciles again");
        return;
    }
    info!(path = %path.display(), keys = state.len(), "applied state recorded");

    let owner = match accounts
        .lookup(settings.service_user(), settings.service_group())
        .await
    {
        Ok(owner) => owner,
        Err(e) => {
            warn!(error = %e, "cannot resolve service account; state record keeps its current owner");
            return;
        }
    };
    if let Err(e) = accounts.chown_tree(path, owner).await {
        warn!(path = %path.display(), owner = %owner, error = %e, "failed to re-own state record");
    }
}
