mod support;

use dbsteward::StewardError;
use dbsteward::accounts::ServiceIdentity;
use dbsteward::config::{DeclaredConfig, ServiceKind};
use dbsteward::reconciler::snapshot::{KEY_PASSWORD, KEY_USER, VOLATILE_KEYS};
use dbsteward::reconciler::{ReconcilePath, Reconciler, ReconcilerOptions};
use dbsteward_state::{PersistedState, PriorState};
use std::path::PathBuf;
use std::time::Duration;
use support::{FakeAccounts, FakeService};

fn reconciler(attempts: u32) -> Reconciler {
    Reconciler::new(ReconcilerOptions {
        data_dir: PathBuf::from("/var/lib/postgresql/data"),
        service_user: "postgres".to_string(),
        service_group: "postgres".to_string(),
        ready_attempts: attempts,
        ready_interval: Duration::from_millis(1),
        admin_role: None,
    })
}

fn declared_app() -> DeclaredConfig {
    let mut declared = DeclaredConfig::new(ServiceKind::Postgres);
    declared.user = Some("app".to_string());
    declared.password = Some("s3cret".to_string());
    declared.database = Some("appdb".to_string());
    declared.extensions = ["postgis", "pg_trgm"].into_iter().collect();
    declared
}

#[tokio::test]
async fn second_pass_with_same_declaration_changes_nothing() {
    let service = FakeService::initialized(&["postgis", "pg_trgm"]);
    let accounts = FakeAccounts::new(999, 999);
    let declared = declared_app();

    let first = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();
    assert_eq!(first.path, ReconcilePath::Reconciled);
    assert!(first.report.failures.is_empty());
    let first_state = first.new_state.unwrap();
    assert!(service.with(|s| s.mutations) > 0);

    service.reset_counters();
    let prior = PriorState::Present(first_state.clone());
    let second = reconciler(3)
        .reconcile(&declared, &prior, &service, &accounts)
        .await
        .unwrap();

    assert_eq!(second.path, ReconcilePath::Reconciled);
    assert_eq!(service.with(|s| s.mutations), 0);
    assert!(second.report.changed_keys.is_empty());
    let second_state = second.new_state.unwrap();
    assert!(
        first_state
            .changed_keys(&second_state, VOLATILE_KEYS)
            .is_empty()
    );
}

#[tokio::test]
async fn first_start_on_empty_store_is_deferred() {
    let service = FakeService::default();
    let accounts = FakeAccounts::new(999, 999);

    let outcome = reconciler(3)
        .reconcile(&declared_app(), &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert_eq!(outcome.path, ReconcilePath::Deferred);
    assert!(outcome.new_state.is_none());
    service.with(|s| {
        assert_eq!(s.starts, 0);
        assert!(s.statements.is_empty());
    });
}

#[tokio::test]
async fn absent_record_on_initialized_store_is_adopted() {
    let service = FakeService::initialized(&["postgis", "pg_trgm"]);
    let accounts = FakeAccounts::new(999, 999);

    let outcome = reconciler(3)
        .reconcile(&declared_app(), &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert_eq!(outcome.path, ReconcilePath::Reconciled);
    assert!(service.authenticates("app", "s3cret"));
    assert!(service.extension_enabled(Some("appdb"), "postgis"));
    assert_eq!(
        outcome.report.changed_keys,
        vec!["DATABASE", "EXTENSIONS", "PASSWORD_SHA256", "SERVICE", "USER"]
    );
}

#[tokio::test]
async fn skip_update_touches_nothing() {
    let service = FakeService::initialized(&["postgis"]);
    let accounts = FakeAccounts::new(999, 999);
    let mut declared = declared_app();
    declared.skip_update = true;

    let outcome = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert_eq!(outcome.path, ReconcilePath::Skipped);
    assert!(outcome.new_state.is_none());
    service.with(|s| {
        assert_eq!(s.starts, 0);
        assert!(s.statements.is_empty());
    });
    assert_eq!(accounts.with(|s| s.calls), 0);
}

#[tokio::test]
async fn skip_update_still_converges_identity() {
    let service = FakeService::initialized(&[]);
    let accounts = FakeAccounts::new(999, 999);
    let mut declared = DeclaredConfig::new(ServiceKind::Postgres);
    declared.skip_update = true;
    declared.puid = Some(1000);

    let outcome = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert_eq!(outcome.path, ReconcilePath::Skipped);
    assert_eq!(accounts.identity(), ServiceIdentity::new(1000, 999));
    assert_eq!(service.with(|s| s.starts), 0);
}

#[tokio::test]
async fn failing_extension_does_not_block_the_rest() {
    let service = FakeService::initialized(&["postgis", "pg_trgm"]);
    let accounts = FakeAccounts::new(999, 999);
    let mut declared = declared_app();
    declared.extensions = ["postgis", "no_such_ext", "pg_trgm"].into_iter().collect();

    let outcome = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert_eq!(outcome.path, ReconcilePath::Reconciled);
    assert!(outcome.new_state.is_some());
    assert_eq!(outcome.report.failures.len(), 1);
    assert!(outcome.report.failed("enable_extension", "no_such_ext"));
    let state = outcome.new_state.as_ref().unwrap();
    assert_eq!(state.get("EXTENSIONS"), Some("postgis,no_such_ext,pg_trgm"));
    assert!(service.extension_enabled(Some("appdb"), "postgis"));
    assert!(service.extension_enabled(Some("appdb"), "pg_trgm"));
}

#[tokio::test]
async fn declared_ids_are_applied_and_data_reowned() {
    let service = FakeService::initialized(&[]);
    let accounts = FakeAccounts::new(999, 999);
    let mut declared = DeclaredConfig::new(ServiceKind::Postgres);
    declared.puid = Some(1000);
    declared.pgid = Some(1000);

    let outcome = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    let target = ServiceIdentity::new(1000, 1000);
    assert_eq!(accounts.identity(), target);
    assert!(outcome.report.identity.account_updated);
    assert_eq!(outcome.report.identity.before, Some(ServiceIdentity::new(999, 999)));
    assert_eq!(outcome.report.identity.after, Some(target));
    assert_eq!(outcome.report.identity.entries_reowned, 3);
    accounts.with(|s| {
        assert_eq!(
            s.chowns,
            vec![(PathBuf::from("/var/lib/postgresql/data"), target)]
        );
    });
}

#[tokio::test]
async fn matching_ids_with_foreign_data_owner_still_reown() {
    let service = FakeService::initialized(&[]);
    let accounts = FakeAccounts::new(1000, 1000);
    accounts.with(|s| s.data_owner = ServiceIdentity::new(0, 0));
    let mut declared = DeclaredConfig::new(ServiceKind::Postgres);
    declared.puid = Some(1000);

    let outcome = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert!(!outcome.report.identity.account_updated);
    assert_eq!(accounts.with(|s| s.chowns.len()), 1);
}

#[tokio::test]
async fn identity_failures_are_recorded_and_tolerated() {
    let service = FakeService::initialized(&[]);
    let accounts = FakeAccounts::new(999, 999);
    accounts.with(|s| s.fail_set_uid = true);
    let mut declared = declared_app();
    declared.extensions = Default::default();
    declared.puid = Some(1000);
    declared.pgid = Some(1000);

    let outcome = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert_eq!(outcome.path, ReconcilePath::Reconciled);
    assert!(outcome.report.failed("uid", "postgres"));
    assert_eq!(accounts.identity(), ServiceIdentity::new(999, 1000));
    assert_eq!(
        outcome.report.identity.after,
        Some(ServiceIdentity::new(999, 1000))
    );
}

#[tokio::test]
async fn changed_password_replaces_the_old_one() {
    let service = FakeService::initialized(&["postgis", "pg_trgm"]);
    let accounts = FakeAccounts::new(999, 999);
    let mut declared = declared_app();

    let first = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();
    let prior = PriorState::Present(first.new_state.unwrap());

    declared.password = Some("rotated".to_string());
    let second = reconciler(3)
        .reconcile(&declared, &prior, &service, &accounts)
        .await
        .unwrap();

    assert!(service.authenticates("app", "rotated"));
    assert!(!service.authenticates("app", "s3cret"));
    assert_eq!(second.report.changed_keys, vec![KEY_PASSWORD.to_string()]);
    let stored = second.new_state.unwrap();
    assert!(!stored.iter().any(|(_, value)| value.contains("rotated")));
}

#[tokio::test]
async fn readiness_timeout_is_fatal_and_runs_no_statements() {
    let service = FakeService::initialized(&["postgis"]);
    service.with(|s| s.never_ready = true);
    let accounts = FakeAccounts::new(999, 999);

    let err = reconciler(4)
        .reconcile(&declared_app(), &PriorState::Absent, &service, &accounts)
        .await
        .unwrap_err();

    assert!(matches!(err, StewardError::NotReady { attempts: 4 }));
    service.with(|s| {
        assert_eq!(s.ready_polls, 4);
        assert!(s.statements.is_empty());
        assert_eq!(s.stops, 1);
    });
}

#[tokio::test]
async fn admin_start_failure_is_fatal() {
    let service = FakeService::initialized(&[]);
    service.with(|s| s.fail_start = true);
    let accounts = FakeAccounts::new(999, 999);

    let err = reconciler(3)
        .reconcile(&declared_app(), &PriorState::Absent, &service, &accounts)
        .await
        .unwrap_err();

    assert!(matches!(err, StewardError::AdminStart(_)));
    assert_eq!(service.with(|s| s.ready_polls), 0);
}

#[tokio::test]
async fn failed_stop_withholds_the_new_state() {
    let service = FakeService::initialized(&["postgis", "pg_trgm"]);
    service.with(|s| s.fail_stop = true);
    let accounts = FakeAccounts::new(999, 999);

    let outcome = reconciler(3)
        .reconcile(&declared_app(), &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert_eq!(outcome.path, ReconcilePath::StopFailed);
    assert!(outcome.new_state.is_none());
    assert!(outcome.report.failed("stop", "postgres"));
    assert!(service.authenticates("app", "s3cret"));
}

#[tokio::test]
async fn conflicting_extension_is_disabled_not_enabled() {
    let service = FakeService::initialized(&["postgis", "hstore"]);
    let accounts = FakeAccounts::new(999, 999);
    let mut declared = declared_app();
    declared.extensions = ["postgis", "hstore"].into_iter().collect();
    declared.disable_extensions = ["hstore"].into_iter().collect();
    service.with(|s| {
        s.extensions
            .entry(Some("appdb".to_string()))
            .or_default()
            .insert("hstore".to_string());
    });

    let outcome = reconciler(3)
        .reconcile(&declared, &PriorState::Absent, &service, &accounts)
        .await
        .unwrap();

    assert!(service.extension_enabled(Some("appdb"), "postgis"));
    assert!(!service.extension_enabled(Some("appdb"), "hstore"));
    let state = outcome.new_state.unwrap();
    assert_eq!(state.get("EXTENSIONS"), Some("postgis"));
    assert_eq!(state.get("DISABLE_EXTENSIONS"), Some("hstore"));
}

#[tokio::test]
async fn corrupt_prior_record_triggers_a_full_pass() {
    let service = FakeService::initialized(&[]);
    let accounts = FakeAccounts::new(999, 999);
    let mut declared = DeclaredConfig::new(ServiceKind::Postgres);
    declared.user = Some("app".to_string());

    let outcome = reconciler(3)
        .reconcile(
            &declared,
            &PriorState::Present(PersistedState::new()),
            &service,
            &accounts,
        )
        .await
        .unwrap();

    assert_eq!(outcome.path, ReconcilePath::Reconciled);
    assert_eq!(outcome.new_state.unwrap().get(KEY_USER), Some("app"));
}
