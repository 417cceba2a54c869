use chrono::{DateTime, SecondsFormat, Utc};
use dbsteward_state::PersistedState;
use sha2::{Digest, Sha256};

use crate::config::DeclaredConfig;

pub const KEY_SERVICE: &str = "SERVICE";
pub const KEY_USER: &str = "USER";
pub const KEY_PASSWORD: &str = "PASSWORD_SHA256";
pub const KEY_DATABASE: &str = "DATABASE";
pub const KEY_EXTENSIONS: &str = "EXTENSIONS";
pub const KEY_DISABLE_EXTENSIONS: &str = "DISABLE_EXTENSIONS";
pub const KEY_PUID: &str = "PUID";
pub const KEY_PGID: &str = "PGID";
pub const KEY_ADMIN_ROLE: &str = "ADMIN_ROLE";
pub const KEY_APPLIED_AT: &str = "APPLIED_AT";

/// Keys that change on every pass and carry no configuration.
pub const VOLATILE_KEYS: &[&str] = &[KEY_APPLIED_AT];

/// Record of what a pass applied. Keys without a declared value are omitted.
/// `admin_role` is the privileged role the pass connected as.
pub fn snapshot(
    declared: &DeclaredConfig,
    admin_role: Option<&str>,
    applied_at: DateTime<Utc>,
) -> PersistedState {
    let mut state = PersistedState::new();
    state.insert(KEY_SERVICE, declared.service.as_str());
    if let Some(role) = admin_role {
        state.insert(KEY_ADMIN_ROLE, role);
    }
    if let Some(login) = declared.login() {
        state.insert(KEY_USER, login);
    }
    if let Some(password) = &declared.password {
        state.insert(KEY_PASSWORD, fingerprint(password));
    }
    if let Some(database) = declared.target_database() {
        state.insert(KEY_DATABASE, database);
    }

    let enabled: Vec<&str> = declared.extensions_to_enable().collect();
    if !enabled.is_empty() {
        state.insert(KEY_EXTENSIONS, enabled.join(","));
    }
    if !declared.disable_extensions.is_empty() {
        state.insert(KEY_DISABLE_EXTENSIONS, declared.disable_extensions.joined());
    }
    if let Some(uid) = declared.puid {
        state.insert(KEY_PUID, uid.to_string());
    }
    if let Some(gid) = declared.pgid {
        state.insert(KEY_PGID, gid.to_string());
    }
    state.insert(
        KEY_APPLIED_AT,
        applied_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    state
}

/// Hex SHA-256 of a credential; the record never holds the credential itself.
pub fn fingerprint(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Human-readable diff line for one key. Credential fingerprints are
/// reported only as changed.
pub fn describe_change(key: &str, before: Option<&str>, after: Option<&str>) -> String {
    if key == KEY_PASSWORD {
        return format!("{key}: changed");
    }
    format!(
        "{key}: {} -> {}",
        before.unwrap_or("<unset>"),
        after.unwrap_or("<unset>")
    )
}
