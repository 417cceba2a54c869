use std::collections::BTreeMap;

use crate::error::StateError;

/// A flat key/value snapshot of the configuration that was last applied.
///
/// Keys are upper snake case (`[A-Z0-9_]+`). Values may hold any text;
/// backslashes and line breaks are escaped on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    entries: BTreeMap<String, String>,
}

impl PersistedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        debug_assert!(is_valid_key(&key), "invalid state key: {key}");
        self.entries.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys whose values differ between `self` and `other`, including keys
    /// present on only one side. Keys listed in `ignore` are skipped.
    pub fn changed_keys<'a>(&'a self, other: &'a PersistedState, ignore: &[&str]) -> Vec<&'a str> {
        let mut keys: Vec<&str> = self
            .entries
            .keys()
            .chain(other.entries.keys())
            .map(String::as_str)
            .filter(|key| !ignore.contains(key))
            .filter(|key| self.get(key) != other.get(key))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Renders the record in its on-disk form.
    pub fn render(&self) -> String {
        let mut out = String::from("# managed by dbsteward; rewritten after each reconciliation\n");
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(&escape(value));
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, StateError> {
        let mut state = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(StateError::Parse {
                    line,
                    reason: "expected KEY=value".to_string(),
                });
            };
            let key = key.trim_end();
            if !is_valid_key(key) {
                return Err(StateError::Parse {
                    line,
                    reason: format!("invalid key {key:?}"),
                });
            }
            let value = unescape(value).ok_or_else(|| StateError::Parse {
                line,
                reason: "dangling or unknown escape sequence".to_string(),
            })?;
            state.entries.insert(key.to_string(), value);
        }
        Ok(state)
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}
