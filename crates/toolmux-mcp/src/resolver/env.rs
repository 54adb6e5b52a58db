//! Environment variable access, injectable for tests.

use std::ffi::OsString;

pub trait EnvProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<OsString>;

    /// Full host environment as UTF-8 pairs; non-UTF-8 entries are skipped.
    fn vars(&self) -> Vec<(String, String)>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl EnvProvider for SystemEnv {
    fn get(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }

    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MockEnv {
    vars: std::collections::BTreeMap<String, OsString>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockEnv {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl EnvProvider for MockEnv {
    fn get(&self, key: &str) -> Option<OsString> {
        self.vars.get(key).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .filter_map(|(k, v)| Some((k.clone(), v.clone().into_string().ok()?)))
            .collect()
    }
}
