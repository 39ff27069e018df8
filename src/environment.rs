use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Environment is the capability used to look up flag overrides by variable name.
///
/// The default implementation reads the process environment. Embedders that keep overrides
/// somewhere else, and tests that must not touch process-global state, can supply their own.
pub trait Environment: Send + Sync {
    /// Returns the variable's value, or `None` if it is not set.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads variables from the process environment. Values that are not valid unicode are treated
/// as unset.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables.
#[derive(Clone, Debug, Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<S, T> FromIterator<(S, T)> for MapEnvironment
where
    String: From<S>,
    String: From<T>,
{
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Environment for MapEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Env is a cheaply cloneable handle to a shared [Environment].
///
/// Every [crate::Flag] holds one so that overrides are re-read each time its value is requested.
#[derive(Clone)]
pub struct Env(Arc<dyn Environment>);

impl Env {
    pub fn new(environment: impl Environment + 'static) -> Self {
        Env(Arc::new(environment))
    }
}

impl Environment for Env {
    fn var(&self, name: &str) -> Option<String> {
        self.0.var(name)
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new(ProcessEnvironment)
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Env")
    }
}
