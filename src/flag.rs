use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::environment::{Env, Environment};
use crate::flag_value::FlagValue;

/// Prefix of the environment variable that overrides a flag's treatment.
pub const OVERRIDE_PREFIX: &str = "FEATURE_FLAG_";

/// Name of the override variable for `key`. The key is appended verbatim.
pub fn override_name(key: &str) -> String {
    format!("{}{}", OVERRIDE_PREFIX, key)
}

/// One flag's resolved state as returned by the server.
///
/// A Flag only stores the raw treatment and raw configuration text. Both [Flag::value] and
/// [Flag::config] are derived on every call, and [Flag::value] consults the override variable
/// each time, so an override set after the flag was fetched still applies.
#[derive(Clone, Debug)]
pub struct Flag {
    key: String,
    raw_value: Option<String>,
    raw_config: String,
    env: Env,
}

impl Flag {
    /// Create a flag that reads overrides from the process environment.
    pub fn new(
        key: impl Into<String>,
        raw_value: Option<String>,
        raw_config: impl Into<String>,
    ) -> Self {
        Self::with_env(key, raw_value, raw_config, Env::default())
    }

    pub fn with_env(
        key: impl Into<String>,
        raw_value: Option<String>,
        raw_config: impl Into<String>,
        env: Env,
    ) -> Self {
        Self {
            key: key.into(),
            raw_value,
            raw_config: raw_config.into(),
            env,
        }
    }

    /// A flag with no treatment and no configuration, used for keys the server did not return.
    pub fn placeholder(key: impl Into<String>, env: Env) -> Self {
        Self::with_env(key, None, String::new(), env)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn raw_value(&self) -> Option<&str> {
        self.raw_value.as_deref()
    }

    pub fn raw_config(&self) -> &str {
        &self.raw_config
    }

    pub fn value(&self) -> Option<FlagValue> {
        resolve_value(&self.key, self.raw_value.as_deref(), &self.env)
    }

    pub fn config(&self) -> Option<FlagConfig> {
        resolve_config(&self.raw_config)
    }

    /// Shorthand for a flag whose value is the boolean `on` treatment.
    pub fn is_on(&self) -> bool {
        self.value().map(|v| v.is_on()).unwrap_or(false)
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.raw_value == other.raw_value
            && self.raw_config == other.raw_config
    }
}

/// Resolve a treatment into its typed value.
///
/// An override variable for `key` replaces `raw_value` entirely when it is set. Empty strings,
/// whether from the server or from the override, resolve to `None`.
pub fn resolve_value(
    key: &str,
    raw_value: Option<&str>,
    env: &(impl Environment + ?Sized),
) -> Option<FlagValue> {
    let value = match env.var(&override_name(key)) {
        Some(overridden) => overridden,
        None => raw_value?.to_owned(),
    };

    if value.is_empty() {
        return None;
    }
    Some(FlagValue::from_treatment(value))
}

/// The configuration payload attached to a treatment.
#[derive(Clone, Debug, PartialEq)]
pub enum FlagConfig {
    /// The configuration text was valid JSON.
    Json(Value),
    /// The configuration text was not JSON and is returned verbatim.
    Raw(String),
}

impl FlagConfig {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FlagConfig::Json(v) => Some(v),
            FlagConfig::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            FlagConfig::Raw(s) => Some(s),
            FlagConfig::Json(_) => None,
        }
    }

    /// Deserialize a JSON configuration into a caller-defined type.
    ///
    /// Raw configurations are offered to `T` as a JSON string.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            FlagConfig::Json(v) => T::deserialize(v),
            FlagConfig::Raw(s) => T::deserialize(Value::String(s.clone())),
        }
    }
}

/// Strictly parse configuration text as JSON.
pub fn parse_config(raw_config: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(raw_config)
}

/// Resolve configuration text. Never fails: text that is not JSON comes back as
/// [FlagConfig::Raw], and empty text as `None`.
pub fn resolve_config(raw_config: &str) -> Option<FlagConfig> {
    if raw_config.is_empty() {
        return None;
    }

    match parse_config(raw_config) {
        Ok(parsed) => Some(FlagConfig::Json(parsed)),
        Err(_) => Some(FlagConfig::Raw(raw_config.to_owned())),
    }
}
