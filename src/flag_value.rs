use log::warn;
use serde::{Deserialize, Deserializer, Serialize};

/// The typed form of a treatment.
///
/// The literal treatments `on`/`On`/`ON` and `off`/`Off`/`OFF` become [FlagValue::Bool]; every
/// other treatment is carried through unchanged as [FlagValue::Treatment]. An absent treatment is
/// represented by `None` wherever a `FlagValue` is returned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Treatment(String),
}

impl<'de> Deserialize<'de> for FlagValue {
    /// Strings go through [FlagValue::from_treatment], so `"ON"` reads back as `Bool(true)`.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Treatment(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => FlagValue::Bool(b),
            Raw::Treatment(t) => FlagValue::from_treatment(t),
        })
    }
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> FlagValue {
        FlagValue::Bool(b)
    }
}

impl From<String> for FlagValue {
    fn from(s: String) -> FlagValue {
        FlagValue::from_treatment(s)
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> FlagValue {
        FlagValue::from_treatment(s.to_owned())
    }
}

impl FlagValue {
    /// Map a raw treatment onto its typed form. Only the exact case variants listed on
    /// [FlagValue] are treated as booleans; `oN` stays a custom treatment.
    pub fn from_treatment(treatment: String) -> FlagValue {
        match treatment.as_str() {
            "on" | "On" | "ON" => FlagValue::Bool(true),
            "off" | "Off" | "OFF" => FlagValue::Bool(false),
            _ => FlagValue::Treatment(treatment),
        }
    }

    /// True only for a boolean `on` treatment.
    pub fn is_on(&self) -> bool {
        matches!(self, FlagValue::Bool(true))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => {
                warn!("treatment is not on/off but {:?}", self);
                None
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::Treatment(s) => Some(s),
            _ => {
                warn!("treatment is not a custom variant but {:?}", self);
                None
            }
        }
    }
}
