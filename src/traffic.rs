use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;

/// The kind of subject that flags are resolved for. The server groups its response by this
/// value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficType {
    Entity,
    User,
    Account,
}

impl TrafficType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficType::Entity => "entity",
            TrafficType::User => "user",
            TrafficType::Account => "account",
        }
    }
}

impl fmt::Display for TrafficType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the `keys` query parameter.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MatchingKey<'a> {
    pub matching_key: &'a AttributeValue,
    pub traffic_type: TrafficType,
}
