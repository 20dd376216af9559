use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::category::CategoryCode;

/// Stable identity of an event, used as the diff key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventId(pub u64);

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Published files carry the ID either as a number or a numeric string.
        // Anything else fails the record, and with it the batch.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(EventId(n)),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map(EventId)
                .map_err(|_| serde::de::Error::custom(format!("event ID '{s}' is not numeric"))),
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One georeferenced, categorized event. Immutable once loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "ID")]
    pub id: EventId,
    #[serde(rename = "Actor1", default)]
    pub actor1: Option<String>,
    #[serde(rename = "Actor2", default)]
    pub actor2: Option<String>,
    #[serde(rename = "CategoryCode", alias = "QuadClass")]
    pub category: CategoryCode,
    #[serde(rename = "Lat")]
    pub lat: f64,
    #[serde(rename = "Long")]
    pub long: f64,
    /// Remaining source columns, kept for tooltips and custom masks.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventRecord {
    pub fn new(id: u64, category: CategoryCode, lat: f64, long: f64) -> Self {
        Self {
            id: EventId(id),
            actor1: None,
            actor2: None,
            category,
            lat,
            long,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_actors(mut self, actor1: &str, actor2: &str) -> Self {
        self.actor1 = Some(actor1.to_string()).filter(|a| !a.is_empty());
        self.actor2 = Some(actor2.to_string()).filter(|a| !a.is_empty());
        self
    }

    pub fn actors(&self) -> impl Iterator<Item = &str> {
        [self.actor1.as_deref(), self.actor2.as_deref()]
            .into_iter()
            .flatten()
            .filter(|a| !a.is_empty())
    }

    /// True when both records name at least one common actor.
    pub fn shares_actor(&self, other: &EventRecord) -> bool {
        self.actors().any(|a| other.actors().any(|b| a == b))
    }
}

/// The memoized, immutable batch resolved for one timestamp.
pub type Batch = Arc<[EventRecord]>;
