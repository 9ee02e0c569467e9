//! Observation envelope evaluated by the gating engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

use super::{TelemetryFrame, Value};

/// Contract version of the observation envelope.
pub const OBSERVATION_VERSION: &str = "v1";

/// A timestamped, tagged snapshot of simulator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default = "new_observation_id")]
    pub observation_id: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub payload: JsonValue,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub procedure_hint: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Top-level stable variables, consulted after `payload.vars`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, Value>,

    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
}

fn new_observation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_version() -> String {
    OBSERVATION_VERSION.to_string()
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, source: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            observation_id: new_observation_id(),
            timestamp,
            source: source.into(),
            payload,
            version: default_version(),
            procedure_hint: None,
            tags: Vec::new(),
            vars: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    /// Wrap a decoded telemetry frame. The frame becomes the payload, so its
    /// resolved variables are reachable as `payload.vars.<name>`.
    pub fn from_frame(frame: &TelemetryFrame, timestamp: DateTime<Utc>, gap: u64) -> Self {
        let payload = serde_json::to_value(frame).unwrap_or(JsonValue::Null);
        let mut observation = Self::new(timestamp, frame.source.clone(), payload);
        observation.metadata.insert("seq".into(), JsonValue::from(frame.seq));
        observation.metadata.insert("gap".into(), JsonValue::from(gap));
        observation.metadata.insert("delta_count".into(), JsonValue::from(frame.delta.len()));
        observation
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Resolve a dot-delimited path from the observation root.
    ///
    /// Returns `None` when any segment is missing or traverses a non-object.
    pub fn lookup(&self, path: &str) -> Option<JsonValue> {
        let mut parts = path.split('.');
        let head = parts.next()?;
        let root = match head {
            "payload" => return descend(&self.payload, parts),
            "metadata" => {
                let key = parts.next()?;
                return descend(self.metadata.get(key)?, parts);
            }
            "vars" => {
                let key = parts.next()?;
                let value = JsonValue::from(self.vars.get(key)?);
                return descend(&value, parts);
            }
            "observation_id" => JsonValue::String(self.observation_id.clone()),
            "timestamp" => JsonValue::String(self.timestamp.to_rfc3339()),
            "source" => JsonValue::String(self.source.clone()),
            "version" => JsonValue::String(self.version.clone()),
            "procedure_hint" => {
                self.procedure_hint.clone().map(JsonValue::String).unwrap_or(JsonValue::Null)
            }
            "tags" => JsonValue::from(self.tags.clone()),
            _ => return None,
        };
        descend(&root, parts)
    }
}

fn descend<'a>(value: &JsonValue, parts: impl Iterator<Item = &'a str>) -> Option<JsonValue> {
    let mut current = value;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}
