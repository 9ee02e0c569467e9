//! Decoded telemetry frame handed from providers to the resolver and recorders

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ControlValue, Value};

/// Schema version stamped on every frame this crate produces.
pub const FRAME_SCHEMA_VERSION: &str = "v2";

/// One decoded telemetry update.
///
/// Built once per decoded datagram group. `bios` holds either the full merged
/// control state or only the delta, depending on the provider configuration;
/// `delta` always holds exactly the controls that changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Monotonic per source
    pub seq: u64,

    /// Wall-clock receive time, seconds since the Unix epoch
    pub t_wall: f64,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub aircraft: String,

    #[serde(default)]
    pub bios: BTreeMap<String, ControlValue>,

    #[serde(default)]
    pub delta: BTreeMap<String, ControlValue>,

    /// Lua-export values, when a source provides them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lo: BTreeMap<String, Value>,

    /// Raw cockpit argument values, when a source provides them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cockpit_args: BTreeMap<String, Value>,

    /// Resolved stable variables
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
}

fn default_schema_version() -> String {
    FRAME_SCHEMA_VERSION.to_string()
}

impl TelemetryFrame {
    pub fn new(seq: u64, t_wall: f64, source: impl Into<String>) -> Self {
        Self {
            schema_version: default_schema_version(),
            seq,
            t_wall,
            source: source.into(),
            aircraft: String::new(),
            bios: BTreeMap::new(),
            delta: BTreeMap::new(),
            lo: BTreeMap::new(),
            cockpit_args: BTreeMap::new(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_aircraft(mut self, aircraft: impl Into<String>) -> Self {
        self.aircraft = aircraft.into();
        self
    }

    pub fn with_bios(mut self, bios: BTreeMap<String, ControlValue>) -> Self {
        self.bios = bios;
        self
    }

    pub fn with_delta(mut self, delta: BTreeMap<String, ControlValue>) -> Self {
        self.delta = delta;
        self
    }

    /// Fold an older, skipped frame into this one.
    ///
    /// Controls that changed in the older frame but not in this one are added
    /// to `delta` (and to `bios` when it carries only deltas), so a consumer
    /// that only sees this frame still learns about every control that changed
    /// since the last frame it received.
    pub fn absorb_skipped(&mut self, older: TelemetryFrame) {
        for (identifier, value) in older.bios {
            self.bios.entry(identifier).or_insert(value);
        }
        for (identifier, value) in older.delta {
            self.delta.entry(identifier).or_insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_keeps_newest_value() {
        let mut older = TelemetryFrame::new(1, 1.0, "raw");
        older.delta.insert("A".into(), ControlValue::Integer(1));
        older.delta.insert("B".into(), ControlValue::Integer(5));

        let mut newer = TelemetryFrame::new(2, 2.0, "raw");
        newer.delta.insert("A".into(), ControlValue::Integer(2));

        newer.absorb_skipped(older);
        assert_eq!(newer.delta["A"], ControlValue::Integer(2));
        assert_eq!(newer.delta["B"], ControlValue::Integer(5));
        assert_eq!(newer.seq, 2);
    }

    #[test]
    fn deserializes_minimal_record() {
        let frame: TelemetryFrame =
            serde_json::from_str(r#"{"seq": 3, "t_wall": 1.5, "bios": {"BATTERY_SW": 2}}"#)
                .expect("frame should parse");
        assert_eq!(frame.schema_version, FRAME_SCHEMA_VERSION);
        assert_eq!(frame.bios["BATTERY_SW"], ControlValue::Integer(2));
        assert!(frame.vars.is_empty());
    }
}
