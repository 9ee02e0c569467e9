//! Test utilities: fixture builders shared by unit tests and benchmarks.

#![cfg(any(test, feature = "benchmark"))]

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value as JsonValue, json};

use crate::protocol::SYNC_MARKER;
use crate::types::Observation;

/// A minimal control reference: a four-character aircraft name at address 0
/// and a full-word switch at address 4.
pub fn sample_reference() -> JsonValue {
    json!({
        "Meta": {
            "_ACFT_NAME": {
                "identifier": "_ACFT_NAME",
                "category": "Meta",
                "description": "Aircraft Name",
                "control_type": "display",
                "outputs": [{ "address": 0, "max_length": 4, "suffix": "", "type": "string" }]
            }
        },
        "TEST": {
            "SWITCH_1": {
                "identifier": "SWITCH_1",
                "category": "TEST",
                "description": "A switch",
                "control_type": "selector",
                "outputs": [{
                    "address": 4,
                    "mask": 65535,
                    "shift_by": 0,
                    "max_value": 65535,
                    "suffix": "",
                    "type": "integer"
                }]
            }
        }
    })
}

/// Encode `(address, payload)` pairs as a frame body.
pub fn encode_records(records: &[(u16, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (address, payload) in records {
        body.extend_from_slice(&address.to_le_bytes());
        body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        body.extend_from_slice(payload);
    }
    body
}

/// A complete frame: marker, body, and the marker that closes it.
pub fn wrap_frame(records: &[(u16, &[u8])]) -> Vec<u8> {
    let mut frame = SYNC_MARKER.to_vec();
    frame.extend(encode_records(records));
    frame.extend_from_slice(&SYNC_MARKER);
    frame
}

/// Fixed reference instant so timing assertions are reproducible.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now)
}

/// Observation `seconds` after [`epoch`] carrying `payload` and `tags`.
pub fn observation_at(seconds: i64, payload: JsonValue, tags: &[&str]) -> Observation {
    Observation::new(epoch() + Duration::seconds(seconds), "mock", payload)
        .with_tags(tags.iter().copied())
}
