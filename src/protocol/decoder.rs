//! Delta decoder for the raw export stream

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, trace};

use super::framing::FrameAssembler;
use super::state::StateBuffer;
use crate::catalog::{AIRCRAFT_NAME_IDENTIFIER, AddressMap, ControlCatalog, OutputDescriptor, OutputKind};
use crate::types::ControlValue;

/// Changed control values, keyed by identifier.
pub type ControlDelta = BTreeMap<String, ControlValue>;

/// Size of the `(address, length)` record header.
const RECORD_HEADER_LEN: usize = 4;

/// Reconstructs panel memory from delta frames and reports changed controls.
///
/// Each instance owns its memory mirror; nothing is shared between decoders.
#[derive(Debug, Clone)]
pub struct ProtocolDecoder {
    assembler: FrameAssembler,
    state: StateBuffer,
    address_map: AddressMap,
    last_values: BTreeMap<String, ControlValue>,
    aircraft: String,
}

impl ProtocolDecoder {
    pub fn new(catalog: &ControlCatalog) -> Self {
        Self {
            assembler: FrameAssembler::new(),
            state: StateBuffer::new(),
            address_map: catalog.address_map(),
            last_values: BTreeMap::new(),
            aircraft: String::new(),
        }
    }

    /// Seed the aircraft name before the stream announces one.
    pub fn with_aircraft(mut self, aircraft: impl Into<String>) -> Self {
        self.aircraft = aircraft.into();
        self
    }

    /// Feed raw bytes and return every control that changed, merged across
    /// all frames the bytes completed (later frames win).
    pub fn apply(&mut self, raw: &[u8]) -> ControlDelta {
        let mut merged = ControlDelta::new();
        for delta in self.apply_frames(raw) {
            merged.extend(delta);
        }
        merged
    }

    /// Feed raw bytes and return one delta per completed frame, skipping
    /// frames that changed nothing.
    pub fn apply_frames(&mut self, raw: &[u8]) -> Vec<ControlDelta> {
        self.split_frames(raw)
            .iter()
            .map(|body| self.apply_frame(body))
            .filter(|delta| !delta.is_empty())
            .collect()
    }

    /// Buffer raw bytes and return the bodies of the frames they completed,
    /// without applying them. Feed each body to [`apply_frame`](Self::apply_frame)
    /// to observe the state between frames.
    pub fn split_frames(&mut self, raw: &[u8]) -> Vec<Vec<u8>> {
        self.assembler.push(raw)
    }

    /// Apply one frame body (the bytes between two sync markers).
    ///
    /// Truncated or out-of-bounds records end processing of this frame;
    /// records already applied stay applied.
    pub fn apply_frame(&mut self, body: &[u8]) -> ControlDelta {
        let touched = self.write_records(body);

        let mut delta = ControlDelta::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for address in touched {
            for descriptor in self.address_map.outputs_at(address) {
                if !seen.insert(descriptor.identifier.as_str()) {
                    continue;
                }
                let value = decode_output(&self.state, descriptor);
                if self.last_values.get(&descriptor.identifier) != Some(&value) {
                    self.last_values.insert(descriptor.identifier.clone(), value.clone());
                    delta.insert(descriptor.identifier.clone(), value);
                }
            }
        }

        if let Some(ControlValue::Text(name)) = delta.get(AIRCRAFT_NAME_IDENTIFIER) {
            if *name != self.aircraft {
                debug!(aircraft = %name, "Aircraft announced by export stream");
            }
            self.aircraft = name.clone();
        }

        trace!(bytes = body.len(), changed = delta.len(), "Applied frame");
        delta
    }

    /// Write every well-formed record into memory; returns the touched
    /// addresses that have at least one catalogued output.
    fn write_records(&mut self, body: &[u8]) -> BTreeSet<u16> {
        let mut touched = BTreeSet::new();
        let mut cursor = 0usize;

        while let Some(header) = body.get(cursor..cursor + RECORD_HEADER_LEN) {
            let address = u16::from_le_bytes([header[0], header[1]]);
            let length = usize::from(u16::from_le_bytes([header[2], header[3]]));
            cursor += RECORD_HEADER_LEN;
            if length == 0 {
                continue;
            }

            let Some(payload) = body.get(cursor..cursor + length) else {
                trace!(address, length, "Record runs past end of frame");
                break;
            };
            if !self.state.write(usize::from(address), payload) {
                trace!(address, length, "Record runs past end of panel memory");
                break;
            }

            let start = u32::from(address);
            for addr in start..start + length as u32 {
                // write succeeded, so addr < STATE_SIZE fits in u16
                let addr = addr as u16;
                if self.address_map.contains(addr) {
                    touched.insert(addr);
                }
            }
            cursor += length;
        }

        touched
    }

    /// Last decoded value of every control seen so far.
    pub fn values(&self) -> &BTreeMap<String, ControlValue> {
        &self.last_values
    }

    pub fn value(&self, identifier: &str) -> Option<&ControlValue> {
        self.last_values.get(identifier)
    }

    /// Aircraft currently announced by the stream, or the seeded name.
    pub fn aircraft(&self) -> &str {
        &self.aircraft
    }

    /// Bounds-checked read of a memory word, 0 past the end.
    pub fn peek_u16(&self, address: u16) -> u16 {
        self.state.read_u16(usize::from(address))
    }

    /// Bytes buffered while waiting for the next sync marker.
    pub fn pending_bytes(&self) -> usize {
        self.assembler.pending()
    }
}

fn decode_output(state: &StateBuffer, descriptor: &OutputDescriptor) -> ControlValue {
    let address = usize::from(descriptor.address);
    match descriptor.kind {
        OutputKind::Text => {
            let raw = state.read_bytes(address, usize::from(descriptor.max_length));
            let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
            ControlValue::Text(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
        OutputKind::Integer => {
            // Shifting a word by 16 or more leaves nothing
            let word = state.read_u16(address) & descriptor.mask;
            ControlValue::Integer(u32::from(word.checked_shr(u32::from(descriptor.shift)).unwrap_or(0)))
        }
    }
}
