//! Control catalog built from DCS-BIOS control reference documents.
//!
//! A reference document maps `category -> control_id -> control`, where each
//! control carries an `identifier` and a list of `outputs`:
//!
//! ```json
//! { "Electrical": { "BATTERY_SW": {
//!     "identifier": "BATTERY_SW",
//!     "outputs": [{ "address": 29962, "mask": 768, "shift_by": 8, "type": "integer" }]
//! } } }
//! ```
//!
//! Loading is tolerant: missing or unreadable documents, non-object entries and
//! outputs without an address contribute nothing.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifier of the metadata output carrying the aircraft name.
pub const AIRCRAFT_NAME_IDENTIFIER: &str = "_ACFT_NAME";

/// Metadata document loaded alongside the aircraft document.
pub const METADATA_DOCUMENT: &str = "MetadataStart.json";

/// How an output's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Little-endian 16-bit word, masked and shifted
    Integer,
    /// Fixed-width, null-terminated text
    Text,
}

/// Where and how one control output lives in panel memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputDescriptor {
    pub identifier: String,
    pub address: u16,
    pub kind: OutputKind,
    pub mask: u16,
    pub shift: u8,
    pub max_length: u16,
}

impl OutputDescriptor {
    pub fn integer(identifier: impl Into<String>, address: u16, mask: u16, shift: u8) -> Self {
        Self { identifier: identifier.into(), address, kind: OutputKind::Integer, mask, shift, max_length: 0 }
    }

    pub fn text(identifier: impl Into<String>, address: u16, max_length: u16) -> Self {
        Self {
            identifier: identifier.into(),
            address,
            kind: OutputKind::Text,
            mask: 0xFFFF,
            shift: 0,
            max_length,
        }
    }

    /// Addresses whose writes can change this output's decoded value.
    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        let span = match self.kind {
            OutputKind::Text => u32::from(self.max_length),
            OutputKind::Integer => 1,
        };
        let start = u32::from(self.address);
        let end = (start + span).min(u32::from(u16::MAX) + 1);
        (start..end).map(|addr| addr as u16)
    }

    fn from_reference(identifier: &str, output: &JsonValue) -> Option<Self> {
        let output = output.as_object()?;
        let address = output.get("address").and_then(JsonValue::as_u64)?;
        let Ok(address) = u16::try_from(address) else {
            debug!(identifier, address, "Output address outside panel memory, skipping");
            return None;
        };

        // Zero or missing means "use the default", matching the reference exporter
        let mask = read_u64(output, "mask").filter(|m| *m != 0).unwrap_or(0xFFFF);
        let shift = read_u64(output, "shift_by").unwrap_or(0);
        let max_length = read_u64(output, "max_length").unwrap_or(0);
        let is_text = output.get("type").and_then(JsonValue::as_str) == Some("string");

        if is_text && max_length > 0 {
            Some(Self::text(identifier, address, u16::try_from(max_length).unwrap_or(u16::MAX)))
        } else {
            Some(Self::integer(
                identifier,
                address,
                u16::try_from(mask).unwrap_or(0xFFFF),
                u8::try_from(shift).unwrap_or(u8::MAX),
            ))
        }
    }
}

fn read_u64(object: &serde_json::Map<String, JsonValue>, key: &str) -> Option<u64> {
    object.get(key).and_then(JsonValue::as_u64)
}

/// Static set of control outputs, keyed by control identifier.
#[derive(Debug, Clone, Default)]
pub struct ControlCatalog {
    descriptors: Vec<Arc<OutputDescriptor>>,
    by_identifier: HashMap<String, Vec<usize>>,
}

impl ControlCatalog {
    pub fn new(descriptors: impl IntoIterator<Item = OutputDescriptor>) -> Self {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            catalog.push(descriptor);
        }
        catalog
    }

    fn push(&mut self, descriptor: OutputDescriptor) {
        let index = self.descriptors.len();
        self.by_identifier.entry(descriptor.identifier.clone()).or_default().push(index);
        self.descriptors.push(Arc::new(descriptor));
    }

    /// Build a catalog from an already-parsed reference document.
    pub fn from_reference(document: &JsonValue) -> Self {
        let mut catalog = Self::default();
        catalog.extend_from_reference(document);
        catalog
    }

    /// Load every readable document in `paths`; unreadable ones are skipped.
    pub fn load_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        let mut catalog = Self::default();
        for path in paths {
            let path = path.as_ref();
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "Control reference not readable, skipping");
                    continue;
                }
            };
            match serde_json::from_str::<JsonValue>(&text) {
                Ok(document) => {
                    let before = catalog.len();
                    catalog.extend_from_reference(&document);
                    debug!(path = %path.display(), outputs = catalog.len() - before, "Loaded control reference");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Control reference is not valid JSON, skipping");
                }
            }
        }
        info!("Control catalog ready: {} outputs", catalog.len());
        catalog
    }

    /// Reference documents for an aircraft: `<dir>/<aircraft>.json` plus the
    /// shared metadata document when requested.
    pub fn reference_paths(dir: &Path, aircraft: Option<&str>, include_metadata: bool) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(aircraft) = aircraft.filter(|a| !a.is_empty()) {
            paths.push(dir.join(format!("{}.json", aircraft)));
        }
        if include_metadata {
            paths.push(dir.join(METADATA_DOCUMENT));
        }
        paths
    }

    fn extend_from_reference(&mut self, document: &JsonValue) {
        let Some(categories) = document.as_object() else {
            return;
        };
        for controls in categories.values().filter_map(JsonValue::as_object) {
            for control in controls.values().filter_map(JsonValue::as_object) {
                let identifier = control.get("identifier").and_then(JsonValue::as_str).unwrap_or("");
                if identifier.is_empty() {
                    continue;
                }
                let Some(outputs) = control.get("outputs").and_then(JsonValue::as_array) else {
                    continue;
                };
                for output in outputs {
                    if let Some(descriptor) = OutputDescriptor::from_reference(identifier, output) {
                        self.push(descriptor);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &OutputDescriptor> {
        self.descriptors.iter().map(AsRef::as_ref)
    }

    /// All outputs declared for a control identifier.
    pub fn outputs(&self, identifier: &str) -> impl Iterator<Item = &OutputDescriptor> {
        self.by_identifier
            .get(identifier)
            .into_iter()
            .flatten()
            .map(move |index| self.descriptors[*index].as_ref())
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.by_identifier.contains_key(identifier)
    }

    /// Build the dispatch map from byte address to affected outputs.
    pub fn address_map(&self) -> AddressMap {
        let mut slots: HashMap<u16, Vec<Arc<OutputDescriptor>>> = HashMap::new();
        for descriptor in &self.descriptors {
            for address in descriptor.addresses() {
                slots.entry(address).or_default().push(Arc::clone(descriptor));
            }
        }
        AddressMap { slots }
    }
}

/// Byte address to the outputs that occupy it. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    slots: HashMap<u16, Vec<Arc<OutputDescriptor>>>,
}

impl AddressMap {
    /// Outputs touching `address`, in catalog order.
    pub fn outputs_at(&self, address: u16) -> &[Arc<OutputDescriptor>] {
        self.slots.get(&address).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, address: u16) -> bool {
        self.slots.contains_key(&address)
    }

    /// Number of distinct addresses with at least one output.
    pub fn address_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_reference;
    use serde_json::json;

    #[test]
    fn loads_outputs_from_reference() {
        let catalog = ControlCatalog::from_reference(&sample_reference());
        let name: Vec<_> = catalog.outputs(AIRCRAFT_NAME_IDENTIFIER).collect();
        assert_eq!(name.len(), 1);
        assert_eq!(name[0].kind, OutputKind::Text);
        assert_eq!(name[0].max_length, 4);

        let switch: Vec<_> = catalog.outputs("SWITCH_1").collect();
        assert_eq!(switch[0].kind, OutputKind::Integer);
        assert_eq!(switch[0].address, 4);
        assert_eq!(switch[0].mask, 0xFFFF);
    }

    #[test]
    fn text_outputs_dispatch_on_every_byte() {
        let catalog = ControlCatalog::from_reference(&sample_reference());
        let map = catalog.address_map();
        for address in 0..4 {
            assert_eq!(map.outputs_at(address)[0].identifier, AIRCRAFT_NAME_IDENTIFIER);
        }
        assert_eq!(map.outputs_at(4)[0].identifier, "SWITCH_1");
        assert!(map.outputs_at(5).is_empty());
    }

    #[test]
    fn skips_malformed_entries() {
        let document = json!({
            "Meta": "not a category",
            "PANEL": {
                "NO_ID": { "outputs": [{ "address": 1 }] },
                "NO_ADDRESS": { "identifier": "NO_ADDRESS", "outputs": [{ "mask": 1 }] },
                "TOO_HIGH": { "identifier": "TOO_HIGH", "outputs": [{ "address": 70000 }] },
                "ZERO_MASK": { "identifier": "ZERO_MASK", "outputs": [{ "address": 8, "mask": 0 }] },
                "EMPTY_TEXT": { "identifier": "EMPTY_TEXT", "outputs": [{ "address": 10, "type": "string" }] },
                "BAD": "not a control"
            }
        });
        let catalog = ControlCatalog::from_reference(&document);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.outputs("ZERO_MASK").next().unwrap().mask, 0xFFFF);
        assert_eq!(catalog.outputs("EMPTY_TEXT").next().unwrap().kind, OutputKind::Integer);
        assert!(!catalog.contains("TOO_HIGH"));
    }

    #[test]
    fn missing_files_contribute_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("A-10C.json");
        std::fs::write(&present, sample_reference().to_string()).unwrap();
        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();

        let catalog =
            ControlCatalog::load_paths([present, broken, dir.path().join(METADATA_DOCUMENT)]);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn reference_paths_follow_aircraft() {
        let dir = Path::new("/refs");
        let paths = ControlCatalog::reference_paths(dir, Some("FA-18C_hornet"), true);
        assert_eq!(
            paths,
            vec![dir.join("FA-18C_hornet.json"), dir.join(METADATA_DOCUMENT)]
        );
        assert!(ControlCatalog::reference_paths(dir, None, false).is_empty());
    }

    #[test]
    fn text_span_is_clamped_to_memory() {
        let descriptor = OutputDescriptor::text("TAIL", 0xFFFE, 8);
        assert_eq!(descriptor.addresses().collect::<Vec<_>>(), vec![0xFFFE, 0xFFFF]);
    }
}
