//! Tutor configuration loaded from YAML.
//!
//! Every field has a default, so an empty document is a valid configuration
//! that listens for raw DCS-BIOS export on the standard multicast group.
//!
//! ```yaml
//! receiver:
//!   host: 239.255.50.10
//!   port: 5010
//!   timeout_ms: 500
//! catalog:
//!   reference_dir: DCS/Scripts/DCS-BIOS/doc/json
//!   aircraft: A-10C
//! telemetry_map: packs/a10c/telemetry_map.yaml
//! procedure: packs/a10c/pack.yaml
//! gating:
//!   - { op: flag_true, var: battery_on }
//! step_timeout_secs: 120
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::catalog::ControlCatalog;
use crate::gating::GatingEngine;
use crate::procedure::ProcedureEngine;
use crate::vars::VarResolver;
use crate::{Result, TutorError};

pub const DEFAULT_HOST: &str = "239.255.50.10";
pub const DEFAULT_PORT: u16 = 5010;
pub const DEFAULT_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_SOURCE: &str = "dcs_bios_raw";
pub const DEFAULT_REFERENCE_DIR: &str = "DCS/Scripts/DCS-BIOS/doc/json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Address to listen on; a multicast address is joined on all interfaces
    pub host: String,
    pub port: u16,
    /// Upper bound on a single receive
    pub timeout_ms: u64,
    /// Source name stamped on every frame
    pub source: String,
    /// Send the full merged control state in `bios` rather than only the delta
    pub merge_full_state: bool,
    pub channel_capacity: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            source: DEFAULT_SOURCE.to_string(),
            merge_full_state: true,
            channel_capacity: 256,
        }
    }
}

impl ReceiverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| TutorError::config_error(format!("receiver host '{}' is not an IP address", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub reference_dir: PathBuf,
    pub aircraft: Option<String>,
    pub include_metadata: bool,
    /// Explicit reference documents; replaces the directory lookup when set
    pub paths: Vec<PathBuf>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            reference_dir: PathBuf::from(DEFAULT_REFERENCE_DIR),
            aircraft: None,
            include_metadata: true,
            paths: Vec::new(),
        }
    }
}

impl CatalogConfig {
    pub fn reference_paths(&self) -> Vec<PathBuf> {
        if !self.paths.is_empty() {
            return self.paths.clone();
        }
        ControlCatalog::reference_paths(&self.reference_dir, self.aircraft.as_deref(), self.include_metadata)
    }

    /// Load the catalog; unreadable documents contribute nothing.
    pub fn load(&self) -> ControlCatalog {
        ControlCatalog::load_paths(self.reference_paths())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    pub receiver: ReceiverConfig,
    pub catalog: CatalogConfig,
    /// Variable rule file (`telemetry_map.yaml`)
    pub telemetry_map: Option<PathBuf>,
    /// Gating rules as a list of `{op, ...}` mappings
    pub gating: JsonValue,
    /// Procedure pack file
    pub procedure: Option<PathBuf>,
    pub step_timeout_secs: Option<f64>,
}

impl TutorConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml_ng::from_str(text).map_err(|e| TutorError::parse_error("tutor config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| TutorError::file_error(path, e))?;
        let config = Self::from_yaml_str(&text)?;
        info!(path = %path.display(), "Loaded tutor configuration");
        Ok(config)
    }

    /// Resolver for the configured rule file; no file means no stable variables.
    pub fn resolver(&self) -> Result<VarResolver> {
        match &self.telemetry_map {
            Some(path) => VarResolver::from_yaml_path(path),
            None => Ok(VarResolver::default()),
        }
    }

    /// Gating engine with misconfigured rules kept as failing rules.
    pub fn gating_engine(&self) -> GatingEngine {
        GatingEngine::from_config(&self.gating)
    }

    /// Procedure engine for the configured pack, carrying `step_timeout_secs`.
    pub fn procedure_engine(&self) -> Result<Option<ProcedureEngine>> {
        let engine = self.procedure.as_ref().map(ProcedureEngine::from_pack_path).transpose()?;
        Ok(engine.map(|engine| engine.with_step_timeout(self.step_timeout_secs)))
    }

    fn validate(&self) -> Result<()> {
        self.receiver.socket_addr()?;
        if self.receiver.channel_capacity == 0 {
            return Err(TutorError::config_error("receiver.channel_capacity must be at least 1"));
        }
        if self.step_timeout_secs.is_some_and(|secs| !(secs > 0.0)) {
            return Err(TutorError::config_error("step_timeout_secs must be positive"));
        }
        if !(self.gating.is_null() || self.gating.is_array()) {
            return Err(TutorError::config_error("gating must be a list of rules"));
        }
        Ok(())
    }
}
