//! Cockpit telemetry decoding and procedure tutoring for DCS World.
//!
//! SimTutor turns the DCS-BIOS export stream into named control values,
//! derives stable variables from them, and gates a step-by-step procedure on
//! those variables.
//!
//! # Features
//!
//! - **Protocol decoding**: sync-framed delta records applied to a 64 KiB
//!   panel memory image, emitting only controls whose value changed
//! - **Stable variables**: a restricted expression language evaluated per
//!   frame, in declaration order
//! - **Gating**: declarative preconditions checked against the latest
//!   observation, with reasons that name the failing variable
//! - **Procedures**: a single-active-step state machine with an append-only
//!   event log
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use simtutor::{SimTutor, TutorConfig, UpdateRate};
//!
//! #[tokio::main]
//! async fn main() -> simtutor::Result<()> {
//!     let config = TutorConfig::from_path("tutor.yaml")?;
//!     let mut connection = SimTutor::connect(&config).await?;
//!     let mut frames = connection.frames(UpdateRate::Max(20));
//!
//!     while let Some(frame) = frames.next().await {
//!         println!("{} {:?}", frame.seq, frame.vars);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Decoding and evaluation
pub mod catalog;
pub mod gating;
pub mod procedure;
pub mod protocol;
pub mod sequence;
pub mod vars;

// Stream-based telemetry architecture
pub mod connection;
pub mod driver;
pub mod provider;
pub mod providers;
pub mod stream;

// Ambient
pub mod config;
pub mod logging;
pub mod recorder;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use catalog::{AddressMap, ControlCatalog, OutputDescriptor};
pub use config::TutorConfig;
pub use connection::TelemetryConnection;
pub use gating::{GatingEngine, GatingRule, RuleResult};
pub use procedure::{ProcedureEngine, ProcedureEvent, StepState, StepStatus};
pub use protocol::ProtocolDecoder;
pub use vars::{VarResolver, VariableRuleSet};

/// Unified entry point for telemetry connections.
///
/// Each constructor loads the variable rules named by the configuration and
/// returns a [`TelemetryConnection`] whose frames are already resolved.
///
/// # Examples
///
/// ## Live export
/// ```rust,no_run
/// use simtutor::{SimTutor, TutorConfig};
///
/// #[tokio::main]
/// async fn main() -> simtutor::Result<()> {
///     let connection = SimTutor::connect(&TutorConfig::default()).await?;
///     // Use connection...
///     Ok(())
/// }
/// ```
///
/// ## Recorded log
/// ```rust,no_run
/// use simtutor::{SimTutor, TutorConfig};
///
/// #[tokio::main]
/// async fn main() -> simtutor::Result<()> {
///     let connection = SimTutor::open("telemetry.jsonl", &TutorConfig::default(), 1.0)?;
///     // Use connection...
///     Ok(())
/// }
/// ```
pub struct SimTutor;

impl SimTutor {
    /// Listen for the raw DCS-BIOS export.
    ///
    /// Loads the control catalog from the configured reference documents and
    /// binds the receiver socket.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The variable rule file is missing or contains a disallowed expression
    /// - The receiver address is invalid or the port cannot be bound
    pub async fn connect(config: &TutorConfig) -> Result<TelemetryConnection> {
        let resolver = config.resolver()?;
        let catalog = config.catalog.load();
        TelemetryConnection::connect_raw(&config.receiver, &catalog, resolver).await
    }

    /// Listen for telemetry that an exporter already decoded to JSON.
    pub async fn connect_json(config: &TutorConfig) -> Result<TelemetryConnection> {
        let resolver = config.resolver()?;
        TelemetryConnection::connect_json(&config.receiver, resolver).await
    }

    /// Replay a recorded JSONL telemetry log.
    ///
    /// `speed` scales the recorded pacing and is clamped to 0.1–10x.
    pub fn open<P: AsRef<std::path::Path>>(path: P, config: &TutorConfig, speed: f64) -> Result<TelemetryConnection> {
        let resolver = config.resolver()?;
        TelemetryConnection::open_replay(path, resolver, speed)
    }
}
