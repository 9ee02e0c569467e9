//! Core data types shared by decoders, the resolver and the gating engine.
//!
//! - [`ControlValue`] is one decoded control output (integer word or text)
//! - [`Value`] is a resolved stable variable with loose truthiness (empty and zero are false)
//! - [`TelemetryFrame`] is one decoded update flowing from a provider onward
//! - [`Observation`] is the timestamped, tagged envelope the gating engine reads
//! - [`UpdateRate`] controls how often a consumer receives frames

mod frame;
mod observation;
mod update_rate;
mod value;

pub use frame::{FRAME_SCHEMA_VERSION, TelemetryFrame};
pub use observation::{OBSERVATION_VERSION, Observation};
pub use update_rate::UpdateRate;
pub use value::{ControlValue, Value};
