//! Telemetry source implementations

pub mod json;
pub mod raw;
pub mod replay;

pub use json::JsonUdpProvider;
pub use raw::RawUdpProvider;
pub use replay::ReplayProvider;
