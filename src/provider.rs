//! Provider trait for telemetry sources

use crate::Result;
use crate::types::TelemetryFrame;

/// Trait for telemetry data sources
///
/// Providers abstract over the raw export stream, pre-decoded JSON datagrams
/// and recorded logs. Each one handles its own timing and sequence ordering,
/// so every frame it yields has a `seq` greater than the one before.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Get the next telemetry frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - New frame available
    /// - `Ok(None)` - Stream ended (normal termination)
    /// - `Err(e)` - Error occurred
    ///
    /// Network providers wait across receive timeouts and never end on their
    /// own; replay providers end at the end of the log.
    async fn next_frame(&mut self) -> Result<Option<TelemetryFrame>>;

    /// Source name stamped on frames from this provider
    fn source(&self) -> &str;
}
