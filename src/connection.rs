//! Telemetry connection: a running driver plus its frame stream

use futures::{Stream, StreamExt};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ControlCatalog;
use crate::config::ReceiverConfig;
use crate::driver::Driver;
use crate::provider::Provider;
use crate::providers::{JsonUdpProvider, RawUdpProvider, ReplayProvider};
use crate::stream::CoalesceExt;
use crate::types::{TelemetryFrame, UpdateRate};
use crate::vars::VarResolver;
use crate::Result;

/// Connection to a telemetry source.
///
/// Frames arrive with their stable variables already resolved. Dropping the
/// connection stops the background task and ends the frame stream.
pub struct TelemetryConnection {
    /// Frame receiver, handed out once by [`frames`](Self::frames)
    frames: Option<mpsc::Receiver<TelemetryFrame>>,

    source: String,

    /// Cancellation token for stopping the driver
    cancel: CancellationToken,
}

impl TelemetryConnection {
    /// Start polling `provider` on a background task.
    pub fn spawn<P: Provider>(provider: P, resolver: VarResolver, capacity: usize) -> Self {
        let source = provider.source().to_string();
        let channels = Driver::spawn(provider, resolver, capacity);
        Self { frames: Some(channels.frames), source, cancel: channels.cancel }
    }

    /// Listen for the raw binary export stream.
    pub async fn connect_raw(config: &ReceiverConfig, catalog: &ControlCatalog, resolver: VarResolver) -> Result<Self> {
        let provider = RawUdpProvider::bind(config, catalog).await?;
        info!("Raw telemetry connection established ({} outputs)", catalog.len());
        Ok(Self::spawn(provider, resolver, config.channel_capacity))
    }

    /// Listen for pre-decoded JSON telemetry.
    pub async fn connect_json(config: &ReceiverConfig, resolver: VarResolver) -> Result<Self> {
        let provider = JsonUdpProvider::bind(config).await?;
        info!("JSON telemetry connection established");
        Ok(Self::spawn(provider, resolver, config.channel_capacity))
    }

    /// Replay a recorded telemetry log at `speed` times recorded pace.
    pub fn open_replay<P: AsRef<Path>>(path: P, resolver: VarResolver, speed: f64) -> Result<Self> {
        let mut provider = ReplayProvider::open(path)?;
        provider.set_speed(speed);
        Ok(Self::spawn(provider, resolver, ReceiverConfig::default().channel_capacity))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Take the frame stream.
    ///
    /// With `UpdateRate::Max` the stream is rate limited and frames that are
    /// skipped have their deltas folded into the next delivered frame. The
    /// stream can be taken once; later calls return an empty stream.
    pub fn frames(&mut self, rate: UpdateRate) -> impl Stream<Item = TelemetryFrame> + Send + 'static {
        let Some(receiver) = self.frames.take() else {
            warn!("Frame stream already taken for source {}", self.source);
            return futures::stream::empty().boxed();
        };
        let frames = ReceiverStream::new(receiver);

        match rate.interval() {
            None => frames.boxed(),
            Some(period) => frames.coalesce(period).boxed(),
        }
    }

    /// Stop the background task; the frame stream ends once drained.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TelemetryConnection {
    fn drop(&mut self) {
        debug!("Dropping telemetry connection");
        // Cancel tasks on drop for clean shutdown
        self.cancel.cancel();
    }
}
