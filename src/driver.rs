//! Driver spawns and manages the telemetry polling task

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::provider::Provider;
use crate::types::TelemetryFrame;
use crate::vars::VarResolver;

/// Consecutive provider errors tolerated before the driver gives up.
const MAX_ERRORS: u32 = 10;

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Receiver for resolved telemetry frames; closes when the driver stops
    pub frames: mpsc::Receiver<TelemetryFrame>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns and manages the telemetry polling task
///
/// The spawned task owns the Provider and the resolver, so frames are decoded
/// and resolved on one task in arrival order.
pub struct Driver;

impl Driver {
    /// Spawn the driver task for the given provider
    ///
    /// Every frame gets its stable variables resolved before it is sent.
    /// Returns the frame receiver plus a cancellation token for shutdown.
    pub fn spawn<P>(provider: P, resolver: VarResolver, capacity: usize) -> DriverChannels
    where
        P: Provider,
    {
        let (frame_tx, frame_rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let cancel_reader = cancel.clone();

        tokio::spawn(async move {
            Self::frame_reader_task(provider, resolver, frame_tx, cancel_reader).await;
        });

        DriverChannels { frames: frame_rx, cancel }
    }

    /// Frame reader task - polls the provider and resolves variables
    async fn frame_reader_task<P>(
        mut provider: P,
        resolver: VarResolver,
        frame_tx: mpsc::Sender<TelemetryFrame>,
        cancel: CancellationToken,
    ) where
        P: Provider,
    {
        info!("Frame reader task started for source {}", provider.source());
        let mut frame_count = 0u64;
        let mut error_count = 0u32;

        loop {
            // Use select to allow cancellation during provider.next_frame()
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Frame reader cancelled");
                    break;
                }
                result = provider.next_frame() => result,
            };

            match result {
                Ok(Some(frame)) => {
                    error_count = 0;
                    let frame = match resolver.apply(frame) {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!("Variable resolution failed, shutting down: {}", e);
                            break;
                        }
                    };
                    frame_count += 1;
                    trace!("Frame {}: seq={}, changed={}", frame_count, frame.seq, frame.delta.len());

                    let sent = tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = frame_tx.send(frame) => sent,
                    };
                    if sent.is_err() {
                        debug!("Frame receiver dropped, shutting down");
                        break;
                    }
                }
                Ok(None) => {
                    info!("Provider stream ended after {} frames", frame_count);
                    break;
                }
                Err(e) => {
                    // Provider error - don't crash on transient failures
                    error_count += 1;
                    error!("Provider error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many provider errors, shutting down");
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = std::time::Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!("Frame reader task ended (processed {} frames)", frame_count);
    }
}
