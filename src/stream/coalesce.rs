//! Rate limiting that folds skipped frames into the next delivered one

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::types::TelemetryFrame;

/// Extension trait to add coalescing to any stream of frames
pub trait CoalesceExt: Stream<Item = TelemetryFrame> {
    /// Emit at most one frame per `period`.
    ///
    /// The latest frame wins, but the controls that changed in the frames it
    /// replaced are folded into its `delta`, so no change is lost.
    fn coalesce(self, period: Duration) -> Coalesce<Self>
    where
        Self: Sized,
    {
        Coalesce::new(self, period)
    }
}

impl<T: Stream<Item = TelemetryFrame>> CoalesceExt for T {}

pin_project! {
    /// A stream combinator that limits the frame rate without dropping deltas
    pub struct Coalesce<S> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<TelemetryFrame>,
        finished: bool,
    }
}

impl<S> Coalesce<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        let mut interval = interval(period);
        // Don't burst after a slow consumer
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { stream, interval, pending: None, finished: false }
    }
}

fn fold(pending: &mut Option<TelemetryFrame>, mut frame: TelemetryFrame) {
    if let Some(older) = pending.take() {
        frame.absorb_skipped(older);
    }
    *pending = Some(frame);
}

impl<S: Stream<Item = TelemetryFrame>> Stream for Coalesce<S> {
    type Item = TelemetryFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Keep draining while waiting for the tick so skipped frames are folded
        while !*this.finished {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(frame)) => fold(this.pending, frame),
                Poll::Ready(None) => *this.finished = true,
                Poll::Pending => break,
            }
        }

        if *this.finished {
            // Flush whatever is left without waiting for the tick
            return Poll::Ready(this.pending.take());
        }
        if this.pending.is_none() {
            return Poll::Pending;
        }

        match this.interval.poll_tick(cx) {
            Poll::Ready(_) => Poll::Ready(this.pending.take()),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ControlValue;
    use futures::StreamExt;

    fn frame(seq: u64, identifier: &str) -> TelemetryFrame {
        let mut frame = TelemetryFrame::new(seq, seq as f64, "raw");
        frame.delta.insert(identifier.to_string(), ControlValue::Integer(seq as u32));
        frame
    }

    #[tokio::test(start_paused = true)]
    async fn folds_skipped_deltas_into_latest_frame() {
        let frames = futures::stream::iter(vec![frame(1, "A"), frame(2, "B"), frame(3, "A")]);
        let out: Vec<TelemetryFrame> = frames.coalesce(Duration::from_millis(100)).collect().await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].seq, 3);
        assert_eq!(out[0].delta["A"], ControlValue::Integer(3));
        assert_eq!(out[0].delta["B"], ControlValue::Integer(2));
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_frames_pass_through() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let mut stream = tokio_stream::wrappers::ReceiverStream::new(rx).coalesce(Duration::from_millis(100));

        tx.send(frame(1, "A")).await.unwrap();
        assert_eq!(stream.next().await.map(|f| f.seq), Some(1));

        tx.send(frame(2, "B")).await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(second.seq, 2);
        assert!(!second.delta.contains_key("A"));

        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
