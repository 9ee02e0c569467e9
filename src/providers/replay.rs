//! Replay provider for recorded telemetry logs

use std::collections::VecDeque;
use std::path::Path;
use tokio::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::provider::Provider;
use crate::recorder::read_jsonl;
use crate::sequence::SequenceGate;
use crate::types::TelemetryFrame;
use crate::Result;

/// Replay provider that reads frames from a JSONL telemetry log
pub struct ReplayProvider {
    /// Frames not yet delivered
    frames: VecDeque<TelemetryFrame>,

    /// Playback speed multiplier (1.0 = recorded pace, 2.0 = double speed)
    speed: f64,

    /// Sleep between frames according to their recorded `t_wall`
    paced: bool,

    /// Recorded time of the previously delivered frame
    last_t_wall: Option<f64>,

    gate: SequenceGate,
    source: String,
    total: usize,
}

impl ReplayProvider {
    /// Load a recorded log. Playback starts paced at recorded speed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let frames: Vec<TelemetryFrame> = read_jsonl(path)?;
        info!("Opened telemetry log {}: {} frames", path.display(), frames.len());
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<TelemetryFrame>) -> Self {
        let source = frames.first().map(|frame| frame.source.clone()).unwrap_or_default();
        let total = frames.len();
        Self {
            frames: frames.into(),
            speed: 1.0,
            paced: true,
            last_t_wall: None,
            gate: SequenceGate::new(),
            source,
            total,
        }
    }

    /// Set playback speed
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(0.1, 10.0); // Clamp to reasonable range
        debug!("Playback speed set to {}x", self.speed);
    }

    /// Deliver frames as fast as they are requested
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn total_frames(&self) -> usize {
        self.total
    }
}

#[async_trait::async_trait]
impl Provider for ReplayProvider {
    async fn next_frame(&mut self) -> Result<Option<TelemetryFrame>> {
        while let Some(frame) = self.frames.pop_front() {
            if self.gate.accept(&frame.source, frame.seq).is_none() {
                continue;
            }

            if self.paced {
                if let Some(last) = self.last_t_wall {
                    let wait = (frame.t_wall - last) / self.speed;
                    if wait > 0.0 {
                        match Duration::try_from_secs_f64(wait) {
                            Ok(wait) => tokio::time::sleep(wait).await,
                            Err(_) => warn!(seq = frame.seq, wait, "Unusable t_wall gap in replay log, not pacing"),
                        }
                    }
                }
            }
            self.last_t_wall = Some(frame.t_wall);

            trace!("Frame {}/{}: seq={}", self.total - self.frames.len(), self.total, frame.seq);
            return Ok(Some(frame));
        }

        debug!("Reached end of replay");
        Ok(None)
    }

    fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::JsonlWriter;

    fn frame(seq: u64, t_wall: f64) -> TelemetryFrame {
        TelemetryFrame::new(seq, t_wall, "dcs_bios_raw")
    }

    #[tokio::test]
    async fn replays_log_in_order_dropping_stale_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");
        let mut writer = JsonlWriter::create(&path).unwrap();
        for record in [frame(1, 0.0), frame(3, 0.1), frame(2, 0.2), frame(3, 0.3), frame(4, 0.4)] {
            writer.append(&record).unwrap();
        }

        let mut provider = ReplayProvider::open(&path).unwrap().unpaced();
        assert_eq!(provider.total_frames(), 5);
        assert_eq!(provider.source(), "dcs_bios_raw");

        let mut seqs = Vec::new();
        while let Some(frame) = provider.next_frame().await.unwrap() {
            seqs.push(frame.seq);
        }
        assert_eq!(seqs, [1, 3, 4]);
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_by_recorded_time() {
        let mut provider = ReplayProvider::from_frames(vec![frame(1, 10.0), frame(2, 12.0)]);
        provider.set_speed(2.0);

        let start = tokio::time::Instant::now();
        provider.next_frame().await.unwrap();
        provider.next_frame().await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2), "{:?}", elapsed);
        assert!(provider.next_frame().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_time_gap_is_not_paced() {
        let frames = vec![frame(1, 0.0), frame(2, f64::INFINITY), frame(3, f64::MAX)];
        let mut provider = ReplayProvider::from_frames(frames);
        provider.set_speed(0.1);

        let start = tokio::time::Instant::now();
        let mut seqs = Vec::new();
        while let Some(frame) = provider.next_frame().await.unwrap() {
            seqs.push(frame.seq);
        }
        assert_eq!(seqs, [1, 2, 3]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn speed_is_clamped() {
        let mut provider = ReplayProvider::from_frames(Vec::new());
        provider.set_speed(100.0);
        assert_eq!(provider.speed(), 10.0);
        provider.set_speed(0.0);
        assert_eq!(provider.speed(), 0.1);
    }
}
