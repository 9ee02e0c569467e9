//! Delivery rate control for frame streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a consumer wants to receive frames.
///
/// UDP sources have no fixed tick rate, so throttling is expressed as a
/// ceiling rather than being normalised against a source frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every frame, as soon as it is decoded
    #[default]
    Native,

    /// At most this many frames per second; changes from skipped frames are
    /// folded into the next delivered one
    Max(u32),
}

impl UpdateRate {
    /// Minimum spacing between delivered frames, if any.
    pub fn interval(self) -> Option<Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / f64::from(hz))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_for_rates() {
        assert_eq!(UpdateRate::Native.interval(), None);
        assert_eq!(UpdateRate::Max(0).interval(), None);
        assert_eq!(UpdateRate::Max(4).interval(), Some(Duration::from_millis(250)));
    }
}
