//! Per-source sequence ordering
//!
//! Sequence numbers are the only ordering authority for telemetry. A frame is
//! accepted only if its `seq` is strictly greater than the last one accepted
//! from the same source; everything else is a UDP duplicate or reordering and
//! is dropped.

use std::collections::HashMap;
use tracing::debug;

/// Tracks the last accepted sequence number per source.
#[derive(Debug, Default, Clone)]
pub struct SequenceGate {
    last: HashMap<String, u64>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `seq` from `source` if it advances the sequence.
    ///
    /// Returns the number of skipped sequence numbers (0 for consecutive
    /// frames or the first frame of a source), or `None` if the frame is stale.
    pub fn accept(&mut self, source: &str, seq: u64) -> Option<u64> {
        match self.last.get_mut(source) {
            Some(last) if seq <= *last => {
                debug!(source, seq, last = *last, "Dropping stale sequence number");
                None
            }
            Some(last) => {
                let gap = seq - *last - 1;
                *last = seq;
                Some(gap)
            }
            None => {
                self.last.insert(source.to_string(), seq);
                Some(0)
            }
        }
    }

    pub fn last_accepted(&self, source: &str) -> Option<u64> {
        self.last.get(source).copied()
    }

    pub fn reset(&mut self, source: &str) {
        self.last.remove(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn stale_sequence_is_dropped() {
        let mut gate = SequenceGate::new();
        assert_eq!(gate.accept("dcs_bios", 2), Some(0));
        assert_eq!(gate.accept("dcs_bios", 1), None);
        assert_eq!(gate.accept("dcs_bios", 2), None);
        assert_eq!(gate.last_accepted("dcs_bios"), Some(2));
    }

    #[test]
    fn gaps_are_counted_per_source() {
        let mut gate = SequenceGate::new();
        gate.accept("a", 1);
        gate.accept("b", 10);
        assert_eq!(gate.accept("a", 5), Some(3));
        assert_eq!(gate.accept("b", 11), Some(0));
        gate.reset("a");
        assert_eq!(gate.accept("a", 1), Some(0));
    }

    proptest! {
        #[test]
        fn accepted_sequence_is_strictly_increasing(seqs in prop::collection::vec(0u64..50, 0..40)) {
            let mut gate = SequenceGate::new();
            let accepted: Vec<u64> =
                seqs.into_iter().filter(|seq| gate.accept("src", *seq).is_some()).collect();
            prop_assert!(accepted.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
