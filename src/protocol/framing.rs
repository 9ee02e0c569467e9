//! Sync-marker frame reassembly
//!
//! The export stream is a sequence of frames, each introduced by a four-byte
//! sync marker. A frame is only complete once the *next* marker arrives, so
//! the assembler keeps the unfinished tail between calls.

use tracing::{debug, trace};

use super::state::STATE_SIZE;

/// Four-byte marker preceding every frame.
pub const SYNC_MARKER: [u8; 4] = [0x55, 0x55, 0x55, 0x55];

/// Longest tail that can still be the beginning of a marker.
const MAX_PARTIAL_MARKER: usize = SYNC_MARKER.len() - 1;

/// Largest unterminated frame kept: every address written once plus a
/// datagram's worth of record headers.
pub const MAX_PENDING_FRAME: usize = 2 * STATE_SIZE;

/// Rolling buffer that turns arbitrary byte chunks into frame bodies.
#[derive(Debug, Default, Clone)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` and return the bodies of every frame it completed.
    ///
    /// Never blocks and never fails: bytes before the first marker are
    /// discarded, an unterminated frame is kept for the next call until it
    /// grows past [`MAX_PENDING_FRAME`].
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buffer, 0) else {
                if self.buffer.len() > MAX_PARTIAL_MARKER {
                    let keep_from = self.buffer.len() - MAX_PARTIAL_MARKER;
                    trace!(dropped = keep_from, "Discarding bytes outside any frame");
                    self.buffer.drain(..keep_from);
                }
                break;
            };
            if start > 0 {
                trace!(dropped = start, "Discarding bytes before sync marker");
                self.buffer.drain(..start);
            }

            let Some(next) = find_marker(&self.buffer, SYNC_MARKER.len()) else {
                if self.buffer.len() > MAX_PENDING_FRAME {
                    debug!(pending = self.buffer.len(), "Unterminated frame exceeds panel memory, discarding");
                    let keep_from = self.buffer.len() - MAX_PARTIAL_MARKER;
                    self.buffer.drain(..keep_from);
                }
                break;
            };
            frames.push(self.buffer[SYNC_MARKER.len()..next].to_vec());
            self.buffer.drain(..next);
        }

        frames
    }

    /// Bytes held back waiting for the next marker.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn find_marker(haystack: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(SYNC_MARKER.len())
        .position(|window| window == SYNC_MARKER)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_frame_between_markers() {
        let mut assembler = FrameAssembler::new();
        let mut data = SYNC_MARKER.to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        data.extend_from_slice(&SYNC_MARKER);

        let frames = assembler.push(&data);
        assert_eq!(frames, vec![vec![1, 2, 3]]);
        // The trailing marker opens the next frame
        assert_eq!(assembler.pending(), 4);
    }

    #[test]
    fn waits_for_closing_marker() {
        let mut assembler = FrameAssembler::new();
        let mut data = SYNC_MARKER.to_vec();
        data.extend_from_slice(&[9, 9]);
        assert!(assembler.push(&data).is_empty());

        let frames = assembler.push(&SYNC_MARKER);
        assert_eq!(frames, vec![vec![9, 9]]);
    }

    #[test]
    fn garbage_is_truncated_to_partial_marker() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[1, 2, 3, 4, 5, 0x55, 0x55]).is_empty());
        assert_eq!(assembler.pending(), 3);

        let mut rest = vec![0x55, 0x55, 7];
        rest.extend_from_slice(&SYNC_MARKER);
        assert_eq!(assembler.push(&rest), vec![vec![7]]);
    }

    #[test]
    fn unterminated_frame_is_bounded() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&SYNC_MARKER).is_empty());
        let chunk = vec![0u8; 4096];
        for _ in 0..(MAX_PENDING_FRAME / chunk.len() + 2) {
            assert!(assembler.push(&chunk).is_empty());
            assert!(assembler.pending() <= MAX_PENDING_FRAME + chunk.len());
        }

        // Resynchronises on the next marker pair
        let mut data = SYNC_MARKER.to_vec();
        data.push(5);
        data.extend_from_slice(&SYNC_MARKER);
        assert_eq!(assembler.push(&data), vec![vec![5]]);
    }

    #[test]
    fn leading_garbage_before_marker_is_dropped() {
        let mut assembler = FrameAssembler::new();
        let mut data = vec![0xAA, 0xBB];
        data.extend_from_slice(&SYNC_MARKER);
        data.push(1);
        data.extend_from_slice(&SYNC_MARKER);
        data.push(2);
        data.extend_from_slice(&SYNC_MARKER);

        assert_eq!(assembler.push(&data), vec![vec![1], vec![2]]);
    }
}
