//! Panel memory mirror

/// Size of the exported panel memory in bytes.
pub const STATE_SIZE: usize = 65536;

/// Fixed-size mirror of the simulator's panel memory.
///
/// All access is bounds-checked; reads past the end yield zero or empty data
/// and writes that would not fit are refused as a whole.
#[derive(Clone)]
pub struct StateBuffer {
    bytes: Box<[u8]>,
}

impl StateBuffer {
    pub fn new() -> Self {
        Self { bytes: vec![0u8; STATE_SIZE].into_boxed_slice() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy `payload` to `[address, address + payload.len())`.
    ///
    /// Returns `false` without touching memory if the range exceeds the buffer.
    pub fn write(&mut self, address: usize, payload: &[u8]) -> bool {
        let Some(end) = address.checked_add(payload.len()) else {
            return false;
        };
        match self.bytes.get_mut(address..end) {
            Some(target) => {
                target.copy_from_slice(payload);
                true
            }
            None => false,
        }
    }

    /// Little-endian word at `address`, or 0 when it would read past the end.
    pub fn read_u16(&self, address: usize) -> u16 {
        match self.bytes.get(address..address.saturating_add(2)) {
            Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
            _ => 0,
        }
    }

    /// Up to `len` bytes from `address`, truncated at the end of memory.
    pub fn read_bytes(&self, address: usize, len: usize) -> &[u8] {
        let start = address.min(self.bytes.len());
        let end = address.saturating_add(len).min(self.bytes.len());
        &self.bytes[start..end]
    }
}

impl Default for StateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateBuffer").field("len", &self.bytes.len()).finish()
    }
}
