//! Raw DCS-BIOS export protocol.
//!
//! The export stream mirrors a 64 KiB block of panel memory. Each frame is a
//! list of `(address: u16 LE, length: u16 LE, payload)` records written into
//! that mirror:
//!
//! ```text
//! 55 55 55 55 | addr lo, addr hi, len lo, len hi, payload... | ... | 55 55 55 55 | next frame
//! ```
//!
//! [`ProtocolDecoder`] reassembles frames from arbitrarily chunked input,
//! applies them to its private [`StateBuffer`] and decodes only the controls
//! whose bytes were touched.
//!
//! ```rust
//! use simtutor::catalog::{ControlCatalog, OutputDescriptor};
//! use simtutor::protocol::{ProtocolDecoder, SYNC_MARKER};
//! use simtutor::ControlValue;
//!
//! let catalog = ControlCatalog::new([OutputDescriptor::integer("MASTER_ARM", 4, 0xFFFF, 0)]);
//! let mut decoder = ProtocolDecoder::new(&catalog);
//!
//! let mut datagram = SYNC_MARKER.to_vec();
//! datagram.extend_from_slice(&[4, 0, 2, 0, 1, 0]);
//! datagram.extend_from_slice(&SYNC_MARKER);
//!
//! let delta = decoder.apply(&datagram);
//! assert_eq!(delta["MASTER_ARM"], ControlValue::Integer(1));
//! ```

mod decoder;
mod framing;
mod state;

pub use decoder::{ControlDelta, ProtocolDecoder};
pub use framing::{FrameAssembler, MAX_PENDING_FRAME, SYNC_MARKER};
pub use state::{STATE_SIZE, StateBuffer};
