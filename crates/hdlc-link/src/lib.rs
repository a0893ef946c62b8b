//! Framing layer for the serial link to the host.
//!
//! Frames are delimited by [`FLAG`] bytes. Inside a frame, `FLAG` and
//! [`ESCAPE`] are sent as `ESCAPE` followed by the byte XOR [`ESCAPE_XOR`].
//! Each frame ends with a CRC-16/CCITT of its payload, high byte first.
//! Frames that fail the CRC, run past the size limit, or are too short to
//! carry a CRC are dropped without notifying the sender.

mod crc;
mod decoder;
mod encoder;
mod sink;

pub use crc::crc16;
pub use decoder::{DecoderStats, HdlcDecoder};
pub use encoder::HdlcEncoder;
pub use sink::{CaptureSink, LinkSink};

/// Frame delimiter.
pub const FLAG: u8 = 0x7E;
/// Escape marker.
pub const ESCAPE: u8 = 0x7D;
/// Value XORed into an escaped byte.
pub const ESCAPE_XOR: u8 = 0x20;
/// Largest payload accepted by default, excluding CRC.
pub const DEFAULT_MAX_FRAME: usize = 10_000;
