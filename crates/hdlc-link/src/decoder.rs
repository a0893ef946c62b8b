use crate::{DEFAULT_MAX_FRAME, ESCAPE, ESCAPE_XOR, FLAG, crc16};

/// Counts of what the decoder has seen since construction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_ok: u64,
    pub crc_errors: u64,
    pub oversize: u64,
    pub too_short: u64,
}

/// Incremental frame decoder.
///
/// Bytes are pushed one at a time; a completed, CRC-checked payload is
/// handed back as a borrowed slice that stays valid until the next push.
#[derive(Debug)]
pub struct HdlcDecoder {
    buf: Vec<u8>,
    max_len: usize,
    escaped: bool,
    overflowed: bool,
    // Set once a frame has been returned; the buffer is cleared lazily on
    // the next push so the returned slice can borrow it.
    delivered: bool,
    stats: DecoderStats,
}

impl HdlcDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_FRAME)
    }

    /// `max_len` limits the payload, not counting the two CRC bytes.
    #[must_use]
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_len.min(4096) + 2),
            max_len,
            escaped: false,
            overflowed: false,
            delivered: false,
            stats: DecoderStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> DecoderStats {
        self.stats
    }

    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Feed one wire byte. Returns the payload when `b` closes a valid frame.
    pub fn push_byte(&mut self, b: u8) -> Option<&[u8]> {
        if self.delivered {
            self.reset_frame();
        }

        match b {
            FLAG => self.close_frame(),
            ESCAPE => {
                self.escaped = true;
                None
            }
            _ => {
                let value = if self.escaped { b ^ ESCAPE_XOR } else { b };
                self.escaped = false;
                if self.buf.len() >= self.max_len + 2 {
                    self.overflowed = true;
                } else {
                    self.buf.push(value);
                }
                None
            }
        }
    }

    fn reset_frame(&mut self) {
        self.buf.clear();
        self.escaped = false;
        self.overflowed = false;
        self.delivered = false;
    }

    fn close_frame(&mut self) -> Option<&[u8]> {
        // Back-to-back flags delimit nothing
        if self.buf.is_empty() && !self.overflowed {
            self.escaped = false;
            return None;
        }
        if self.overflowed {
            self.stats.oversize += 1;
            log::debug!("dropping oversize frame");
            self.reset_frame();
            return None;
        }
        if self.buf.len() < 2 {
            self.stats.too_short += 1;
            self.reset_frame();
            return None;
        }

        let payload_len = self.buf.len() - 2;
        let received = u16::from_be_bytes([self.buf[payload_len], self.buf[payload_len + 1]]);
        if crc16(&self.buf[..payload_len]) != received {
            self.stats.crc_errors += 1;
            log::debug!("dropping frame with bad CRC ({} bytes)", payload_len);
            self.reset_frame();
            return None;
        }

        self.stats.frames_ok += 1;
        self.delivered = true;
        Some(&self.buf[..payload_len])
    }
}

impl Default for HdlcDecoder {
    fn default() -> Self {
        Self::new()
    }
}
