use crate::{ESCAPE, ESCAPE_XOR, FLAG, crc16};

/// Builds wire frames from payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct HdlcEncoder;

impl HdlcEncoder {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Largest number of wire bytes a payload of `payload_len` bytes can
    /// become: two flags, and every payload and CRC byte escaped.
    #[must_use]
    pub const fn worst_case_len(payload_len: usize) -> usize {
        2 + 2 * (payload_len + 2)
    }

    /// Append the framed form of `payload` to `out`.
    pub fn encode(&self, payload: &[u8], out: &mut Vec<u8>) {
        out.reserve(payload.len() + payload.len() / 8 + 6);
        out.push(FLAG);
        for &b in payload {
            push_escaped(out, b);
        }
        let [hi, lo] = crc16(payload).to_be_bytes();
        push_escaped(out, hi);
        push_escaped(out, lo);
        out.push(FLAG);
    }

    /// Convenience wrapper returning a fresh buffer.
    #[must_use]
    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(payload, &mut out);
        out
    }
}

fn push_escaped(out: &mut Vec<u8>, b: u8) {
    if b == FLAG || b == ESCAPE {
        out.push(ESCAPE);
        out.push(b ^ ESCAPE_XOR);
    } else {
        out.push(b);
    }
}
