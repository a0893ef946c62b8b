//! Record state machine.

/// Which machine a record is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// `S` records.
    Bridge,
    /// `T` records.
    Machine,
}

/// Where in a record the decoder is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Init,
    RecType,
    Len,
    Addr,
    Data,
    Checksum,
}

/// Something a complete record produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Header { target: Target, bytes: Vec<u8> },
    Data { target: Target, addr: u32, bytes: Vec<u8> },
    Count { target: Target, count: u32 },
    Start { target: Target, addr: u32 },
    ChecksumError,
    BadRecord,
}

/// Decoder state between characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderState {
    phase: Phase,
    target: Target,
    rec_type: u8,
    addr_bytes: u8,
    addr_seen: u8,
    // Address and data bytes still to come
    remaining: u8,
    addr: u32,
    data: Vec<u8>,
    sum: u8,
    high_nibble: Option<u8>,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self {
            phase: Phase::Init,
            target: Target::Bridge,
            rec_type: 0,
            addr_bytes: 0,
            addr_seen: 0,
            remaining: 0,
            addr: 0,
            data: Vec::new(),
            sum: 0,
            high_nibble: None,
        }
    }
}

impl DecoderState {
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    fn begin(target: Target) -> Self {
        Self {
            phase: Phase::RecType,
            target,
            ..Self::default()
        }
    }
}

const fn address_bytes(rec_type: u8) -> Option<u8> {
    match rec_type {
        0 | 1 | 5 | 9 => Some(2),
        2 | 6 | 8 => Some(3),
        3 | 7 => Some(4),
        _ => None,
    }
}

const fn record_target(ch: u8) -> Option<Target> {
    match ch {
        b'S' => Some(Target::Bridge),
        b'T' => Some(Target::Machine),
        _ => None,
    }
}

fn bad_record(ch: u8) -> (DecoderState, Option<Event>) {
    // A fresh record marker resynchronises straight away
    let next = record_target(ch).map_or_else(DecoderState::default, DecoderState::begin);
    (next, Some(Event::BadRecord))
}

/// Advance the decoder by one input character.
#[must_use]
pub fn step(mut state: DecoderState, ch: u8) -> (DecoderState, Option<Event>) {
    match state.phase {
        Phase::Init => {
            // Anything between records (line ends, whitespace) is skipped
            let next = record_target(ch).map_or(state, DecoderState::begin);
            return (next, None);
        }
        Phase::RecType => {
            let Some(addr_bytes) = (ch as char)
                .to_digit(10)
                .and_then(|d| address_bytes(d as u8))
            else {
                return bad_record(ch);
            };
            state.rec_type = ch - b'0';
            state.addr_bytes = addr_bytes;
            state.phase = Phase::Len;
            return (state, None);
        }
        Phase::Len | Phase::Addr | Phase::Data | Phase::Checksum => {}
    }

    let Some(nibble) = (ch as char).to_digit(16) else {
        return bad_record(ch);
    };
    let nibble = nibble as u8;
    let Some(high) = state.high_nibble.take() else {
        state.high_nibble = Some(nibble);
        return (state, None);
    };
    let byte = (high << 4) | nibble;

    match state.phase {
        Phase::Len => {
            // Length covers address, data and checksum
            if byte <= state.addr_bytes {
                return bad_record(ch);
            }
            state.sum = byte;
            state.remaining = byte - 1;
            state.phase = Phase::Addr;
            (state, None)
        }
        Phase::Addr => {
            state.addr = (state.addr << 8) | u32::from(byte);
            state.sum = state.sum.wrapping_add(byte);
            state.remaining -= 1;
            state.addr_seen += 1;
            if state.addr_seen == state.addr_bytes {
                state.phase = if state.remaining == 0 { Phase::Checksum } else { Phase::Data };
            }
            (state, None)
        }
        Phase::Data => {
            state.data.push(byte);
            state.sum = state.sum.wrapping_add(byte);
            state.remaining -= 1;
            if state.remaining == 0 {
                state.phase = Phase::Checksum;
            }
            (state, None)
        }
        _ => {
            let event = if !state.sum == byte {
                finish(state)
            } else {
                Event::ChecksumError
            };
            (DecoderState::default(), Some(event))
        }
    }
}

fn finish(state: DecoderState) -> Event {
    let target = state.target;
    match state.rec_type {
        0 => Event::Header { target, bytes: state.data },
        1..=3 => Event::Data { target, addr: state.addr, bytes: state.data },
        5 | 6 => Event::Count { target, count: state.addr },
        _ => Event::Start { target, addr: state.addr },
    }
}

/// Streaming wrapper around [`step`].
#[derive(Debug, Default)]
pub struct SrecDecoder {
    state: DecoderState,
}

impl SrecDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ch: u8) -> Option<Event> {
        let (next, event) = step(std::mem::take(&mut self.state), ch);
        self.state = next;
        event
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> Vec<Event> {
        let mut decoder = SrecDecoder::new();
        text.bytes().filter_map(|ch| decoder.push(ch)).collect()
    }

    #[test]
    fn data_record() {
        let events = run("S1070000C30020FF16\n");
        assert_eq!(
            events,
            vec![Event::Data {
                target: Target::Bridge,
                addr: 0,
                bytes: vec![0xC3, 0x00, 0x20, 0xFF],
            }]
        );
    }

    #[test]
    fn machine_prefix_selects_target() {
        let events = run("T1070000C30020FF16");
        assert!(matches!(events[0], Event::Data { target: Target::Machine, .. }));
    }

    #[test]
    fn checksum_mismatch() {
        assert_eq!(run("S1070000C30020FF17"), vec![Event::ChecksumError]);
    }

    #[test]
    fn invalid_type_resyncs_on_next_record() {
        let events = run("S4S9030000FC");
        assert_eq!(
            events,
            vec![Event::BadRecord, Event::Start { target: Target::Bridge, addr: 0 }]
        );
    }

    #[test]
    fn lowercase_prefix_is_not_a_record() {
        assert!(run("s1070000C30020FF16").is_empty());
    }

    #[test]
    fn decoder_returns_to_init_between_records() {
        let mut decoder = SrecDecoder::new();
        for ch in "S9030000FC".bytes() {
            decoder.push(ch);
        }
        assert_eq!(decoder.phase(), Phase::Init);
    }
}
