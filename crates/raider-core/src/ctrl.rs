//! Control-bus flag bits and the bus cycle record.
//!
//! The low five bits are what a cycle *is*; the rest are markers the
//! hardware layer attaches for diagnostics and never take part in a
//! comparison between an observed and an expected cycle.

use bitflags::bitflags;

bitflags! {
    /// Control-bus state of one bus cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CtrlFlags: u32 {
        /// Read cycle.
        const RD = 0x01;
        /// Write cycle.
        const WR = 0x02;
        /// Memory request.
        const MREQ = 0x04;
        /// I/O request.
        const IORQ = 0x08;
        /// Opcode fetch (M1).
        const M1 = 0x10;
        /// Transaction boundary marker.
        const TRANSACTION = 0x20;
        /// Refresh cycle marker.
        const REFRESH = 0x40;
        /// Queued-access marker.
        const QUEUED = 0x80;
        /// The cycle was not decoded by any handler.
        const NO_DECODE = 0x100;
    }
}

impl CtrlFlags {
    /// Bits that identify the kind of cycle.
    pub const CYCLE_MASK: Self = Self::RD
        .union(Self::WR)
        .union(Self::MREQ)
        .union(Self::IORQ)
        .union(Self::M1);

    const LETTERS: [(Self, char); 9] = [
        (Self::RD, 'R'),
        (Self::WR, 'W'),
        (Self::MREQ, 'M'),
        (Self::IORQ, 'I'),
        (Self::M1, '1'),
        (Self::TRANSACTION, 'T'),
        (Self::REFRESH, 'X'),
        (Self::QUEUED, 'Q'),
        (Self::NO_DECODE, 'N'),
    ];

    /// The cycle-kind bits only.
    #[must_use]
    pub const fn cycle_kind(self) -> Self {
        self.intersection(Self::CYCLE_MASK)
    }

    /// Nine-character rendering, one column per bit, `blank` for clear bits.
    #[must_use]
    pub fn letters(self, blank: char) -> String {
        Self::LETTERS
            .iter()
            .map(|&(bit, ch)| if self.contains(bit) { ch } else { blank })
            .collect()
    }
}

/// One observed or predicted bus cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusCycle {
    pub addr: u16,
    pub data: u8,
    pub flags: CtrlFlags,
}

impl BusCycle {
    #[must_use]
    pub const fn new(addr: u16, data: u8, flags: CtrlFlags) -> Self {
        Self { addr, data, flags }
    }

    #[must_use]
    pub const fn is_memory(&self) -> bool {
        self.flags.contains(CtrlFlags::MREQ)
    }

    #[must_use]
    pub const fn is_io(&self) -> bool {
        self.flags.contains(CtrlFlags::IORQ)
    }

    #[must_use]
    pub const fn is_write(&self) -> bool {
        self.flags.contains(CtrlFlags::WR)
    }

    #[must_use]
    pub const fn is_opcode_fetch(&self) -> bool {
        self.flags.contains(CtrlFlags::M1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_values_are_fixed() {
        assert_eq!(CtrlFlags::RD.bits(), 0x01);
        assert_eq!(CtrlFlags::WR.bits(), 0x02);
        assert_eq!(CtrlFlags::MREQ.bits(), 0x04);
        assert_eq!(CtrlFlags::IORQ.bits(), 0x08);
        assert_eq!(CtrlFlags::M1.bits(), 0x10);
        assert_eq!(CtrlFlags::CYCLE_MASK.bits(), 0x1F);
    }

    #[test]
    fn letters_render_one_column_per_bit() {
        let fetch = CtrlFlags::RD | CtrlFlags::MREQ | CtrlFlags::M1;
        assert_eq!(fetch.letters('.'), "R.M.1....");
        assert_eq!((CtrlFlags::WR | CtrlFlags::NO_DECODE).letters(' '), " W      N");
    }

    #[test]
    fn cycle_kind_drops_markers() {
        let flags = CtrlFlags::RD | CtrlFlags::IORQ | CtrlFlags::QUEUED;
        assert_eq!(flags.cycle_kind(), CtrlFlags::RD | CtrlFlags::IORQ);
    }
}
