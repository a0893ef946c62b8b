//! Z80 register file.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.

/// Complete register snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,

    // Alternate set, swapped in by EX AF,AF' and EXX
    pub a_alt: u8,
    pub f_alt: u8,
    pub b_alt: u8,
    pub c_alt: u8,
    pub d_alt: u8,
    pub e_alt: u8,
    pub h_alt: u8,
    pub l_alt: u8,

    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,

    /// MEMPTR. Leaks into the undocumented flags of BIT n,(HL).
    pub wz: u16,

    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub halted: bool,
}

impl Registers {
    #[must_use]
    pub const fn af(&self) -> u16 {
        (self.a as u16) << 8 | self.f as u16
    }

    #[must_use]
    pub const fn bc(&self) -> u16 {
        (self.b as u16) << 8 | self.c as u16
    }

    #[must_use]
    pub const fn de(&self) -> u16 {
        (self.d as u16) << 8 | self.e as u16
    }

    #[must_use]
    pub const fn hl(&self) -> u16 {
        (self.h as u16) << 8 | self.l as u16
    }

    pub fn set_af(&mut self, value: u16) {
        self.a = (value >> 8) as u8;
        self.f = value as u8;
    }

    pub fn set_bc(&mut self, value: u16) {
        self.b = (value >> 8) as u8;
        self.c = value as u8;
    }

    pub fn set_de(&mut self, value: u16) {
        self.d = (value >> 8) as u8;
        self.e = value as u8;
    }

    pub fn set_hl(&mut self, value: u16) {
        self.h = (value >> 8) as u8;
        self.l = value as u8;
    }

    /// EX AF,AF'
    pub fn swap_af(&mut self) {
        std::mem::swap(&mut self.a, &mut self.a_alt);
        std::mem::swap(&mut self.f, &mut self.f_alt);
    }

    /// EXX
    pub fn swap_main(&mut self) {
        std::mem::swap(&mut self.b, &mut self.b_alt);
        std::mem::swap(&mut self.c, &mut self.c_alt);
        std::mem::swap(&mut self.d, &mut self.d_alt);
        std::mem::swap(&mut self.e, &mut self.e_alt);
        std::mem::swap(&mut self.h, &mut self.h_alt);
        std::mem::swap(&mut self.l, &mut self.l_alt);
    }

    /// One-line dump used by register queries.
    #[must_use]
    pub fn formatted(&self) -> String {
        format!(
            "PC={:04x} SP={:04x} BC={:04x} AF={:04x} HL={:04x} DE={:04x} IX={:04x} IY={:04x} \
             AF'={:04x} BC'={:04x} HL'={:04x} DE'={:04x} I={:02x} R={:02x} F={} IM{} IFF{}{}",
            self.pc,
            self.sp,
            self.bc(),
            self.af(),
            self.hl(),
            self.de(),
            self.ix,
            self.iy,
            u16::from(self.a_alt) << 8 | u16::from(self.f_alt),
            u16::from(self.b_alt) << 8 | u16::from(self.c_alt),
            u16::from(self.h_alt) << 8 | u16::from(self.l_alt),
            u16::from(self.d_alt) << 8 | u16::from(self.e_alt),
            self.i,
            self.r,
            flag_letters(self.f),
            self.im,
            u8::from(self.iff1),
            u8::from(self.iff2),
        )
    }
}

fn flag_letters(f: u8) -> String {
    "SZ5H3PNC"
        .chars()
        .enumerate()
        .map(|(i, ch)| if f & (0x80 >> i) != 0 { ch } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_round_trip_through_halves() {
        let mut regs = Registers::default();
        regs.set_hl(0x1234);
        assert_eq!((regs.h, regs.l), (0x12, 0x34));
        regs.swap_main();
        assert_eq!(regs.hl(), 0);
        assert_eq!((regs.h_alt, regs.l_alt), (0x12, 0x34));
    }

    #[test]
    fn formatted_dump_leads_with_pc_and_sp() {
        let regs = Registers {
            pc: 0x8000,
            sp: 0xFFF0,
            f: 0x41,
            ..Registers::default()
        };
        let text = regs.formatted();
        assert!(text.starts_with("PC=8000 SP=fff0"), "{text}");
        assert!(text.contains("F=-Z-----C"), "{text}");
    }
}
