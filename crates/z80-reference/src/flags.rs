//! F register layout and the result-flag helpers shared by the ALU and the
//! instruction decoder.
//!
//! ```text
//! bit  7  6  5  4  3  2   1  0
//!      S  Z  Y  H  X  P/V N  C
//! ```
//!
//! Y and X are undocumented copies of bits 5 and 3 of the result. The
//! reference core tracks them exactly because they leak onto the data bus
//! through `PUSH AF`, which the tracer compares cycle by cycle.

pub const SF: u8 = 0x80;
pub const ZF: u8 = 0x40;
pub const YF: u8 = 0x20;
pub const HF: u8 = 0x10;
pub const XF: u8 = 0x08;
pub const PF: u8 = 0x04;
pub const NF: u8 = 0x02;
pub const CF: u8 = 0x01;

/// `flag` when `cond` holds, else nothing.
#[must_use]
pub const fn bit_if(cond: bool, flag: u8) -> u8 {
    if cond { flag } else { 0 }
}

#[must_use]
pub const fn parity(value: u8) -> bool {
    value.count_ones().is_multiple_of(2)
}

/// S, Z, Y and X for an 8-bit result.
#[must_use]
pub const fn sz53(value: u8) -> u8 {
    (value & (SF | YF | XF)) | bit_if(value == 0, ZF)
}

#[must_use]
pub const fn sz53p(value: u8) -> u8 {
    sz53(value) | bit_if(parity(value), PF)
}

/// S, Z, Y and X for a 16-bit result. S, Y and X come from the high byte.
#[must_use]
pub const fn sz53_wide(value: u16) -> u8 {
    let high = value.to_be_bytes()[0];
    (high & (SF | YF | XF)) | bit_if(value == 0, ZF)
}

/// Condition code `cc` (NZ Z NC C PO PE P M) against flags `f`.
#[must_use]
pub const fn condition(cc: u8, f: u8) -> bool {
    let flag = match cc >> 1 {
        0 => ZF,
        1 => CF,
        2 => PF,
        _ => SF,
    };
    (f & flag != 0) == (cc & 1 != 0)
}
