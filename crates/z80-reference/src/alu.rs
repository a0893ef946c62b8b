//! ALU operations for the Z80.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.

use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, bit_if, sz53, sz53_wide, sz53p};

/// Result of an 8-bit ALU operation.
#[derive(Debug, Clone, Copy)]
pub struct AluResult {
    pub value: u8,
    pub flags: u8,
}

impl AluResult {
    const fn new(value: u8, flags: u8) -> Self {
        Self { value, flags }
    }
}

/// ADD/ADC.
#[must_use]
pub fn add8(a: u8, b: u8, carry: bool) -> AluResult {
    let c = u8::from(carry);
    let wide = u16::from(a) + u16::from(b) + u16::from(c);
    let value = wide as u8;
    let flags = sz53(value)
        | bit_if((a & 0x0F) + (b & 0x0F) + c > 0x0F, HF)
        | bit_if((a ^ b) & 0x80 == 0 && (a ^ value) & 0x80 != 0, PF)
        | bit_if(wide > 0xFF, CF);
    AluResult::new(value, flags)
}

/// SUB/SBC.
#[must_use]
pub fn sub8(a: u8, b: u8, carry: bool) -> AluResult {
    let c = u8::from(carry);
    let value = a.wrapping_sub(b).wrapping_sub(c);
    let flags = NF
        | sz53(value)
        | bit_if((a & 0x0F) < (b & 0x0F) + c, HF)
        | bit_if((a ^ b) & 0x80 != 0 && (b ^ value) & 0x80 == 0, PF)
        | bit_if(u16::from(a) < u16::from(b) + u16::from(c), CF);
    AluResult::new(value, flags)
}

/// CP: a subtract whose undocumented bits come from the operand.
#[must_use]
pub fn cp8(a: u8, b: u8) -> AluResult {
    let result = sub8(a, b, false);
    AluResult::new(a, (result.flags & !(YF | XF)) | (b & (YF | XF)))
}

#[must_use]
pub fn and8(a: u8, b: u8) -> AluResult {
    let value = a & b;
    AluResult::new(value, sz53p(value) | HF)
}

#[must_use]
pub fn or8(a: u8, b: u8) -> AluResult {
    let value = a | b;
    AluResult::new(value, sz53p(value))
}

#[must_use]
pub fn xor8(a: u8, b: u8) -> AluResult {
    let value = a ^ b;
    AluResult::new(value, sz53p(value))
}

/// The eight accumulator operations in opcode order (ADD ADC SUB SBC AND XOR OR CP).
#[must_use]
pub fn accumulate(op: u8, a: u8, b: u8, carry: bool) -> AluResult {
    match op & 7 {
        0 => add8(a, b, false),
        1 => add8(a, b, carry),
        2 => sub8(a, b, false),
        3 => sub8(a, b, carry),
        4 => and8(a, b),
        5 => xor8(a, b),
        6 => or8(a, b),
        _ => cp8(a, b),
    }
}

/// INC r. Carry is left to the caller.
#[must_use]
pub fn inc8(a: u8) -> AluResult {
    let value = a.wrapping_add(1);
    let flags = sz53(value) | bit_if(a & 0x0F == 0x0F, HF) | bit_if(a == 0x7F, PF);
    AluResult::new(value, flags)
}

/// DEC r. Carry is left to the caller.
#[must_use]
pub fn dec8(a: u8) -> AluResult {
    let value = a.wrapping_sub(1);
    let flags = NF | sz53(value) | bit_if(a & 0x0F == 0, HF) | bit_if(a == 0x80, PF);
    AluResult::new(value, flags)
}

/// CB-prefix rotates and shifts in opcode order
/// (RLC RRC RL RR SLA SRA SLL SRL).
#[must_use]
pub fn rotate(op: u8, a: u8, carry_in: bool) -> AluResult {
    let (value, carry_out) = match op & 7 {
        0 => (a.rotate_left(1), a & 0x80 != 0),
        1 => (a.rotate_right(1), a & 0x01 != 0),
        2 => ((a << 1) | u8::from(carry_in), a & 0x80 != 0),
        3 => ((a >> 1) | (u8::from(carry_in) << 7), a & 0x01 != 0),
        4 => (a << 1, a & 0x80 != 0),
        5 => ((a >> 1) | (a & 0x80), a & 0x01 != 0),
        6 => ((a << 1) | 1, a & 0x80 != 0),
        _ => (a >> 1, a & 0x01 != 0),
    };
    AluResult::new(value, sz53p(value) | bit_if(carry_out, CF))
}

/// BIT n,value. `xy_source` feeds the undocumented bits (the operand for
/// registers, the high byte of MEMPTR for memory operands).
#[must_use]
pub fn bit(n: u8, value: u8, xy_source: u8, old_flags: u8) -> u8 {
    let tested = value & (1 << (n & 7));
    let mut flags = (old_flags & CF) | HF | (xy_source & (YF | XF));
    if tested == 0 {
        flags |= ZF | PF;
    }
    if tested & 0x80 != 0 {
        flags |= SF;
    }
    flags
}

/// DAA.
#[must_use]
pub fn daa(a: u8, flags: u8) -> AluResult {
    let mut correction = 0u8;
    let mut carry = flags & CF != 0;
    if flags & HF != 0 || a & 0x0F > 9 {
        correction |= 0x06;
    }
    if carry || a > 0x99 {
        correction |= 0x60;
        carry = true;
    }
    let subtract = flags & NF != 0;
    let value = if subtract {
        a.wrapping_sub(correction)
    } else {
        a.wrapping_add(correction)
    };
    let half = if subtract {
        flags & HF != 0 && a & 0x0F < 6
    } else {
        a & 0x0F > 9
    };
    let out = sz53p(value) | (flags & NF) | bit_if(half, HF) | bit_if(carry, CF);
    AluResult::new(value, out)
}

/// ADD HL,rr. Returns the new value and the H/C/undocumented bits; S, Z
/// and P/V are preserved by the caller.
#[must_use]
pub fn add16(a: u16, b: u16) -> (u16, u8) {
    let wide = u32::from(a) + u32::from(b);
    let value = wide as u16;
    let flags = (((value >> 8) as u8) & (YF | XF))
        | bit_if((a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF, HF)
        | bit_if(wide > 0xFFFF, CF);
    (value, flags)
}

/// ADC HL,rr.
#[must_use]
pub fn adc16(a: u16, b: u16, carry: bool) -> (u16, u8) {
    let c = u16::from(carry);
    let wide = u32::from(a) + u32::from(b) + u32::from(c);
    let value = wide as u16;
    let flags = sz53_wide(value)
        | bit_if((a & 0x0FFF) + (b & 0x0FFF) + c > 0x0FFF, HF)
        | bit_if((a ^ b) & 0x8000 == 0 && (a ^ value) & 0x8000 != 0, PF)
        | bit_if(wide > 0xFFFF, CF);
    (value, flags)
}

/// SBC HL,rr.
#[must_use]
pub fn sbc16(a: u16, b: u16, carry: bool) -> (u16, u8) {
    let c = u16::from(carry);
    let value = a.wrapping_sub(b).wrapping_sub(c);
    let flags = NF
        | sz53_wide(value)
        | bit_if((a & 0x0FFF) < (b & 0x0FFF) + c, HF)
        | bit_if((a ^ b) & 0x8000 != 0 && (b ^ value) & 0x8000 == 0, PF)
        | bit_if(u32::from(a) < u32::from(b) + u32::from(c), CF);
    (value, flags)
}
