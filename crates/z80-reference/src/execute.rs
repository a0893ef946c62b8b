//! Instruction decode and execution.
//!
//! Opcodes are split into the usual x/y/z/p/q fields. DD and FD select an
//! index register that stands in for HL, H and L, except where `(HL)` is
//! already an operand: then the displaced memory operand takes the index
//! and the other register stays plain H or L.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_lossless)]

use raider_core::IoBus;

use crate::alu;
use crate::cpu::{Index, Z80};
use crate::flags::{self, CF, HF, NF, PF, SF, XF, YF, ZF, parity, sz53, sz53p};

const fn fields(op: u8) -> (u8, u8, u8) {
    (op >> 6, (op >> 3) & 7, op & 7)
}

impl Z80 {
    // === Register access ===

    fn index_reg(&self) -> u16 {
        match self.index {
            Index::Hl => self.regs.hl(),
            Index::Ix => self.regs.ix,
            Index::Iy => self.regs.iy,
        }
    }

    fn set_index_reg(&mut self, value: u16) {
        match self.index {
            Index::Hl => self.regs.set_hl(value),
            Index::Ix => self.regs.ix = value,
            Index::Iy => self.regs.iy = value,
        }
    }

    /// Register by 3-bit code, H/L ignoring any index prefix. Code 6 is
    /// memory and never reaches here.
    fn plain_reg(&self, r: u8) -> u8 {
        match r {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            _ => self.regs.a,
        }
    }

    fn set_plain_reg(&mut self, r: u8, value: u8) {
        match r {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            _ => self.regs.a = value,
        }
    }

    /// Register by 3-bit code with H/L replaced by the index halves.
    fn reg(&self, r: u8) -> u8 {
        match (r, self.index) {
            (4 | 5, Index::Ix | Index::Iy) => {
                let [lo, hi] = self.index_reg().to_le_bytes();
                if r == 4 { hi } else { lo }
            }
            _ => self.plain_reg(r),
        }
    }

    fn set_reg(&mut self, r: u8, value: u8) {
        match (r, self.index) {
            (4 | 5, Index::Ix | Index::Iy) => {
                let [lo, hi] = self.index_reg().to_le_bytes();
                let pair = if r == 4 { [lo, value] } else { [value, hi] };
                self.set_index_reg(u16::from_le_bytes(pair));
            }
            _ => self.set_plain_reg(r, value),
        }
    }

    fn rp(&self, p: u8) -> u16 {
        match p {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.index_reg(),
            _ => self.regs.sp,
        }
    }

    fn set_rp(&mut self, p: u8, value: u16) {
        match p {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_index_reg(value),
            _ => self.regs.sp = value,
        }
    }

    fn rp2(&self, p: u8) -> u16 {
        if p == 3 { self.regs.af() } else { self.rp(p) }
    }

    fn set_rp2(&mut self, p: u8, value: u16) {
        if p == 3 {
            self.regs.set_af(value);
        } else {
            self.set_rp(p, value);
        }
    }

    fn condition(&self, cc: u8) -> bool {
        flags::condition(cc, self.regs.f)
    }

    /// Address of the `(HL)` operand, fetching a displacement when indexed.
    fn operand_addr<B: IoBus>(&mut self, bus: &mut B) -> u16 {
        match self.index {
            Index::Hl => self.regs.hl(),
            Index::Ix | Index::Iy => {
                let disp = self.fetch_byte(bus) as i8;
                let addr = self.index_reg().wrapping_add_signed(i16::from(disp));
                self.regs.wz = addr;
                addr
            }
        }
    }

    fn jump_relative(&mut self, disp: u8) {
        self.regs.pc = self.regs.pc.wrapping_add_signed(i16::from(disp as i8));
        self.regs.wz = self.regs.pc;
    }

    fn alu_a(&mut self, op: u8, value: u8) {
        let result = alu::accumulate(op, self.regs.a, value, self.regs.f & CF != 0);
        self.regs.a = result.value;
        self.regs.f = result.flags;
    }

    // === Unprefixed (and DD/FD) ===

    pub(crate) fn execute_main<B: IoBus>(&mut self, bus: &mut B, op: u8) {
        let (x, y, z) = fields(op);
        let p = y >> 1;
        let q = y & 1;

        match (x, z) {
            (0, 0) => match y {
                // NOP
                0 => {}
                // EX AF,AF'
                1 => self.regs.swap_af(),
                // DJNZ d
                2 => {
                    let disp = self.fetch_byte(bus);
                    self.regs.b = self.regs.b.wrapping_sub(1);
                    if self.regs.b != 0 {
                        self.jump_relative(disp);
                    }
                }
                // JR d
                3 => {
                    let disp = self.fetch_byte(bus);
                    self.jump_relative(disp);
                }
                // JR cc,d
                _ => {
                    let disp = self.fetch_byte(bus);
                    if self.condition(y - 4) {
                        self.jump_relative(disp);
                    }
                }
            },

            // LD rp,nn
            (0, 1) if q == 0 => {
                let value = self.fetch_word(bus);
                self.set_rp(p, value);
            }

            // ADD HL,rp
            (0, 1) => {
                let lhs = self.index_reg();
                let (value, flags) = alu::add16(lhs, self.rp(p));
                self.regs.wz = lhs.wrapping_add(1);
                self.set_index_reg(value);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            (0, 2) => match (q, p) {
                // LD (BC),A / LD (DE),A
                (0, 0 | 1) => {
                    let addr = if p == 0 { self.regs.bc() } else { self.regs.de() };
                    self.write_mem(bus, addr, self.regs.a);
                    self.regs.wz = (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0xFF);
                }
                // LD (nn),HL
                (0, 2) => {
                    let addr = self.fetch_word(bus);
                    let value = self.index_reg();
                    self.write_word(bus, addr, value);
                    self.regs.wz = addr.wrapping_add(1);
                }
                // LD (nn),A
                (0, _) => {
                    let addr = self.fetch_word(bus);
                    self.write_mem(bus, addr, self.regs.a);
                    self.regs.wz = (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0xFF);
                }
                // LD A,(BC) / LD A,(DE)
                (_, 0 | 1) => {
                    let addr = if p == 0 { self.regs.bc() } else { self.regs.de() };
                    self.regs.a = self.read_mem(bus, addr);
                    self.regs.wz = addr.wrapping_add(1);
                }
                // LD HL,(nn)
                (_, 2) => {
                    let addr = self.fetch_word(bus);
                    let value = self.read_word(bus, addr);
                    self.set_index_reg(value);
                    self.regs.wz = addr.wrapping_add(1);
                }
                // LD A,(nn)
                _ => {
                    let addr = self.fetch_word(bus);
                    self.regs.a = self.read_mem(bus, addr);
                    self.regs.wz = addr.wrapping_add(1);
                }
            },

            // INC rp / DEC rp
            (0, 3) => {
                let value = self.rp(p);
                let value = if q == 0 { value.wrapping_add(1) } else { value.wrapping_sub(1) };
                self.set_rp(p, value);
            }

            // INC r / DEC r
            (0, 4 | 5) => {
                let step = if z == 4 { alu::inc8 } else { alu::dec8 };
                if y == 6 {
                    let addr = self.operand_addr(bus);
                    let value = self.read_mem(bus, addr);
                    let result = step(value);
                    self.write_mem(bus, addr, result.value);
                    self.regs.f = (self.regs.f & CF) | result.flags;
                } else {
                    let result = step(self.reg(y));
                    self.set_reg(y, result.value);
                    self.regs.f = (self.regs.f & CF) | result.flags;
                }
            }

            // LD r,n
            (0, 6) => {
                if y == 6 {
                    let addr = self.operand_addr(bus);
                    let value = self.fetch_byte(bus);
                    self.write_mem(bus, addr, value);
                } else {
                    let value = self.fetch_byte(bus);
                    self.set_reg(y, value);
                }
            }

            (0, _) => self.execute_accumulator_op(y),

            // HALT
            (1, 6) if y == 6 => self.regs.halted = true,

            // LD r,(HL)
            (1, 6) => {
                let addr = self.operand_addr(bus);
                let value = self.read_mem(bus, addr);
                self.set_plain_reg(y, value);
            }

            // LD (HL),r
            (1, _) if y == 6 => {
                let addr = self.operand_addr(bus);
                self.write_mem(bus, addr, self.plain_reg(z));
            }

            // LD r,r'
            (1, _) => {
                let value = self.reg(z);
                self.set_reg(y, value);
            }

            // ALU A,(HL)
            (2, 6) => {
                let addr = self.operand_addr(bus);
                let value = self.read_mem(bus, addr);
                self.alu_a(y, value);
            }

            // ALU A,r
            (2, _) => self.alu_a(y, self.reg(z)),

            // RET cc
            (3, 0) => {
                if self.condition(y) {
                    self.regs.pc = self.pop(bus);
                    self.regs.wz = self.regs.pc;
                }
            }

            // POP rp2
            (3, 1) if q == 0 => {
                let value = self.pop(bus);
                self.set_rp2(p, value);
            }

            (3, 1) => match p {
                // RET
                0 => {
                    self.regs.pc = self.pop(bus);
                    self.regs.wz = self.regs.pc;
                }
                // EXX
                1 => self.regs.swap_main(),
                // JP (HL)
                2 => self.regs.pc = self.index_reg(),
                // LD SP,HL
                _ => self.regs.sp = self.index_reg(),
            },

            // JP cc,nn
            (3, 2) => {
                let target = self.fetch_word(bus);
                self.regs.wz = target;
                if self.condition(y) {
                    self.regs.pc = target;
                }
            }

            (3, 3) => match y {
                // JP nn
                0 => {
                    let target = self.fetch_word(bus);
                    self.regs.wz = target;
                    self.regs.pc = target;
                }
                // OUT (n),A
                2 => {
                    let n = self.fetch_byte(bus);
                    let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                    self.port_out(bus, port, self.regs.a);
                }
                // IN A,(n)
                3 => {
                    let n = self.fetch_byte(bus);
                    let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                    self.regs.a = self.port_in(bus, port);
                    self.regs.wz = port.wrapping_add(1);
                }
                // EX (SP),HL
                4 => {
                    let sp = self.regs.sp;
                    let value = self.read_word(bus, sp);
                    let [lo, hi] = self.index_reg().to_le_bytes();
                    self.write_mem(bus, sp.wrapping_add(1), hi);
                    self.write_mem(bus, sp, lo);
                    self.set_index_reg(value);
                    self.regs.wz = value;
                }
                // EX DE,HL
                5 => {
                    let de = self.regs.de();
                    self.regs.set_de(self.regs.hl());
                    self.regs.set_hl(de);
                }
                // DI
                6 => {
                    self.regs.iff1 = false;
                    self.regs.iff2 = false;
                }
                // EI
                7 => {
                    self.regs.iff1 = true;
                    self.regs.iff2 = true;
                }
                // CB is decoded before we get here
                _ => {}
            },

            // CALL cc,nn
            (3, 4) => {
                let target = self.fetch_word(bus);
                self.regs.wz = target;
                if self.condition(y) {
                    self.push(bus, self.regs.pc);
                    self.regs.pc = target;
                }
            }

            // PUSH rp2
            (3, 5) if q == 0 => {
                let value = self.rp2(p);
                self.push(bus, value);
            }

            // CALL nn
            (3, 5) if p == 0 => {
                let target = self.fetch_word(bus);
                self.regs.wz = target;
                self.push(bus, self.regs.pc);
                self.regs.pc = target;
            }

            // DD, ED, FD are decoded before we get here
            (3, 5) => {}

            // ALU A,n
            (3, 6) => {
                let value = self.fetch_byte(bus);
                self.alu_a(y, value);
            }

            // RST
            _ => {
                self.push(bus, self.regs.pc);
                self.regs.pc = u16::from(y) * 8;
                self.regs.wz = self.regs.pc;
            }
        }
    }

    fn execute_accumulator_op(&mut self, y: u8) {
        let a = self.regs.a;
        let f = self.regs.f;
        match y {
            // RLCA
            0 => {
                let carry = a >> 7;
                self.regs.a = a.rotate_left(1);
                self.regs.f = (f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
            }
            // RRCA
            1 => {
                let carry = a & 1;
                self.regs.a = a.rotate_right(1);
                self.regs.f = (f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
            }
            // RLA
            2 => {
                self.regs.a = (a << 1) | (f & CF);
                self.regs.f = (f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | (a >> 7);
            }
            // RRA
            3 => {
                self.regs.a = (a >> 1) | ((f & CF) << 7);
                self.regs.f = (f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | (a & 1);
            }
            // DAA
            4 => {
                let result = alu::daa(a, f);
                self.regs.a = result.value;
                self.regs.f = result.flags;
            }
            // CPL
            5 => {
                self.regs.a = !a;
                self.regs.f = (f & (SF | ZF | PF | CF)) | HF | NF | (self.regs.a & (YF | XF));
            }
            // SCF
            6 => self.regs.f = (f & (SF | ZF | PF)) | (a & (YF | XF)) | CF,
            // CCF
            _ => {
                let half = if f & CF != 0 { HF } else { 0 };
                self.regs.f = ((f & (SF | ZF | PF)) | (a & (YF | XF)) | half | (f & CF)) ^ CF;
            }
        }
    }

    // === CB ===

    fn bit_op(&mut self, x: u8, y: u8, value: u8) -> u8 {
        match x {
            0 => {
                let result = alu::rotate(y, value, self.regs.f & CF != 0);
                self.regs.f = result.flags;
                result.value
            }
            2 => value & !(1 << y),
            _ => value | (1 << y),
        }
    }

    pub(crate) fn execute_cb<B: IoBus>(&mut self, bus: &mut B, op: u8) {
        let (x, y, z) = fields(op);
        if z == 6 {
            let addr = self.regs.hl();
            let value = self.read_mem(bus, addr);
            if x == 1 {
                self.regs.f = alu::bit(y, value, (self.regs.wz >> 8) as u8, self.regs.f);
            } else {
                let result = self.bit_op(x, y, value);
                self.write_mem(bus, addr, result);
            }
        } else {
            let value = self.plain_reg(z);
            if x == 1 {
                self.regs.f = alu::bit(y, value, value, self.regs.f);
            } else {
                let result = self.bit_op(x, y, value);
                self.set_plain_reg(z, result);
            }
        }
    }

    /// DDCB/FDCB. The result is also copied to register `z` unless `z` is 6.
    pub(crate) fn execute_index_cb<B: IoBus>(&mut self, bus: &mut B, disp: i8, op: u8) {
        let (x, y, z) = fields(op);
        let addr = self.index_reg().wrapping_add_signed(i16::from(disp));
        self.regs.wz = addr;
        let value = self.read_mem(bus, addr);
        if x == 1 {
            self.regs.f = alu::bit(y, value, (addr >> 8) as u8, self.regs.f);
            return;
        }
        let result = self.bit_op(x, y, value);
        self.write_mem(bus, addr, result);
        if z != 6 {
            self.set_plain_reg(z, result);
        }
    }

    // === ED ===

    pub(crate) fn execute_ed<B: IoBus>(&mut self, bus: &mut B, op: u8) {
        let (x, y, z) = fields(op);
        let p = y >> 1;
        let q = y & 1;

        match (x, z) {
            // IN r,(C)
            (1, 0) => {
                let port = self.regs.bc();
                let value = self.port_in(bus, port);
                if y != 6 {
                    self.set_plain_reg(y, value);
                }
                self.regs.f = (self.regs.f & CF) | sz53p(value);
                self.regs.wz = port.wrapping_add(1);
            }
            // OUT (C),r
            (1, 1) => {
                let port = self.regs.bc();
                let value = if y == 6 { 0 } else { self.plain_reg(y) };
                self.port_out(bus, port, value);
                self.regs.wz = port.wrapping_add(1);
            }
            // SBC HL,rp / ADC HL,rp
            (1, 2) => {
                let hl = self.regs.hl();
                let carry = self.regs.f & CF != 0;
                let (value, flags) = if q == 0 {
                    alu::sbc16(hl, self.rp(p), carry)
                } else {
                    alu::adc16(hl, self.rp(p), carry)
                };
                self.regs.wz = hl.wrapping_add(1);
                self.regs.set_hl(value);
                self.regs.f = flags;
            }
            // LD (nn),rp / LD rp,(nn)
            (1, 3) => {
                let addr = self.fetch_word(bus);
                if q == 0 {
                    let value = self.rp(p);
                    self.write_word(bus, addr, value);
                } else {
                    let value = self.read_word(bus, addr);
                    self.set_rp(p, value);
                }
                self.regs.wz = addr.wrapping_add(1);
            }
            // NEG
            (1, 4) => {
                let result = alu::sub8(0, self.regs.a, false);
                self.regs.a = result.value;
                self.regs.f = result.flags;
            }
            // RETN / RETI
            (1, 5) => {
                self.regs.pc = self.pop(bus);
                self.regs.wz = self.regs.pc;
                self.regs.iff1 = self.regs.iff2;
            }
            // IM
            (1, 6) => {
                self.regs.im = match y & 3 {
                    0 | 1 => 0,
                    2 => 1,
                    _ => 2,
                };
            }
            (1, _) => self.execute_ed_misc(bus, y),
            (2, 0..=3) if y >= 4 => self.execute_block(bus, y, z),
            // Everything else is a two-byte NOP
            _ => {}
        }
    }

    fn execute_ed_misc<B: IoBus>(&mut self, bus: &mut B, y: u8) {
        match y {
            // LD I,A
            0 => self.regs.i = self.regs.a,
            // LD R,A
            1 => self.regs.r = self.regs.a,
            // LD A,I / LD A,R
            2 | 3 => {
                self.regs.a = if y == 2 { self.regs.i } else { self.regs.r };
                let iff = if self.regs.iff2 { PF } else { 0 };
                self.regs.f = (self.regs.f & CF) | sz53(self.regs.a) | iff;
            }
            // RRD / RLD
            4 | 5 => {
                let addr = self.regs.hl();
                let value = self.read_mem(bus, addr);
                let a = self.regs.a;
                let (stored, low) = if y == 4 {
                    ((value >> 4) | (a << 4), value & 0x0F)
                } else {
                    ((value << 4) | (a & 0x0F), value >> 4)
                };
                self.regs.a = (a & 0xF0) | low;
                self.write_mem(bus, addr, stored);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                self.regs.wz = addr.wrapping_add(1);
            }
            _ => {}
        }
    }

    /// LDI/CPI/INI/OUTI and their decrementing and repeating forms. A
    /// repeating form runs one iteration and rewinds PC onto itself.
    fn execute_block<B: IoBus>(&mut self, bus: &mut B, y: u8, z: u8) {
        let decrement = y & 1 == 1;
        let repeat = y >= 6;
        let hl = self.regs.hl();
        let next_hl = if decrement { hl.wrapping_sub(1) } else { hl.wrapping_add(1) };

        let again = match z {
            // LDI
            0 => {
                let value = self.read_mem(bus, hl);
                let de = self.regs.de();
                self.write_mem(bus, de, value);
                self.regs.set_hl(next_hl);
                self.regs
                    .set_de(if decrement { de.wrapping_sub(1) } else { de.wrapping_add(1) });
                let bc = self.regs.bc().wrapping_sub(1);
                self.regs.set_bc(bc);
                let n = value.wrapping_add(self.regs.a);
                self.regs.f = (self.regs.f & (SF | ZF | CF))
                    | ((n & 0x02) << 4)
                    | (n & XF)
                    | if bc != 0 { PF } else { 0 };
                bc != 0
            }
            // CPI
            1 => {
                let value = self.read_mem(bus, hl);
                let result = alu::sub8(self.regs.a, value, false);
                self.regs.set_hl(next_hl);
                let bc = self.regs.bc().wrapping_sub(1);
                self.regs.set_bc(bc);
                let n = result.value.wrapping_sub(u8::from(result.flags & HF != 0));
                self.regs.f = (self.regs.f & CF)
                    | (result.flags & (SF | ZF | HF))
                    | NF
                    | ((n & 0x02) << 4)
                    | (n & XF)
                    | if bc != 0 { PF } else { 0 };
                bc != 0 && result.value != 0
            }
            // INI
            2 => {
                let port = self.regs.bc();
                let value = self.port_in(bus, port);
                self.write_mem(bus, hl, value);
                self.regs.set_hl(next_hl);
                self.regs.b = self.regs.b.wrapping_sub(1);
                let c = if decrement {
                    self.regs.c.wrapping_sub(1)
                } else {
                    self.regs.c.wrapping_add(1)
                };
                self.block_io_flags(value, c);
                self.regs.b != 0
            }
            // OUTI
            _ => {
                let value = self.read_mem(bus, hl);
                self.regs.b = self.regs.b.wrapping_sub(1);
                let port = self.regs.bc();
                self.port_out(bus, port, value);
                self.regs.set_hl(next_hl);
                self.block_io_flags(value, self.regs.l);
                self.regs.b != 0
            }
        };

        if repeat && again {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.regs.wz = self.regs.pc.wrapping_add(1);
        }
    }

    fn block_io_flags(&mut self, value: u8, addend: u8) {
        let k = u16::from(value) + u16::from(addend);
        let b = self.regs.b;
        let carry = if k > 0xFF { HF | CF } else { 0 };
        let pv = if parity(((k as u8) & 7) ^ b) { PF } else { 0 };
        let n = if value & 0x80 != 0 { NF } else { 0 };
        self.regs.f = sz53(b) | carry | pv | n;
    }
}
