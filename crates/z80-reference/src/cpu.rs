//! Z80 state, bus helpers and the per-instruction step.

#![allow(clippy::cast_possible_truncation)]

use raider_core::{BusCycle, CtrlFlags, IoBus};

use crate::registers::Registers;

/// Upper bound on recorded cycles for one instruction. The longest Z80
/// instruction touches the bus six times; anything beyond the bound is
/// executed but not recorded.
pub const MAX_STEP_CYCLES: usize = 10;

const FETCH: CtrlFlags = CtrlFlags::RD.union(CtrlFlags::MREQ).union(CtrlFlags::M1);
const MEM_READ: CtrlFlags = CtrlFlags::RD.union(CtrlFlags::MREQ);
const MEM_WRITE: CtrlFlags = CtrlFlags::WR.union(CtrlFlags::MREQ);
const IO_READ: CtrlFlags = CtrlFlags::RD.union(CtrlFlags::IORQ);
const IO_WRITE: CtrlFlags = CtrlFlags::WR.union(CtrlFlags::IORQ);

/// Ordered bus cycles produced by one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCycles {
    cycles: [BusCycle; MAX_STEP_CYCLES],
    len: usize,
}

impl StepCycles {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            cycles: [BusCycle::new(0, 0, CtrlFlags::empty()); MAX_STEP_CYCLES],
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<BusCycle> {
        self.as_slice().get(index).copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[BusCycle] {
        &self.cycles[..self.len]
    }

    fn push(&mut self, cycle: BusCycle) {
        if self.len < MAX_STEP_CYCLES {
            self.cycles[self.len] = cycle;
            self.len += 1;
        }
    }

    fn pop(&mut self) {
        self.len = self.len.saturating_sub(1);
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for StepCycles {
    fn default() -> Self {
        Self::empty()
    }
}

/// Which register pair stands in for HL in the current instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Index {
    Hl,
    Ix,
    Iy,
}

/// Instruction-stepped Z80.
pub struct Z80 {
    pub(crate) regs: Registers,
    pub(crate) index: Index,
    log: StepCycles,
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        let mut cpu = Self {
            regs: Registers::default(),
            index: Index::Hl,
            log: StepCycles::empty(),
        };
        cpu.reset();
        cpu
    }

    /// Power-on/reset state: PC, I, R cleared, interrupts off, IM 0,
    /// AF and SP all ones.
    pub fn reset(&mut self) {
        self.regs.pc = 0;
        self.regs.i = 0;
        self.regs.r = 0;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.im = 0;
        self.regs.halted = false;
        self.regs.sp = 0xFFFF;
        self.regs.set_af(0xFFFF);
        self.regs.wz = 0;
        self.index = Index::Hl;
        self.log.clear();
    }

    #[must_use]
    pub const fn registers(&self) -> Registers {
        self.regs
    }

    pub fn set_registers(&mut self, regs: Registers) {
        self.regs = regs;
    }

    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.regs.pc
    }

    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.regs.halted
    }

    /// Execute one instruction and return the bus cycles it produced.
    ///
    /// A halted CPU repeats an opcode fetch at PC without advancing. A prefix
    /// followed by another DD/FD prefix counts as a one-fetch instruction of
    /// its own, as it does on the real part.
    pub fn step<B: IoBus>(&mut self, bus: &mut B) -> StepCycles {
        self.log.clear();
        self.index = Index::Hl;

        if self.regs.halted {
            let pc = self.regs.pc;
            let op = bus.read(pc);
            self.record(pc, op, FETCH);
            self.bump_r();
            return self.log;
        }

        let op = self.fetch_opcode(bus);
        match op {
            0xDD | 0xFD => {
                self.index = if op == 0xDD { Index::Ix } else { Index::Iy };
                let next = self.fetch_opcode(bus);
                match next {
                    0xDD | 0xFD => {
                        // Leave the second prefix for the next step
                        self.unfetch();
                        self.index = Index::Hl;
                    }
                    0xED => {
                        self.index = Index::Hl;
                        let ed = self.fetch_opcode(bus);
                        self.execute_ed(bus, ed);
                    }
                    0xCB => {
                        let disp = self.fetch_byte(bus) as i8;
                        let cb = self.fetch_byte(bus);
                        self.execute_index_cb(bus, disp, cb);
                    }
                    _ => self.execute_main(bus, next),
                }
            }
            0xCB => {
                let cb = self.fetch_opcode(bus);
                self.execute_cb(bus, cb);
            }
            0xED => {
                let ed = self.fetch_opcode(bus);
                self.execute_ed(bus, ed);
            }
            _ => self.execute_main(bus, op),
        }
        self.index = Index::Hl;
        self.log
    }

    // === Bus helpers ===

    fn record(&mut self, addr: u16, data: u8, flags: CtrlFlags) {
        self.log.push(BusCycle::new(addr, data, flags));
    }

    fn bump_r(&mut self) {
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
    }

    fn unfetch(&mut self) {
        self.regs.pc = self.regs.pc.wrapping_sub(1);
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_sub(1) & 0x7F);
        self.log.pop();
    }

    pub(crate) fn fetch_opcode<B: IoBus>(&mut self, bus: &mut B) -> u8 {
        let pc = self.regs.pc;
        let op = bus.read(pc);
        self.record(pc, op, FETCH);
        self.regs.pc = pc.wrapping_add(1);
        self.bump_r();
        op
    }

    pub(crate) fn fetch_byte<B: IoBus>(&mut self, bus: &mut B) -> u8 {
        let pc = self.regs.pc;
        let value = self.read_mem(bus, pc);
        self.regs.pc = pc.wrapping_add(1);
        value
    }

    pub(crate) fn fetch_word<B: IoBus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch_byte(bus);
        let hi = self.fetch_byte(bus);
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn read_mem<B: IoBus>(&mut self, bus: &mut B, addr: u16) -> u8 {
        let value = bus.read(addr);
        self.record(addr, value, MEM_READ);
        value
    }

    pub(crate) fn write_mem<B: IoBus>(&mut self, bus: &mut B, addr: u16, value: u8) {
        bus.write(addr, value);
        self.record(addr, value, MEM_WRITE);
    }

    pub(crate) fn read_word<B: IoBus>(&mut self, bus: &mut B, addr: u16) -> u16 {
        let lo = self.read_mem(bus, addr);
        let hi = self.read_mem(bus, addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn write_word<B: IoBus>(&mut self, bus: &mut B, addr: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_mem(bus, addr, lo);
        self.write_mem(bus, addr.wrapping_add(1), hi);
    }

    pub(crate) fn push<B: IoBus>(&mut self, bus: &mut B, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write_mem(bus, self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write_mem(bus, self.regs.sp, lo);
    }

    pub(crate) fn pop<B: IoBus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.read_mem(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.read_mem(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from_le_bytes([lo, hi])
    }

    pub(crate) fn port_in<B: IoBus>(&mut self, bus: &mut B, port: u16) -> u8 {
        let value = bus.read_io(port);
        self.record(port, value, IO_READ);
        value
    }

    pub(crate) fn port_out<B: IoBus>(&mut self, bus: &mut B, port: u16, value: u8) {
        bus.write_io(port, value);
        self.record(port, value, IO_WRITE);
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}
