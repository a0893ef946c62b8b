//! In-process target: a Z80 running out of flat memory behind the
//! [`BusHardware`] seam.
//!
//! With wait gating off the CPU free-runs a few instructions per poll. With
//! gating on, each instruction's bus cycles are queued and every gated cycle
//! surfaces from `poll_wait` as a wait the bridge has to release. Bus
//! requests are granted between instructions only.

use std::collections::VecDeque;

use raider_core::{BusCycle, CtrlFlags, FlatMemory, IoBus};
use z80_reference::{Registers, Z80};

use crate::hw::{BusHardware, ControlLine, MuxLine, pins};

const FREE_RUN_INSTRUCTIONS: usize = 16;
const MIN_CLOCK_HZ: u32 = 1_000;
const MAX_CLOCK_HZ: u32 = 20_000_000;

/// Active-low lines rest high.
const IDLE_LINES: u32 = (1 << pins::MREQ_BAR)
    | (1 << pins::IORQ_BAR)
    | (1 << pins::BUSACK_BAR)
    | (1 << pins::PUSH_ADDR_BAR)
    | (1 << pins::M1_BAR)
    | (1 << pins::RD_BAR)
    | (1 << pins::WR_BAR)
    | (1 << pins::LADDR_OE_BAR)
    | (1 << pins::DATA_OE_BAR)
    | (1 << pins::LADDR_CLR_BAR)
    | (1 << pins::RESET)
    | (1 << pins::NMI)
    | (1 << pins::IRQ);

const CONTROL_PINS: [(CtrlFlags, u8); 5] = [
    (CtrlFlags::MREQ, pins::MREQ_BAR),
    (CtrlFlags::IORQ, pins::IORQ_BAR),
    (CtrlFlags::RD, pins::RD_BAR),
    (CtrlFlags::WR, pins::WR_BAR),
    (CtrlFlags::M1, pins::M1_BAR),
];

pub struct SimTarget {
    mem: FlatMemory,
    cpu: Z80,
    regs_at_boundary: Registers,
    queued: VecDeque<BusCycle>,
    in_wait: bool,
    wait_on_memory: bool,
    wait_on_io: bool,
    busrq: bool,
    acked: bool,
    controlled: bool,
    responsive: bool,
    reset_asserted: bool,
    clock_hz: u32,
    clock_enabled: bool,
    raw_mode: bool,
    lines: u32,
    raw_address: u16,
    mux: Option<MuxLine>,
}

impl SimTarget {
    #[must_use]
    pub fn new(clock_hz: u32) -> Self {
        let cpu = Z80::new();
        Self {
            mem: FlatMemory::new(),
            regs_at_boundary: cpu.registers(),
            cpu,
            queued: VecDeque::new(),
            in_wait: false,
            wait_on_memory: false,
            wait_on_io: false,
            busrq: false,
            acked: false,
            controlled: false,
            responsive: true,
            reset_asserted: false,
            clock_hz: clock_hz.clamp(MIN_CLOCK_HZ, MAX_CLOCK_HZ),
            clock_enabled: true,
            raw_mode: false,
            lines: IDLE_LINES,
            raw_address: 0,
            mux: None,
        }
    }

    /// Copy an image into target memory.
    pub fn load(&mut self, addr: u16, data: &[u8]) {
        self.mem.load(addr, data);
    }

    #[must_use]
    pub const fn memory(&self) -> &FlatMemory {
        &self.mem
    }

    /// A non-responsive target never acknowledges a bus request.
    pub fn set_responsive(&mut self, responsive: bool) {
        self.responsive = responsive;
    }

    #[must_use]
    pub const fn is_in_wait(&self) -> bool {
        self.in_wait
    }

    #[must_use]
    pub const fn raw_address(&self) -> u16 {
        self.raw_address
    }

    #[must_use]
    pub const fn mux(&self) -> Option<MuxLine> {
        self.mux
    }

    #[must_use]
    pub const fn is_raw_mode(&self) -> bool {
        self.raw_mode
    }

    fn set_pin(&mut self, pin: u8, high: bool) {
        if pin >= 32 {
            return;
        }
        if high {
            self.lines |= 1 << pin;
        } else {
            self.lines &= !(1 << pin);
        }
    }

    /// Reflect a held cycle (or idle) onto the control and data pins.
    fn show_cycle(&mut self, cycle: Option<BusCycle>) {
        let flags = cycle.map_or(CtrlFlags::empty(), |c| c.flags);
        for (flag, pin) in CONTROL_PINS {
            self.set_pin(pin, !flags.contains(flag));
        }
        self.set_pin(pins::WAIT, cycle.is_some());
        if let Some(c) = cycle {
            self.drive_data(c.data);
        }
    }

    fn drive_data(&mut self, data: u8) {
        self.lines = (self.lines & !(0xFF << pins::DATA)) | (u32::from(data) << pins::DATA);
    }

    const fn gated(&self, cycle: &BusCycle) -> bool {
        (self.wait_on_memory && cycle.is_memory()) || (self.wait_on_io && cycle.is_io())
    }

    fn step_instruction(&mut self) {
        self.regs_at_boundary = self.cpu.registers();
        let cycles = self.cpu.step(&mut self.mem);
        for cycle in cycles.as_slice() {
            if self.gated(cycle) {
                self.queued.push_back(*cycle);
            }
        }
    }

    fn surface_queued(&mut self) -> Option<BusCycle> {
        let cycle = self.queued.pop_front()?;
        self.in_wait = true;
        self.show_cycle(Some(cycle));
        Some(cycle)
    }
}

impl BusHardware for SimTarget {
    fn request_bus(&mut self, on: bool) {
        self.busrq = on;
        if !on {
            self.acked = false;
            self.set_pin(pins::BUSACK_BAR, true);
        }
    }

    fn bus_acknowledged(&mut self) -> bool {
        if self.busrq && self.responsive && !self.in_wait && self.queued.is_empty() {
            self.acked = true;
            self.set_pin(pins::BUSACK_BAR, false);
        }
        self.acked
    }

    fn take_control(&mut self) {
        self.controlled = true;
    }

    fn release_control(&mut self) {
        self.controlled = false;
        self.show_cycle(None);
    }

    fn block_read(&mut self, addr: u16, buf: &mut [u8], is_io: bool) {
        let mut a = addr;
        for byte in buf.iter_mut() {
            *byte = if is_io {
                self.mem.read_io(a)
            } else {
                self.mem.peek(a)
            };
            a = a.wrapping_add(1);
        }
    }

    fn block_write(&mut self, addr: u16, data: &[u8], is_io: bool) {
        if is_io {
            let mut a = addr;
            for &byte in data {
                self.mem.write_io(a, byte);
                a = a.wrapping_add(1);
            }
        } else {
            self.mem.load(addr, data);
        }
    }

    fn set_control_line(&mut self, line: ControlLine, high: bool) {
        match line {
            ControlLine::Reset => {
                self.set_pin(pins::RESET, high);
                let asserted = !high;
                if self.reset_asserted && !asserted {
                    self.cpu.reset();
                    self.regs_at_boundary = self.cpu.registers();
                }
                if asserted {
                    self.queued.clear();
                    self.in_wait = false;
                    self.show_cycle(None);
                }
                self.reset_asserted = asserted;
            }
            ControlLine::Nmi => self.set_pin(pins::NMI, high),
            ControlLine::Irq => self.set_pin(pins::IRQ, high),
        }
    }

    fn set_wait_gating(&mut self, memory: bool, io: bool) {
        self.wait_on_memory = memory;
        self.wait_on_io = io;
        self.set_pin(pins::MREQ_WAIT_EN, memory);
        self.set_pin(pins::IORQ_WAIT_EN, io);
    }

    fn poll_wait(&mut self) -> Option<BusCycle> {
        if self.in_wait || self.reset_asserted || self.acked || !self.clock_enabled {
            return None;
        }
        if let Some(cycle) = self.surface_queued() {
            return Some(cycle);
        }
        if self.busrq {
            return None;
        }
        for _ in 0..FREE_RUN_INSTRUCTIONS {
            self.step_instruction();
            if !self.queued.is_empty() {
                return self.surface_queued();
            }
        }
        None
    }

    fn release_wait(&mut self, _data: Option<u8>) {
        // The instruction already ran against simulated memory.
        if self.in_wait {
            self.in_wait = false;
            self.show_cycle(None);
        }
    }

    fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    fn set_clock_hz(&mut self, hz: u32) -> u32 {
        self.clock_hz = hz.clamp(MIN_CLOCK_HZ, MAX_CLOCK_HZ);
        self.clock_hz
    }

    fn target_registers(&self) -> Option<Registers> {
        Some(self.regs_at_boundary)
    }

    fn raw_lines(&self) -> u32 {
        self.lines
    }

    fn raw_set_pin(&mut self, pin: u8, high: bool) {
        self.set_pin(pin, high);
    }

    fn raw_get_pin(&self, pin: u8) -> bool {
        pin < 32 && self.lines & (1 << pin) != 0
    }

    fn raw_set_address(&mut self, addr: u16) {
        self.raw_address = addr;
    }

    fn raw_set_data(&mut self, data: u8) {
        self.drive_data(data);
    }

    fn raw_read_data(&mut self) -> u8 {
        let addr = self.raw_address;
        let data = self.mem.peek(addr);
        self.drive_data(data);
        data
    }

    fn raw_mux_set(&mut self, line: MuxLine) {
        self.mux = Some(line);
    }

    fn raw_mux_clear(&mut self) {
        self.mux = None;
    }

    fn raw_clock_enable(&mut self, on: bool) {
        self.clock_enabled = on;
        self.set_pin(pins::CLOCK, on);
    }

    fn raw_control_enable(&mut self, on: bool) {
        self.raw_mode = on;
    }

    fn raw_wait_clear(&mut self) {
        self.release_wait(None);
    }

    fn raw_wait_disable(&mut self) {
        self.set_wait_gating(false, false);
    }

    fn reset_lines(&mut self) {
        self.busrq = false;
        self.acked = false;
        self.controlled = false;
        self.in_wait = false;
        self.queued.clear();
        self.wait_on_memory = false;
        self.wait_on_io = false;
        self.raw_mode = false;
        self.clock_enabled = true;
        self.mux = None;
        self.reset_asserted = false;
        self.lines = IDLE_LINES;
    }
}
