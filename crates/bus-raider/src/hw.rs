//! The seam between the bridge logic and the physical bus.
//!
//! Everything electrical sits behind [`BusHardware`]: bus request and
//! acknowledge, block transfers while the bridge owns the bus, the wait-state
//! machinery and the raw diagnostic lines. `SimTarget` is the in-process
//! implementation; a board support layer provides the real one.

use raider_core::BusCycle;
use z80_reference::Registers;

/// Pulsed target control lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    Reset,
    Nmi,
    Irq,
}

/// Lines reachable through the bus multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxLine {
    LaddrClk,
    LaddrClrBar,
    DataOeBar,
    Reset,
    Irq,
    Nmi,
    LaddrOeBar,
    HaddrOeBar,
}

impl MuxLine {
    const NAMES: [(&'static str, Self); 8] = [
        ("LADDR_CLK", Self::LaddrClk),
        ("LADDR_CLR_BAR", Self::LaddrClrBar),
        ("DATA_OE_BAR", Self::DataOeBar),
        ("RESET", Self::Reset),
        ("IRQ", Self::Irq),
        ("NMI", Self::Nmi),
        ("LADDR_OE_BAR", Self::LaddrOeBar),
        ("HADDR_OE_BAR", Self::HaddrOeBar),
    ];

    /// Look up a mux line by name, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, line)| line)
    }
}

/// Bit positions of the bus lines in the raw line word.
pub mod pins {
    pub const MREQ_BAR: u8 = 0;
    pub const IORQ_BAR: u8 = 1;
    pub const BUSACK_BAR: u8 = 2;
    pub const PUSH_ADDR_BAR: u8 = 3;
    pub const RESET: u8 = 4;
    pub const M1_BAR: u8 = 5;
    pub const DATA_DIR_IN: u8 = 6;
    pub const HADDR_CK: u8 = 7;
    pub const NMI: u8 = 8;
    pub const WAIT: u8 = 9;
    pub const IRQ: u8 = 10;
    pub const LADDR_OE_BAR: u8 = 11;
    pub const DATA_OE_BAR: u8 = 12;
    pub const LADDR_CLR_BAR: u8 = 13;
    pub const IORQ_WAIT_EN: u8 = 14;
    pub const MREQ_WAIT_EN: u8 = 15;
    pub const LADDR_CK: u8 = 16;
    pub const WR_BAR: u8 = 17;
    pub const RD_BAR: u8 = 18;
    pub const BUSRQ: u8 = 19;
    /// First of the eight data bus bits.
    pub const DATA: u8 = 20;
    pub const CLOCK: u8 = 28;
}

/// Pin driven by a named bus line.
///
/// `PAGE` shares the IORQ pin with `IORQ`.
#[must_use]
pub fn bus_line_pin(name: &str) -> Option<u8> {
    const LINES: [(&str, u8); 12] = [
        ("WR", pins::WR_BAR),
        ("RD", pins::RD_BAR),
        ("MREQ", pins::MREQ_BAR),
        ("IORQ", pins::IORQ_BAR),
        ("PAGE", pins::IORQ_BAR),
        ("DATA_DIR_IN", pins::DATA_DIR_IN),
        ("IORQ_WAIT_EN", pins::IORQ_WAIT_EN),
        ("MREQ_WAIT_EN", pins::MREQ_WAIT_EN),
        ("HADDR_CK", pins::HADDR_CK),
        ("PUSH_ADDR", pins::PUSH_ADDR_BAR),
        ("CLOCK", pins::CLOCK),
        ("M1", pins::M1_BAR),
    ];
    LINES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, pin)| pin)
}

/// Physical bus access.
///
/// Block transfers are only meaningful between `take_control` and
/// `release_control`. Raw operations bypass request/acknowledge entirely.
pub trait BusHardware {
    /// Drive BUSRQ.
    fn request_bus(&mut self, on: bool);
    /// Whether the target has answered BUSRQ with BUSACK.
    fn bus_acknowledged(&mut self) -> bool;
    /// Drive address, data and control lines from the bridge.
    fn take_control(&mut self);
    /// Tristate the bridge drivers again.
    fn release_control(&mut self);
    fn block_read(&mut self, addr: u16, buf: &mut [u8], is_io: bool);
    fn block_write(&mut self, addr: u16, data: &[u8], is_io: bool);

    /// Set the electrical level of a control line.
    fn set_control_line(&mut self, line: ControlLine, high: bool);

    /// Which request kinds raise a wait state.
    fn set_wait_gating(&mut self, memory: bool, io: bool);
    /// The cycle the target is currently held in, if a new wait has fired.
    fn poll_wait(&mut self) -> Option<BusCycle>;
    /// End the current wait, driving `data` onto the bus for a read if given.
    fn release_wait(&mut self, data: Option<u8>);

    fn clock_hz(&self) -> u32;
    /// Program the clock generator; returns the rate actually set.
    fn set_clock_hz(&mut self, hz: u32) -> u32;

    /// Register file of the target, when the hardware can see it.
    fn target_registers(&self) -> Option<Registers> {
        None
    }

    fn raw_lines(&self) -> u32;
    fn raw_set_pin(&mut self, pin: u8, high: bool);
    fn raw_get_pin(&self, pin: u8) -> bool;
    fn raw_set_address(&mut self, addr: u16);
    fn raw_set_data(&mut self, data: u8);
    fn raw_read_data(&mut self) -> u8;
    fn raw_mux_set(&mut self, line: MuxLine);
    fn raw_mux_clear(&mut self);
    fn raw_clock_enable(&mut self, on: bool);
    fn raw_control_enable(&mut self, on: bool);
    fn raw_wait_clear(&mut self);
    fn raw_wait_disable(&mut self);

    /// Return every line to its idle state.
    fn reset_lines(&mut self);
}
