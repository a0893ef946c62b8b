//! Reference Z80 core for bus-cycle prediction.
//!
//! Each call to [`Z80::step`] executes exactly one instruction against an
//! [`IoBus`](raider_core::IoBus) and returns the ordered bus cycles that
//! instruction produces: opcode fetches, operand reads, memory writes and
//! I/O cycles, each tagged with its control flags. Refresh cycles and
//! internal T-states are not modelled; neither are interrupts.

mod alu;
mod cpu;
mod execute;
mod flags;
mod registers;

pub use cpu::{MAX_STEP_CYCLES, StepCycles, Z80};
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use registers::Registers;
