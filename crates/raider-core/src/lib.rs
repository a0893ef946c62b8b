//! Core traits and types shared by the Bus Raider crates.
//!
//! Everything that crosses a crate boundary on the bus side lives here: the
//! access traits a CPU core drives, the control-flag bits that describe a
//! bus cycle, the bounded ring buffer used between the wait-state path and
//! the polled service loop, and the time source every timeout is measured
//! against.

mod bus;
mod ctrl;
mod ring;
mod time;

pub use bus::{Bus, FlatMemory, IoBus};
pub use ctrl::{BusCycle, CtrlFlags};
pub use ring::{RingError, SpscRing};
pub use time::{ManualClock, SystemClock, TimeSource};
