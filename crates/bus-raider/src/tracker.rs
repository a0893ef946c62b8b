//! Single-step control of the target at instruction boundaries.
//!
//! The tracker watches opcode fetches and parks the target, using the
//! arbiter's hold, on the first M1 of an instruction when a pause is due.
//! Prefix bytes are followed so the M1 of the opcode after `DD`/`FD`/`ED`/
//! `CB` is not taken for a new instruction.

use raider_core::BusCycle;
use z80_reference::Registers;

use crate::arbiter::{
    ArbiterError, BusAction, BusActionReason, BusArbiter, BusSocketSpec, SocketHandle,
};
use crate::hw::BusHardware;

const LOG_TARGET: &str = "TargetTracker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Disabled,
    /// Waiting for the target reset to finish.
    AwaitReset,
    Running,
    PauseAtNext,
    Paused,
}

pub struct TargetTracker {
    socket: SocketHandle,
    state: TrackerState,
    prefix: Option<u8>,
    last_pc: Option<u16>,
}

impl TargetTracker {
    pub fn new<H: BusHardware>(arbiter: &mut BusArbiter<H>) -> Result<Self, ArbiterError> {
        let socket = arbiter.register(BusSocketSpec {
            enabled: true,
            ..BusSocketSpec::default()
        })?;
        Ok(Self {
            socket,
            state: TrackerState::Disabled,
            prefix: None,
            last_pc: None,
        })
    }

    #[must_use]
    pub const fn socket(&self) -> SocketHandle {
        self.socket
    }

    #[must_use]
    pub const fn state(&self) -> TrackerState {
        self.state
    }

    #[must_use]
    pub fn is_step_paused(&self) -> bool {
        self.state == TrackerState::Paused
    }

    /// Start or stop tracking. With `reset` the target is reset first and
    /// pauses on the first instruction after it; otherwise on the next one.
    pub fn enable<H: BusHardware>(
        &mut self,
        on: bool,
        reset: bool,
        arbiter: &mut BusArbiter<H>,
    ) -> Result<(), ArbiterError> {
        self.prefix = None;
        if !on {
            self.state = TrackerState::Disabled;
            arbiter.wait_on_memory(self.socket, false)?;
            arbiter.wait_hold(self.socket, false)?;
            arbiter.wait_release();
            return Ok(());
        }
        arbiter.wait_on_memory(self.socket, true)?;
        if reset {
            arbiter.request(self.socket, BusAction::Reset, BusActionReason::General)?;
            self.state = TrackerState::AwaitReset;
        } else {
            self.state = TrackerState::PauseAtNext;
        }
        Ok(())
    }

    /// Run exactly one instruction, then pause again.
    pub fn step_into<H: BusHardware>(&mut self, arbiter: &mut BusArbiter<H>) {
        if self.state == TrackerState::Disabled {
            return;
        }
        self.state = TrackerState::PauseAtNext;
        self.resume(arbiter);
    }

    pub fn step_run<H: BusHardware>(&mut self, arbiter: &mut BusArbiter<H>) {
        if self.state == TrackerState::Disabled {
            return;
        }
        self.state = TrackerState::Running;
        self.resume(arbiter);
    }

    fn resume<H: BusHardware>(&self, arbiter: &mut BusArbiter<H>) {
        if arbiter.wait_hold(self.socket, false).is_ok() {
            arbiter.wait_release();
        }
    }

    pub fn action_complete(&mut self, action: BusAction) {
        if action == BusAction::Reset && self.state == TrackerState::AwaitReset {
            self.prefix = None;
            self.state = TrackerState::PauseAtNext;
        }
    }

    pub fn on_wait<H: BusHardware>(&mut self, cycle: &BusCycle, arbiter: &mut BusArbiter<H>) {
        if !(cycle.is_opcode_fetch() && cycle.is_memory()) {
            return;
        }
        let boundary = match self.prefix {
            None => true,
            // A doubled index prefix starts over.
            Some(0xDD | 0xFD) => matches!(cycle.data, 0xDD | 0xFD),
            Some(_) => false,
        };
        self.prefix = match (self.prefix, cycle.data) {
            (Some(0xDD | 0xFD), 0xED) => Some(0xED),
            (Some(0xDD | 0xFD), 0xDD | 0xFD) | (None, 0xCB | 0xDD | 0xED | 0xFD) => Some(cycle.data),
            _ => None,
        };
        if !boundary {
            return;
        }
        self.last_pc = Some(cycle.addr);
        if self.state == TrackerState::PauseAtNext {
            match arbiter.wait_hold(self.socket, true) {
                Ok(()) => self.state = TrackerState::Paused,
                Err(e) => log::warn!(target: LOG_TARGET, "cannot pause: {e}"),
            }
        }
    }

    /// Register dump for `getRegs`.
    #[must_use]
    pub fn regs_formatted(&self, regs: Option<Registers>) -> String {
        match (regs, self.last_pc) {
            (Some(regs), _) => regs.formatted(),
            (None, Some(pc)) => format!(
                "PC={pc:04x} SP=???? BC=???? AF=???? HL=???? DE=???? IX=???? IY=????"
            ),
            (None, None) => {
                "PC=???? SP=???? BC=???? AF=???? HL=???? DE=???? IX=???? IY=????".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::{BusSocketHandler, WaitReturn};
    use crate::config::BridgeConfig;
    use crate::sim::SimTarget;
    use raider_core::{CtrlFlags, ManualClock};
    use std::rc::Rc;

    impl BusSocketHandler<SimTarget> for TargetTracker {
        fn wait_interrupt(
            &mut self,
            _handle: SocketHandle,
            cycle: &BusCycle,
            _ret: &mut WaitReturn,
            arbiter: &mut BusArbiter<SimTarget>,
        ) {
            self.on_wait(cycle, arbiter);
        }

        fn action_complete(
            &mut self,
            _handle: SocketHandle,
            action: BusAction,
            _reason: BusActionReason,
            _arbiter: &mut BusArbiter<SimTarget>,
        ) {
            TargetTracker::action_complete(self, action);
        }
    }

    fn setup(program: &[u8]) -> (ManualClock, BusArbiter<SimTarget>, TargetTracker) {
        let clock = ManualClock::new();
        let config = BridgeConfig::default();
        let mut sim = SimTarget::new(config.clock_hz);
        sim.load(0, program);
        let mut arbiter = BusArbiter::new(sim, Rc::new(clock.clone()), &config);
        let tracker = TargetTracker::new(&mut arbiter).unwrap();
        (clock, arbiter, tracker)
    }

    fn fetch(addr: u16, data: u8) -> BusCycle {
        BusCycle::new(addr, data, CtrlFlags::RD | CtrlFlags::MREQ | CtrlFlags::M1)
    }

    #[test]
    fn reset_then_pause_at_first_instruction() {
        // NOP; LD A,n; NOP
        let (clock, mut arbiter, mut tracker) = setup(&[0x00, 0x3E, 0x42, 0x00]);
        tracker.enable(true, true, &mut arbiter).unwrap();
        assert_eq!(tracker.state(), TrackerState::AwaitReset);
        arbiter.service(&mut tracker);
        clock.advance(100);
        arbiter.service(&mut tracker);
        assert!(tracker.is_step_paused());
        assert_eq!(arbiter.hw().target_registers().map(|r| r.pc), Some(0));

        tracker.step_into(&mut arbiter);
        assert!(!tracker.is_step_paused());
        arbiter.service(&mut tracker);
        assert!(tracker.is_step_paused());
        assert_eq!(arbiter.hw().target_registers().map(|r| r.pc), Some(1));

        tracker.step_into(&mut arbiter);
        arbiter.service(&mut tracker);
        assert_eq!(arbiter.hw().target_registers().map(|r| r.pc), Some(3));
        assert!(tracker.regs_formatted(arbiter.hw().target_registers()).starts_with("PC=0003 "));
    }

    #[test]
    fn step_run_keeps_going() {
        let (_clock, mut arbiter, mut tracker) = setup(&[0x18, 0xFE]);
        tracker.enable(true, false, &mut arbiter).unwrap();
        arbiter.service(&mut tracker);
        assert!(tracker.is_step_paused());
        tracker.step_run(&mut arbiter);
        arbiter.service(&mut tracker);
        assert_eq!(tracker.state(), TrackerState::Running);
        assert!(!arbiter.is_hold());
    }

    #[test]
    fn prefixed_opcode_is_one_instruction() {
        let (_clock, mut arbiter, mut tracker) = setup(&[]);
        tracker.enable(true, false, &mut arbiter).unwrap();
        tracker.step_run(&mut arbiter);
        tracker.state = TrackerState::PauseAtNext;
        // LD IX,nn: DD then 21, both M1; the 21 is not a boundary.
        tracker.prefix = Some(0xDD);
        tracker.on_wait(&fetch(0x101, 0x21), &mut arbiter);
        assert_eq!(tracker.state(), TrackerState::PauseAtNext);
        tracker.on_wait(&fetch(0x104, 0x00), &mut arbiter);
        assert!(tracker.is_step_paused());
    }

    #[test]
    fn index_bit_op_ends_prefix_chain() {
        let (_clock, mut arbiter, mut tracker) = setup(&[]);
        tracker.enable(true, false, &mut arbiter).unwrap();
        tracker.state = TrackerState::Running;
        tracker.on_wait(&fetch(0, 0xDD), &mut arbiter);
        tracker.on_wait(&fetch(1, 0xCB), &mut arbiter);
        assert_eq!(tracker.prefix, None);
        tracker.state = TrackerState::PauseAtNext;
        tracker.on_wait(&fetch(4, 0x00), &mut arbiter);
        assert!(tracker.is_step_paused());
    }

    #[test]
    fn regs_fall_back_to_last_pc() {
        let (_clock, mut arbiter, mut tracker) = setup(&[]);
        tracker.enable(true, false, &mut arbiter).unwrap();
        tracker.on_wait(&fetch(0x1234, 0x00), &mut arbiter);
        assert_eq!(
            tracker.regs_formatted(None),
            "PC=1234 SP=???? BC=???? AF=???? HL=???? DE=???? IX=???? IY=????"
        );
    }

    #[test]
    fn disable_releases_hold() {
        let (_clock, mut arbiter, mut tracker) = setup(&[]);
        tracker.enable(true, false, &mut arbiter).unwrap();
        arbiter.service(&mut tracker);
        assert!(arbiter.is_hold());
        tracker.enable(false, false, &mut arbiter).unwrap();
        assert!(!arbiter.is_hold());
        assert!(!arbiter.is_waiting());
        assert_eq!(tracker.state(), TrackerState::Disabled);
    }
}
