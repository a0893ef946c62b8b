//! Bus arbitration between the consumers sharing one target bus.
//!
//! Consumers register a *bus socket* and get a stable handle back. The
//! arbiter serialises their requests (one action in flight at a time),
//! drives the pulse lines and BUSRQ, and fans wait-state events out to every
//! socket that subscribed to them. Consumers themselves live outside the
//! arbiter and are handed to [`BusArbiter::service`] on each call, so a
//! callback can freely call back into the arbiter.

use std::rc::Rc;

use raider_core::{BusCycle, TimeSource};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{BridgeConfig, LineConfig};
use crate::hw::{BusHardware, ControlLine, MuxLine};

const LOG_TARGET: &str = "BusArbiter";

/// Upper bound on waits handled by one service call.
const MAX_WAITS_PER_SERVICE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError {
    #[error("bus socket table full ({capacity} sockets)")]
    SocketTableFull { capacity: usize },
    #[error("no bus socket with handle {0}")]
    InvalidHandle(usize),
    #[error("a bus action is already in flight")]
    Busy,
    #[error("block of {len} bytes exceeds maximum {max}")]
    BlockTooLong { len: usize, max: usize },
    #[error("target did not acknowledge the bus request")]
    NoBusAck,
    #[error("bus is not granted")]
    NotGranted,
}

/// Stable index of a registered bus socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(usize);

impl SocketHandle {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    Reset,
    Nmi,
    Irq,
    BusRq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusActionReason {
    General,
    /// Bus taken to mirror target memory.
    Mirror,
}

/// Registration parameters of a bus socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusSocketSpec {
    pub enabled: bool,
    pub wait_on_memory: bool,
    pub wait_on_io: bool,
    /// Pulse widths overriding the configured defaults.
    pub reset_us: Option<u64>,
    pub nmi_us: Option<u64>,
    pub irq_us: Option<u64>,
}

/// Data a wait handler drives back onto the bus for a read cycle.
///
/// `None` means no socket decoded the cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitReturn {
    pub value: Option<u8>,
}

/// Callbacks of the consumers behind the bus sockets.
///
/// Both run from [`BusArbiter::service`] with the arbiter passed back in.
/// `wait_interrupt` runs while the target is held in a wait state and must
/// stay bounded and allocation-free.
pub trait BusSocketHandler<H: BusHardware> {
    fn wait_interrupt(
        &mut self,
        _handle: SocketHandle,
        _cycle: &BusCycle,
        _ret: &mut WaitReturn,
        _arbiter: &mut BusArbiter<H>,
    ) {
    }

    fn action_complete(
        &mut self,
        _handle: SocketHandle,
        _action: BusAction,
        _reason: BusActionReason,
        _arbiter: &mut BusArbiter<H>,
    ) {
    }
}

/// Consumer with no callbacks.
impl<H: BusHardware> BusSocketHandler<H> for () {}

/// Activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbiterStatus {
    pub wait_interrupts: u64,
    pub bus_requests: u64,
    pub bus_grants: u64,
    pub grant_timeouts: u64,
    pub resets: u64,
    pub nmis: u64,
    pub irqs: u64,
    pub held_cycles: u64,
}

#[derive(Clone, Copy)]
struct InFlight {
    handle: SocketHandle,
    action: BusAction,
    reason: BusActionReason,
    started_us: u64,
    duration_us: u64,
}

/// The single outstanding synchronous block transfer.
struct PendingBlockAccess {
    requester: SocketHandle,
    addr: u16,
    is_io: bool,
    write: bool,
    data: Vec<u8>,
    complete: bool,
}

struct HeldCycle {
    since_us: u64,
    value: Option<u8>,
    counted: bool,
}

pub struct BusArbiter<H> {
    hw: H,
    clock: Rc<dyn TimeSource>,
    sockets: Vec<BusSocketSpec>,
    socket_capacity: usize,
    in_flight: Option<InFlight>,
    pending: Option<PendingBlockAccess>,
    held: Option<HeldCycle>,
    hold: bool,
    granted: bool,
    wait_cycle_us: u64,
    status: ArbiterStatus,
    max_block_len: usize,
    sync_timeout_us: u64,
    ack_timeout_us: u64,
    reset: LineConfig,
    nmi: LineConfig,
    irq: LineConfig,
}

impl<H: BusHardware> BusArbiter<H> {
    pub fn new(mut hw: H, clock: Rc<dyn TimeSource>, config: &BridgeConfig) -> Self {
        hw.set_clock_hz(config.clock_hz);
        Self {
            hw,
            clock,
            sockets: Vec::with_capacity(config.bus_sockets),
            socket_capacity: config.bus_sockets,
            in_flight: None,
            pending: None,
            held: None,
            hold: false,
            granted: false,
            wait_cycle_us: 0,
            status: ArbiterStatus::default(),
            max_block_len: config.max_block_len,
            sync_timeout_us: config.sync_access_timeout_us,
            ack_timeout_us: config.bus_ack_timeout_us,
            reset: config.reset,
            nmi: config.nmi,
            irq: config.irq,
        }
    }

    // -----------------------------------------------------------------------
    // Sockets
    // -----------------------------------------------------------------------

    /// Add a bus socket. The table never shrinks; sockets are disabled, not removed.
    pub fn register(&mut self, spec: BusSocketSpec) -> Result<SocketHandle, ArbiterError> {
        if self.sockets.len() >= self.socket_capacity {
            log::warn!(target: LOG_TARGET, "socket table full ({})", self.socket_capacity);
            return Err(ArbiterError::SocketTableFull {
                capacity: self.socket_capacity,
            });
        }
        self.sockets.push(spec);
        self.apply_wait_gating();
        Ok(SocketHandle(self.sockets.len() - 1))
    }

    pub fn enable_socket(&mut self, handle: SocketHandle, on: bool) -> Result<(), ArbiterError> {
        self.socket_mut(handle)?.enabled = on;
        self.apply_wait_gating();
        Ok(())
    }

    pub fn socket(&self, handle: SocketHandle) -> Result<&BusSocketSpec, ArbiterError> {
        self.sockets
            .get(handle.0)
            .ok_or(ArbiterError::InvalidHandle(handle.0))
    }

    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    fn socket_mut(&mut self, handle: SocketHandle) -> Result<&mut BusSocketSpec, ArbiterError> {
        self.sockets
            .get_mut(handle.0)
            .ok_or(ArbiterError::InvalidHandle(handle.0))
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Start an action. Completion arrives through `action_complete` from a
    /// later `service` call.
    pub fn request(
        &mut self,
        handle: SocketHandle,
        action: BusAction,
        reason: BusActionReason,
    ) -> Result<(), ArbiterError> {
        let spec = *self.socket(handle)?;
        if self.in_flight.is_some() {
            return Err(ArbiterError::Busy);
        }
        let duration_us = match action {
            BusAction::Reset => {
                self.status.resets += 1;
                self.drive(ControlLine::Reset, true);
                spec.reset_us.unwrap_or(self.reset.duration_us)
            }
            BusAction::Nmi => {
                self.status.nmis += 1;
                self.drive(ControlLine::Nmi, true);
                spec.nmi_us.unwrap_or(self.nmi.duration_us)
            }
            BusAction::Irq => {
                self.status.irqs += 1;
                self.drive(ControlLine::Irq, true);
                spec.irq_us.unwrap_or(self.irq.duration_us)
            }
            BusAction::BusRq => {
                self.status.bus_requests += 1;
                self.hw.request_bus(true);
                self.ack_timeout_us
            }
        };
        self.in_flight = Some(InFlight {
            handle,
            action,
            reason,
            started_us: self.clock.micros(),
            duration_us,
        });
        Ok(())
    }

    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn drive(&mut self, line: ControlLine, asserted: bool) {
        let config = match line {
            ControlLine::Reset => self.reset,
            ControlLine::Nmi => self.nmi,
            ControlLine::Irq => self.irq,
        };
        self.hw.set_control_line(line, asserted != config.active_low);
    }

    /// Advance the in-flight action and dispatch pending wait states.
    pub fn service<C: BusSocketHandler<H>>(&mut self, consumers: &mut C) {
        self.service_action(consumers);
        self.service_waits(consumers);
    }

    fn service_action<C: BusSocketHandler<H>>(&mut self, consumers: &mut C) {
        let Some(flight) = self.in_flight else {
            return;
        };
        let timed_out = self
            .clock
            .elapsed_since(flight.started_us, flight.duration_us);
        let line = match flight.action {
            BusAction::BusRq => {
                if self.hw.bus_acknowledged() {
                    self.grant(consumers);
                } else if timed_out {
                    log::warn!(target: LOG_TARGET, "bus request from socket {} not acknowledged", flight.handle.0);
                    self.status.grant_timeouts += 1;
                    self.hw.request_bus(false);
                    self.in_flight = None;
                }
                return;
            }
            BusAction::Reset => ControlLine::Reset,
            BusAction::Nmi => ControlLine::Nmi,
            BusAction::Irq => ControlLine::Irq,
        };
        if timed_out {
            self.in_flight = None;
            self.drive(line, false);
            self.notify_all(consumers, flight.action, flight.reason);
        }
    }

    fn notify_all<C: BusSocketHandler<H>>(
        &mut self,
        consumers: &mut C,
        action: BusAction,
        reason: BusActionReason,
    ) {
        let mut idx = 0;
        while idx < self.sockets.len() {
            if self.sockets[idx].enabled {
                consumers.action_complete(SocketHandle(idx), action, reason, self);
            }
            idx += 1;
        }
    }

    fn grant<C: BusSocketHandler<H>>(&mut self, consumers: &mut C) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        self.status.bus_grants += 1;
        self.hw.take_control();
        self.granted = true;
        if let Some(pending) = self.pending.as_mut() {
            if pending.requester == flight.handle && !pending.complete {
                if pending.write {
                    self.hw.block_write(pending.addr, &pending.data, pending.is_io);
                } else {
                    self.hw.block_read(pending.addr, &mut pending.data, pending.is_io);
                }
                pending.complete = true;
            }
        }
        consumers.action_complete(flight.handle, flight.action, flight.reason, self);
        self.granted = false;
        self.hw.release_control();
        self.hw.request_bus(false);
    }

    /// Read target memory while a grant callback is running.
    pub fn granted_read(&mut self, addr: u16, buf: &mut [u8], is_io: bool) -> Result<(), ArbiterError> {
        if !self.granted {
            return Err(ArbiterError::NotGranted);
        }
        self.hw.block_read(addr, buf, is_io);
        Ok(())
    }

    /// Write target memory while a grant callback is running.
    pub fn granted_write(&mut self, addr: u16, data: &[u8], is_io: bool) -> Result<(), ArbiterError> {
        if !self.granted {
            return Err(ArbiterError::NotGranted);
        }
        self.hw.block_write(addr, data, is_io);
        Ok(())
    }

    /// Drop BUSRQ and the bridge drivers. There is no cancelling an
    /// in-flight request, so that is refused.
    pub fn release_bus(&mut self) -> Result<(), ArbiterError> {
        if matches!(self.in_flight, Some(InFlight { action: BusAction::BusRq, .. })) {
            return Err(ArbiterError::Busy);
        }
        self.hw.release_control();
        self.hw.request_bus(false);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Synchronous block access
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn max_block_len(&self) -> usize {
        self.max_block_len
    }

    /// Request the bus, move one block while it is granted, and wait for it.
    ///
    /// `buf` is the source for a write and is filled on a successful read.
    /// Polls `service` until the transfer completes or the sync timeout runs
    /// out; a timeout abandons the transfer without touching `buf`.
    pub fn block_access_sync<C: BusSocketHandler<H>>(
        &mut self,
        handle: SocketHandle,
        addr: u16,
        buf: &mut [u8],
        is_io: bool,
        write: bool,
        consumers: &mut C,
    ) -> Result<(), ArbiterError> {
        if buf.len() > self.max_block_len {
            return Err(ArbiterError::BlockTooLong {
                len: buf.len(),
                max: self.max_block_len,
            });
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.socket(handle)?;
        if self.pending.is_some() {
            return Err(ArbiterError::Busy);
        }
        self.pending = Some(PendingBlockAccess {
            requester: handle,
            addr,
            is_io,
            write,
            data: if write { buf.to_vec() } else { vec![0; buf.len()] },
            complete: false,
        });
        if let Err(e) = self.request(handle, BusAction::BusRq, BusActionReason::General) {
            self.pending = None;
            return Err(e);
        }
        let start = self.clock.micros();
        loop {
            self.service(consumers);
            if self.pending.as_ref().is_some_and(|p| p.complete) {
                break;
            }
            if self.clock.elapsed_since(start, self.sync_timeout_us) {
                self.pending = None;
                log::debug!(target: LOG_TARGET, "block access at {addr:04x} timed out");
                return Err(ArbiterError::NoBusAck);
            }
        }
        if let Some(done) = self.pending.take() {
            if !write {
                buf.copy_from_slice(&done.data);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Wait states
    // -----------------------------------------------------------------------

    fn service_waits<C: BusSocketHandler<H>>(&mut self, consumers: &mut C) {
        for _ in 0..MAX_WAITS_PER_SERVICE {
            if self.held.is_none() {
                let Some(cycle) = self.hw.poll_wait() else {
                    break;
                };
                self.status.wait_interrupts += 1;
                let mut ret = WaitReturn::default();
                let mut idx = 0;
                while idx < self.sockets.len() {
                    let s = self.sockets[idx];
                    let subscribed = (s.wait_on_memory && cycle.is_memory())
                        || (s.wait_on_io && cycle.is_io());
                    if s.enabled && subscribed {
                        consumers.wait_interrupt(SocketHandle(idx), &cycle, &mut ret, self);
                    }
                    idx += 1;
                }
                self.held = Some(HeldCycle {
                    since_us: self.clock.micros(),
                    value: ret.value,
                    counted: false,
                });
            }
            if !self.release_if_due() {
                break;
            }
        }
    }

    fn release_if_due(&mut self) -> bool {
        let hold = self.hold;
        let Some(held) = self.held.as_mut() else {
            return true;
        };
        if hold {
            if !held.counted {
                held.counted = true;
                self.status.held_cycles += 1;
            }
            return false;
        }
        if self.wait_cycle_us > 0 && !self.clock.elapsed_since(held.since_us, self.wait_cycle_us) {
            return false;
        }
        let value = held.value;
        self.held = None;
        self.hw.release_wait(value);
        true
    }

    fn apply_wait_gating(&mut self) {
        let enabled = self.sockets.iter().filter(|s| s.enabled);
        let (memory, io) = enabled.fold((false, false), |(m, i), s| {
            (m || s.wait_on_memory, i || s.wait_on_io)
        });
        self.hw.set_wait_gating(memory, io);
    }

    pub fn wait_on_memory(&mut self, handle: SocketHandle, on: bool) -> Result<(), ArbiterError> {
        self.socket_mut(handle)?.wait_on_memory = on;
        self.apply_wait_gating();
        Ok(())
    }

    pub fn wait_on_io(&mut self, handle: SocketHandle, on: bool) -> Result<(), ArbiterError> {
        self.socket_mut(handle)?.wait_on_io = on;
        self.apply_wait_gating();
        Ok(())
    }

    /// Set or clear the shared hold level. Holds are not counted.
    pub fn wait_hold(&mut self, handle: SocketHandle, on: bool) -> Result<(), ArbiterError> {
        self.socket(handle)?;
        self.hold = on;
        Ok(())
    }

    #[must_use]
    pub const fn is_hold(&self) -> bool {
        self.hold
    }

    /// Whether the target is parked in a wait state.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.held.is_some()
    }

    /// Release the current wait now, unless hold is asserted.
    pub fn wait_release(&mut self) {
        if self.hold {
            return;
        }
        if let Some(held) = self.held.take() {
            self.hw.release_wait(held.value);
        }
    }

    /// Minimum time a wait is held before it is released automatically.
    pub fn set_wait_cycle_us(&mut self, us: u64) {
        self.wait_cycle_us = us;
    }

    #[must_use]
    pub const fn wait_cycle_us(&self) -> u64 {
        self.wait_cycle_us
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn status(&self) -> ArbiterStatus {
        self.status
    }

    #[must_use]
    pub fn status_json(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("err".into(), "ok".into());
        if let Ok(Value::Object(counters)) = serde_json::to_value(self.status) {
            body.extend(counters);
        }
        body.insert("hold".into(), self.hold.into());
        body.insert("waiting".into(), self.is_waiting().into());
        body.insert("clockHz".into(), self.hw.clock_hz().into());
        body
    }

    pub fn clear_status(&mut self) {
        self.status = ArbiterStatus::default();
    }

    /// Return lines and arbitration state to power-on.
    pub fn bus_init(&mut self) {
        self.hw.reset_lines();
        self.in_flight = None;
        self.pending = None;
        self.held = None;
        self.hold = false;
        self.granted = false;
        self.status = ArbiterStatus::default();
        self.apply_wait_gating();
    }

    // -----------------------------------------------------------------------
    // Clock and raw lines
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn clock_freq_hz(&self) -> u32 {
        self.hw.clock_hz()
    }

    pub fn set_clock_freq_hz(&mut self, hz: u32) -> u32 {
        self.hw.set_clock_hz(hz)
    }

    #[must_use]
    pub fn raw_lines(&self) -> u32 {
        self.hw.raw_lines()
    }

    pub fn raw_control_enable(&mut self, on: bool) {
        self.hw.raw_control_enable(on);
    }

    pub fn raw_wait_clear(&mut self) {
        self.held = None;
        self.hw.raw_wait_clear();
    }

    pub fn raw_wait_disable(&mut self) {
        self.hw.raw_wait_disable();
    }

    pub fn raw_clock_enable(&mut self, on: bool) {
        self.hw.raw_clock_enable(on);
    }

    pub fn raw_take_bus(&mut self) {
        self.hw.request_bus(true);
        self.hw.take_control();
    }

    pub fn raw_release_bus(&mut self) {
        self.hw.release_control();
        self.hw.request_bus(false);
    }

    pub fn raw_set_address(&mut self, addr: u16) {
        self.hw.raw_set_address(addr);
    }

    pub fn raw_set_data(&mut self, data: u8) {
        self.hw.raw_set_data(data);
    }

    pub fn raw_read_data(&mut self) -> u8 {
        self.hw.raw_read_data()
    }

    pub fn raw_set_pin(&mut self, pin: u8, high: bool) {
        self.hw.raw_set_pin(pin, high);
    }

    #[must_use]
    pub fn raw_get_pin(&self, pin: u8) -> bool {
        self.hw.raw_get_pin(pin)
    }

    pub fn raw_mux_set(&mut self, line: MuxLine) {
        self.hw.raw_mux_set(line);
    }

    pub fn raw_mux_clear(&mut self) {
        self.hw.raw_mux_clear();
    }

    #[must_use]
    pub const fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    #[must_use]
    pub fn micros(&self) -> u64 {
        self.clock.micros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTarget;
    use raider_core::ManualClock;

    fn arbiter(clock: &ManualClock, config: &BridgeConfig) -> BusArbiter<SimTarget> {
        BusArbiter::new(SimTarget::new(config.clock_hz), Rc::new(clock.clone()), config)
    }

    fn enabled() -> BusSocketSpec {
        BusSocketSpec {
            enabled: true,
            ..BusSocketSpec::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        completions: Vec<(usize, BusAction, BusActionReason)>,
        waits: Vec<BusCycle>,
        reply: Option<u8>,
    }

    impl BusSocketHandler<SimTarget> for Recorder {
        fn wait_interrupt(
            &mut self,
            _handle: SocketHandle,
            cycle: &BusCycle,
            ret: &mut WaitReturn,
            _arbiter: &mut BusArbiter<SimTarget>,
        ) {
            self.waits.push(*cycle);
            if self.reply.is_some() {
                ret.value = self.reply;
            }
        }

        fn action_complete(
            &mut self,
            handle: SocketHandle,
            action: BusAction,
            reason: BusActionReason,
            _arbiter: &mut BusArbiter<SimTarget>,
        ) {
            self.completions.push((handle.index(), action, reason));
        }
    }

    #[test]
    fn registration_beyond_capacity_fails_cleanly() {
        let clock = ManualClock::new();
        let config = BridgeConfig {
            bus_sockets: 2,
            ..BridgeConfig::default()
        };
        let mut arb = arbiter(&clock, &config);
        let a = arb.register(enabled()).unwrap();
        let b = arb
            .register(BusSocketSpec {
                wait_on_io: true,
                ..enabled()
            })
            .unwrap();
        assert_eq!(
            arb.register(enabled()),
            Err(ArbiterError::SocketTableFull { capacity: 2 })
        );
        assert_eq!(arb.socket_count(), 2);
        assert_eq!(arb.socket(a).unwrap(), &enabled());
        assert!(arb.socket(b).unwrap().wait_on_io);
    }

    #[test]
    fn pulse_completes_after_duration_to_every_enabled_socket() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let a = arb.register(enabled()).unwrap();
        let _disabled = arb.register(BusSocketSpec::default()).unwrap();
        let c = arb.register(enabled()).unwrap();
        let mut rec = Recorder::default();

        arb.request(a, BusAction::Nmi, BusActionReason::General).unwrap();
        assert_eq!(arb.request(c, BusAction::Irq, BusActionReason::General), Err(ArbiterError::Busy));
        arb.service(&mut rec);
        assert!(rec.completions.is_empty());
        clock.advance(10);
        arb.service(&mut rec);
        assert_eq!(
            rec.completions,
            vec![
                (a.index(), BusAction::Nmi, BusActionReason::General),
                (c.index(), BusAction::Nmi, BusActionReason::General),
            ]
        );
        assert!(!arb.is_busy());
        assert_eq!(arb.status().nmis, 1);
    }

    #[test]
    fn per_socket_duration_overrides_default() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let a = arb
            .register(BusSocketSpec {
                reset_us: Some(5),
                ..enabled()
            })
            .unwrap();
        let mut rec = Recorder::default();
        arb.request(a, BusAction::Reset, BusActionReason::General).unwrap();
        clock.advance(5);
        arb.service(&mut rec);
        assert_eq!(rec.completions.len(), 1);
    }

    #[test]
    fn grant_goes_to_requester_only() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let _a = arb.register(enabled()).unwrap();
        let b = arb.register(enabled()).unwrap();
        let mut rec = Recorder::default();
        arb.request(b, BusAction::BusRq, BusActionReason::Mirror).unwrap();
        arb.service(&mut rec);
        assert_eq!(rec.completions, vec![(b.index(), BusAction::BusRq, BusActionReason::Mirror)]);
        assert_eq!(arb.status().bus_grants, 1);
    }

    #[test]
    fn unacknowledged_request_times_out() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        arb.hw_mut().set_responsive(false);
        let a = arb.register(enabled()).unwrap();
        let mut rec = Recorder::default();
        arb.request(a, BusAction::BusRq, BusActionReason::General).unwrap();
        clock.advance(20_000);
        arb.service(&mut rec);
        assert!(rec.completions.is_empty());
        assert!(!arb.is_busy());
        assert_eq!(arb.status().grant_timeouts, 1);
    }

    #[test]
    fn block_read_and_write_round_trip_through_grant() {
        let clock = ManualClock::with_auto_step(1);
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let a = arb.register(enabled()).unwrap();
        let mut data = [0xDE, 0xAD, 0xBE, 0xEF];
        arb.block_access_sync(a, 0x8000, &mut data, false, true, &mut ()).unwrap();
        let mut back = [0u8; 4];
        arb.block_access_sync(a, 0x8000, &mut back, false, false, &mut ()).unwrap();
        assert_eq!(back, [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn oversize_block_rejected_before_request() {
        let clock = ManualClock::with_auto_step(1);
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let a = arb.register(enabled()).unwrap();
        let mut big = vec![0u8; 1025];
        assert_eq!(
            arb.block_access_sync(a, 0, &mut big, false, false, &mut ()),
            Err(ArbiterError::BlockTooLong { len: 1025, max: 1024 })
        );
        assert_eq!(arb.status().bus_requests, 0);
    }

    #[test]
    fn block_access_times_out_on_dead_bus() {
        let clock = ManualClock::with_auto_step(100);
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        arb.hw_mut().set_responsive(false);
        let a = arb.register(enabled()).unwrap();
        let mut buf = [0x11u8; 4];
        assert_eq!(
            arb.block_access_sync(a, 0, &mut buf, false, false, &mut ()),
            Err(ArbiterError::NoBusAck)
        );
        assert_eq!(buf, [0x11; 4]);
    }

    #[test]
    fn granted_read_only_inside_grant() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let mut buf = [0u8; 1];
        assert_eq!(arb.granted_read(0, &mut buf, false), Err(ArbiterError::NotGranted));
    }

    #[test]
    fn waits_dispatch_to_subscribers_and_hold_parks_them() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        // NOP; NOP; NOP ...
        let a = arb.register(enabled()).unwrap();
        arb.wait_on_memory(a, true).unwrap();
        arb.wait_hold(a, true).unwrap();
        let mut rec = Recorder::default();
        arb.service(&mut rec);
        assert_eq!(rec.waits.len(), 1);
        assert!(rec.waits[0].is_opcode_fetch());
        assert!(arb.is_waiting());
        arb.service(&mut rec);
        assert_eq!(rec.waits.len(), 1, "held cycle is not dispatched again");
        assert_eq!(arb.status().held_cycles, 1);

        arb.wait_release();
        assert!(arb.is_waiting(), "explicit release is refused while holding");
        arb.wait_hold(a, false).unwrap();
        arb.wait_release();
        assert!(!arb.is_waiting());
    }

    #[test]
    fn wait_cycle_cadence_delays_release() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let a = arb.register(enabled()).unwrap();
        arb.wait_on_memory(a, true).unwrap();
        arb.set_wait_cycle_us(100);
        let mut rec = Recorder::default();
        arb.service(&mut rec);
        assert_eq!(rec.waits.len(), 1);
        arb.service(&mut rec);
        assert_eq!(rec.waits.len(), 1);
        clock.advance(100);
        arb.service(&mut rec);
        assert_eq!(rec.waits.len(), 2);
    }

    #[test]
    fn gating_is_or_of_enabled_sockets() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let a = arb.register(enabled()).unwrap();
        let b = arb.register(enabled()).unwrap();
        arb.wait_on_memory(a, true).unwrap();
        arb.wait_on_memory(b, true).unwrap();
        arb.wait_on_memory(a, false).unwrap();
        assert!(arb.raw_get_pin(crate::hw::pins::MREQ_WAIT_EN));
        arb.enable_socket(b, false).unwrap();
        assert!(!arb.raw_get_pin(crate::hw::pins::MREQ_WAIT_EN));
        assert_eq!(
            arb.wait_on_io(SocketHandle(9), true),
            Err(ArbiterError::InvalidHandle(9))
        );
    }

    #[test]
    fn status_json_carries_counters() {
        let clock = ManualClock::new();
        let mut arb = arbiter(&clock, &BridgeConfig::default());
        let a = arb.register(enabled()).unwrap();
        arb.request(a, BusAction::Irq, BusActionReason::General).unwrap();
        let json = arb.status_json();
        assert_eq!(json["err"], "ok");
        assert_eq!(json["irqs"], 1);
        arb.clear_status();
        assert_eq!(arb.status_json()["irqs"], 0);
    }
}
