//! Cycle-by-cycle tracing of the target, checked against the reference core.
//!
//! Every bus cycle arrives from the arbiter's wait dispatch while the target
//! sits in a wait state. In compare mode the reference Z80 predicts the
//! cycles of each instruction and every mismatch is queued as an exception.
//! In record mode every cycle is queued for the host; when the trace ring
//! runs short of headroom the tracer holds the target until the host has
//! drained it again.

use raider_core::{Bus, BusCycle, CtrlFlags, FlatMemory, IoBus, SpscRing};
use serde_json::{Map, Value, json};
use z80_reference::{StepCycles, Z80};

use hdlc_link::HdlcEncoder;

use crate::app::Bridge;
use crate::arbiter::{
    ArbiterError, BusAction, BusActionReason, BusArbiter, BusSocketSpec, SocketHandle, WaitReturn,
};
use crate::config::BridgeConfig;
use crate::dispatcher::{Command, Reply};
use crate::hw::BusHardware;
use crate::outbound::Outbound;

const LOG_TARGET: &str = "StepTracer";

/// Port reads the reference core sees.
const IO_READ_VALUE: u8 = 0x80;

/// Bytes per element of a binary trace batch.
const BIN_ELEM_LEN: usize = 5;

/// Room for the JSON headers of a relayed batch.
const BIN_HEADER_ALLOWANCE: usize = 256;

/// Where the reference core's memory image comes from.
pub enum TracerMemory {
    /// Copied from the live target through a bus grant when tracing starts.
    Mirror(FlatMemory),
    /// Supplied up front; no copy is taken.
    Preloaded(FlatMemory),
}

impl TracerMemory {
    #[must_use]
    pub const fn needs_prime(&self) -> bool {
        matches!(self, Self::Mirror(_))
    }

    #[must_use]
    pub const fn image(&self) -> &FlatMemory {
        match self {
            Self::Mirror(mem) | Self::Preloaded(mem) => mem,
        }
    }

    fn image_mut(&mut self) -> &mut FlatMemory {
        match self {
            Self::Mirror(mem) | Self::Preloaded(mem) => mem,
        }
    }
}

impl Bus for TracerMemory {
    fn read(&mut self, address: u16) -> u8 {
        self.image_mut().read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.image_mut().write(address, value);
    }
}

impl IoBus for TracerMemory {
    fn read_io(&mut self, _port: u16) -> u8 {
        IO_READ_VALUE
    }

    fn write_io(&mut self, _port: u16, _value: u8) {}
}

/// One observed bus cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub step: u64,
    pub addr: u16,
    pub bus_data: u8,
    /// Data driven back to the target, if any socket decoded the cycle.
    pub returned: Option<u8>,
    pub flags: CtrlFlags,
}

impl TraceRecord {
    /// The byte that was on the data bus: the target's for writes and
    /// undecoded cycles, the bridge's otherwise.
    #[must_use]
    pub fn effective_data(&self) -> u8 {
        match self.returned {
            Some(value) if !self.flags.contains(CtrlFlags::WR) => value,
            _ => self.bus_data,
        }
    }
}

/// A cycle that differed from the reference core's prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub step: u64,
    pub observed: BusCycle,
    pub returned: Option<u8>,
    pub expected: BusCycle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracerModes {
    pub logging: bool,
    pub record: bool,
    pub compare: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracerStats {
    /// Cycles seen while active.
    pub isr_count: u64,
    pub errors: u64,
    pub instructions: u64,
}

pub struct StepTracer {
    socket: SocketHandle,
    memory: TracerMemory,
    cpu: Z80,
    expected: StepCycles,
    expected_pos: usize,
    traces: SpscRing<TraceRecord>,
    exceptions: SpscRing<ExceptionRecord>,
    modes: TracerModes,
    active: bool,
    prime_pending: bool,
    holding: bool,
    margin: usize,
    service_divider: u32,
    service_count: u32,
    bin_batch: usize,
    stats: TracerStats,
}

impl StepTracer {
    /// Create the tracer and register its (disabled) bus socket.
    pub fn new<H: BusHardware>(
        config: &BridgeConfig,
        memory: TracerMemory,
        arbiter: &mut BusArbiter<H>,
    ) -> Result<Self, ArbiterError> {
        let socket = arbiter.register(BusSocketSpec::default())?;
        Ok(Self {
            socket,
            memory,
            cpu: Z80::new(),
            expected: StepCycles::empty(),
            expected_pos: 0,
            traces: SpscRing::new(config.trace_capacity),
            exceptions: SpscRing::new(config.exception_capacity),
            modes: TracerModes::default(),
            active: false,
            prime_pending: false,
            holding: false,
            margin: config.trace_margin,
            service_divider: config.tracer_service_divider,
            service_count: 0,
            bin_batch: config.bin_batch_elems,
            stats: TracerStats::default(),
        })
    }

    #[must_use]
    pub const fn socket(&self) -> SocketHandle {
        self.socket
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn is_holding(&self) -> bool {
        self.holding
    }

    #[must_use]
    pub const fn stats(&self) -> TracerStats {
        self.stats
    }

    #[must_use]
    pub fn trace_count(&self) -> usize {
        self.traces.occupancy()
    }

    #[must_use]
    pub const fn memory(&self) -> &TracerMemory {
        &self.memory
    }

    /// Begin tracing. A mirrored image is primed through a bus grant first;
    /// either way tracing goes live when the following target reset completes.
    pub fn start<H: BusHardware>(
        &mut self,
        modes: TracerModes,
        prime: bool,
        arbiter: &mut BusArbiter<H>,
    ) -> Result<(), ArbiterError> {
        self.modes = modes;
        if modes.logging {
            log::debug!(
                target: LOG_TARGET,
                "start logging {} record {} compare {}",
                modes.logging,
                modes.record,
                modes.compare
            );
        }
        arbiter.enable_socket(self.socket, true)?;
        if prime && self.memory.needs_prime() {
            arbiter.request(self.socket, BusAction::BusRq, BusActionReason::Mirror)?;
            self.prime_pending = true;
            Ok(())
        } else {
            self.arm(arbiter)
        }
    }

    /// Subscribe to every cycle and reset the target.
    fn arm<H: BusHardware>(&mut self, arbiter: &mut BusArbiter<H>) -> Result<(), ArbiterError> {
        arbiter.wait_on_memory(self.socket, true)?;
        arbiter.wait_on_io(self.socket, true)?;
        arbiter.wait_hold(self.socket, false)?;
        arbiter.wait_release();
        arbiter.request(self.socket, BusAction::Reset, BusActionReason::General)
    }

    pub fn stop<H: BusHardware>(&mut self, logging: bool, arbiter: &mut BusArbiter<H>) {
        self.modes.logging = logging;
        if logging {
            log::debug!(target: LOG_TARGET, "stop");
        }
        // The socket is ours, so these cannot fail.
        let _ = arbiter.wait_on_memory(self.socket, false);
        let _ = arbiter.wait_on_io(self.socket, false);
        let _ = arbiter.wait_hold(self.socket, false);
        arbiter.wait_release();
        let _ = arbiter.enable_socket(self.socket, false);
        self.active = false;
        self.prime_pending = false;
        self.holding = false;
        self.traces.clear();
        self.exceptions.clear();
        self.stats = TracerStats::default();
    }

    pub fn action_complete<H: BusHardware>(
        &mut self,
        action: BusAction,
        reason: BusActionReason,
        arbiter: &mut BusArbiter<H>,
    ) {
        match action {
            BusAction::Reset => self.reset_complete(),
            BusAction::BusRq if reason == BusActionReason::Mirror && self.prime_pending => {
                self.prime_pending = false;
                let mut image = vec![0u8; 0x1_0000];
                match arbiter.granted_read(0, &mut image, false) {
                    Ok(()) => self.memory.image_mut().copy_from(&image),
                    Err(e) => log::warn!(target: LOG_TARGET, "prime from target failed: {e}"),
                }
                if let Err(e) = self.arm(arbiter) {
                    log::warn!(target: LOG_TARGET, "cannot arm after prime: {e}");
                }
            }
            _ => {}
        }
    }

    fn reset_complete(&mut self) {
        self.active = false;
        self.traces.clear();
        self.traces.reset_lost();
        self.exceptions.clear();
        self.exceptions.reset_lost();
        self.cpu.reset();
        self.stats = TracerStats::default();
        self.expected = StepCycles::empty();
        self.expected_pos = 0;
        self.active = true;
        if self.modes.logging {
            log::debug!(target: LOG_TARGET, "reset");
        }
    }

    /// Per-cycle work, run while the target is held in the wait.
    pub fn on_wait<H: BusHardware>(
        &mut self,
        cycle: &BusCycle,
        ret: &WaitReturn,
        arbiter: &mut BusArbiter<H>,
    ) {
        if !self.active {
            return;
        }
        let step = self.stats.isr_count;
        self.stats.isr_count += 1;

        if self.modes.compare {
            if self.expected_pos >= self.expected.len() {
                self.expected = self.cpu.step(&mut self.memory);
                self.expected_pos = 0;
                self.stats.instructions += 1;
            }
            let expected = self.expected.get(self.expected_pos).unwrap_or_default();
            self.expected_pos += 1;
            let matches = expected.addr == cycle.addr
                && expected.data == cycle.data
                && expected.flags.cycle_kind() == cycle.flags.cycle_kind();
            if !matches {
                // Dropped and counted by the ring when full.
                let _ = self.exceptions.try_put(ExceptionRecord {
                    step,
                    observed: *cycle,
                    returned: ret.value,
                    expected,
                });
                self.stats.errors += 1;
            }
        }

        if self.modes.record {
            // A full ring rejects and counts the record.
            let _ = self.traces.try_put(TraceRecord {
                step,
                addr: cycle.addr,
                bus_data: cycle.data,
                returned: ret.value,
                flags: cycle.flags,
            });
            if !self.holding && self.traces.headroom() < self.margin {
                self.holding = arbiter.wait_hold(self.socket, true).is_ok();
            }
        }
    }

    fn release_hold_if_drained<H: BusHardware>(&mut self, arbiter: &mut BusArbiter<H>) {
        if self.holding && self.traces.headroom() >= self.margin {
            self.holding = false;
            let _ = arbiter.wait_hold(self.socket, false);
        }
    }

    /// Drain at most one exception every `service_divider` calls.
    pub fn service(&mut self) {
        self.service_count += 1;
        if self.service_count < self.service_divider {
            return;
        }
        self.service_count = 0;
        let Some(ex) = self.exceptions.try_get() else {
            return;
        };
        if self.modes.logging {
            log::debug!(
                target: LOG_TARGET,
                "{:07} got {:04x} {:02x} {} exp {:04x} {:02x} {} ToZ80 {:02x}",
                ex.step,
                ex.observed.addr,
                ex.observed.data,
                ex.observed.flags.letters('.'),
                ex.expected.addr,
                ex.expected.data,
                ex.expected.flags.letters('.'),
                ex.returned.unwrap_or(0)
            );
        }
    }

    #[must_use]
    pub fn status_json(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("err".into(), "ok".into());
        body.insert("isrCount".into(), self.stats.isr_count.into());
        body.insert("errors".into(), self.stats.errors.into());
        body.insert("instructions".into(), self.stats.instructions.into());
        body.insert("active".into(), self.active.into());
        body.insert("traceCount".into(), self.traces.occupancy().into());
        body.insert("traceLost".into(), self.traces.lost().into());
        body.insert("exceptionLost".into(), self.exceptions.lost().into());
        body
    }

    /// Consume one trace record as JSON.
    pub fn get_trace_long<H: BusHardware>(&mut self, arbiter: &mut BusArbiter<H>) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("err".into(), "ok".into());
        if let Some(rec) = self.traces.try_get() {
            body.insert(
                "trace".into(),
                json!({
                    "step": rec.step,
                    "addr": format!("{:04x}", rec.addr),
                    "data": format!("{:02x}", rec.effective_data()),
                    "flags": rec.flags.letters('.'),
                }),
            );
        }
        self.release_hold_if_drained(arbiter);
        body
    }

    /// Tx space a full binary batch needs in the worst case.
    #[must_use]
    pub const fn bin_batch_tx_space(&self) -> usize {
        HdlcEncoder::worst_case_len(self.bin_batch * BIN_ELEM_LEN + BIN_HEADER_ALLOWANCE)
    }

    /// Send up to a full batch of trace records as one binary message.
    /// `traceCount` in the header is the step of the first record.
    ///
    /// Nothing is sent from an empty ring, and the batch is skipped entirely
    /// when the transmit path cannot take a full one.
    pub fn get_trace_bin<H: BusHardware>(
        &mut self,
        arbiter: &mut BusArbiter<H>,
        outbound: &mut Outbound,
    ) -> bool {
        let Some(first_step) = self.traces.peek().map(|rec| rec.step) else {
            return false;
        };
        let need = self.bin_batch_tx_space();
        let available = outbound.tx_available();
        if available < need {
            log::warn!(target: LOG_TARGET, "binary batch skipped: tx space {available} below {need}");
            return false;
        }
        let count = self.traces.occupancy().min(self.bin_batch);
        let mut bin = Vec::with_capacity(count * BIN_ELEM_LEN);
        for _ in 0..count {
            let Some(rec) = self.traces.try_get() else {
                break;
            };
            bin.extend_from_slice(&rec.addr.to_le_bytes());
            bin.push(rec.bus_data);
            bin.push(rec.returned.unwrap_or(0));
            let decoded = if rec.returned.is_some() { 0x80 } else { 0 };
            bin.push((rec.flags.bits() & 0x3F) as u8 | decoded);
        }
        let mut body = Map::new();
        body.insert("traceCount".into(), first_step.into());
        let sent = outbound.send_relay("tracerGetBinData", &body, None, &bin);
        self.release_hold_if_drained(arbiter);
        sent
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn flag_arg(cmd: &Command, key: &str) -> bool {
    match cmd.json.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => !s.is_empty() && !s.starts_with('0'),
        _ => false,
    }
}

/// Tracer commands.
pub fn handle_message<H: BusHardware>(bridge: &mut Bridge<H>, cmd: &Command) -> Option<Reply> {
    let tracer = &mut bridge.consumers.tracer;
    let arbiter = &mut bridge.arbiter;
    let reply = match cmd.name.to_ascii_lowercase().as_str() {
        "tracerstart" => {
            let modes = TracerModes {
                logging: flag_arg(cmd, "logging"),
                record: flag_arg(cmd, "record"),
                compare: flag_arg(cmd, "compare"),
            };
            match tracer.start(modes, true, arbiter) {
                Ok(()) => Reply::ok(),
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "start failed: {e}");
                    Reply::err("fail")
                }
            }
        }
        "tracerstop" => {
            tracer.stop(flag_arg(cmd, "logging"), arbiter);
            Reply::ok()
        }
        "tracerstatus" => Reply::Body(tracer.status_json()),
        "tracergetlong" => Reply::Body(tracer.get_trace_long(arbiter)),
        "tracergetbin" => {
            tracer.get_trace_bin(arbiter, &mut bridge.outbound);
            Reply::Silent
        }
        _ => return None,
    };
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTarget;
    use hdlc_link::{CaptureSink, HdlcDecoder};
    use raider_core::ManualClock;
    use std::rc::Rc;

    struct Rig {
        clock: ManualClock,
        arbiter: BusArbiter<SimTarget>,
        tracer: StepTracer,
    }

    impl crate::arbiter::BusSocketHandler<SimTarget> for StepTracer {
        fn wait_interrupt(
            &mut self,
            _handle: SocketHandle,
            cycle: &BusCycle,
            ret: &mut WaitReturn,
            arbiter: &mut BusArbiter<SimTarget>,
        ) {
            self.on_wait(cycle, ret, arbiter);
        }

        fn action_complete(
            &mut self,
            _handle: SocketHandle,
            action: BusAction,
            reason: BusActionReason,
            arbiter: &mut BusArbiter<SimTarget>,
        ) {
            StepTracer::action_complete(self, action, reason, arbiter);
        }
    }

    fn rig(config: &BridgeConfig, program: &[u8]) -> Rig {
        let clock = ManualClock::new();
        let mut sim = SimTarget::new(config.clock_hz);
        sim.load(0, program);
        let mut arbiter = BusArbiter::new(sim, Rc::new(clock.clone()), config);
        let tracer =
            StepTracer::new(config, TracerMemory::Mirror(FlatMemory::new()), &mut arbiter).unwrap();
        Rig {
            clock,
            arbiter,
            tracer,
        }
    }

    impl Rig {
        fn start(&mut self, modes: TracerModes) {
            self.tracer.start(modes, true, &mut self.arbiter).unwrap();
            // Grant, then the reset pulse.
            self.arbiter.service(&mut self.tracer);
            self.clock.advance(1_000);
            self.arbiter.service(&mut self.tracer);
            assert!(self.tracer.is_active());
        }

        fn run(&mut self, services: usize) {
            for _ in 0..services {
                self.arbiter.service(&mut self.tracer);
            }
        }
    }

    // LD A,0x12; LD (0x8000),A; JR -5
    const PROGRAM: [u8; 7] = [0x3E, 0x12, 0x32, 0x00, 0x80, 0x18, 0xF9];

    #[test]
    fn priming_copies_target_memory() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        rig.start(TracerModes::default());
        assert_eq!(rig.tracer.memory().image().peek(2), 0x32);
        assert_eq!(rig.tracer.memory().image().peek(6), 0xF9);
    }

    #[test]
    fn matching_target_produces_no_exceptions() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        rig.start(TracerModes {
            compare: true,
            ..TracerModes::default()
        });
        rig.run(10);
        let stats = rig.tracer.stats();
        assert!(stats.isr_count > 20);
        assert!(stats.instructions > 5);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn diverging_target_is_recorded_not_fatal() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        rig.tracer = StepTracer::new(
            &BridgeConfig::default(),
            TracerMemory::Preloaded(FlatMemory::new()),
            &mut rig.arbiter,
        )
        .unwrap();
        rig.tracer
            .start(
                TracerModes {
                    compare: true,
                    ..TracerModes::default()
                },
                true,
                &mut rig.arbiter,
            )
            .unwrap();
        rig.clock.advance(1_000);
        rig.run(5);
        assert!(rig.tracer.is_active());
        assert!(rig.tracer.stats().errors > 0);
        assert!(rig.tracer.stats().isr_count > 10, "tracing carries on after mismatches");
    }

    #[test]
    fn hold_tracks_headroom_in_both_directions() {
        let config = BridgeConfig {
            trace_capacity: 20,
            trace_margin: 5,
            ..BridgeConfig::default()
        };
        let mut rig = rig(&config, &PROGRAM);
        rig.start(TracerModes {
            record: true,
            ..TracerModes::default()
        });
        rig.run(20);
        assert!(rig.tracer.is_holding());
        assert!(rig.arbiter.is_hold());
        // Hold asserted exactly when headroom dropped under the margin.
        assert_eq!(rig.tracer.trace_count(), 16);

        let before = rig.tracer.trace_count();
        rig.run(5);
        assert_eq!(rig.tracer.trace_count(), before, "target is parked");

        // Headroom back to the margin releases the hold.
        rig.tracer.get_trace_long(&mut rig.arbiter);
        assert_eq!(rig.tracer.trace_count(), 15);
        assert!(!rig.tracer.is_holding());
        assert!(!rig.arbiter.is_hold());

        // The target runs until headroom drops under the margin again.
        rig.run(1);
        assert_eq!(rig.tracer.trace_count(), 16);
        assert!(rig.tracer.is_holding());
    }

    #[test]
    fn trace_long_reports_one_record() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        rig.start(TracerModes {
            record: true,
            ..TracerModes::default()
        });
        rig.run(1);
        let body = rig.tracer.get_trace_long(&mut rig.arbiter);
        assert_eq!(
            Value::Object(body),
            json!({"err": "ok", "trace": {"step": 0, "addr": "0000", "data": "3e", "flags": "R.M.1...."}})
        );
    }

    #[test]
    fn empty_trace_long_is_just_ok() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        assert_eq!(Value::Object(rig.tracer.get_trace_long(&mut rig.arbiter)), json!({"err": "ok"}));
    }

    #[test]
    fn binary_batch_packs_five_bytes_per_record() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        rig.start(TracerModes {
            record: true,
            ..TracerModes::default()
        });
        rig.run(1);
        let count = rig.tracer.trace_count();
        assert!(count > 0);

        let sink = CaptureSink::new();
        let mut out = Outbound::new(Box::new(sink.clone()), 12_000);
        assert!(rig.tracer.get_trace_bin(&mut rig.arbiter, &mut out));
        assert_eq!(rig.tracer.trace_count(), 0);

        let mut decoder = HdlcDecoder::new();
        let wire = sink.take();
        let frame = wire.iter().find_map(|&b| decoder.push_byte(b).map(<[u8]>::to_vec)).unwrap();
        let nul = frame.iter().position(|&b| b == 0).unwrap();
        let outer: Value = serde_json::from_slice(&frame[..nul]).unwrap();
        assert_eq!(outer["cmdName"], "rdp");
        let inner = &frame[nul + 1..frame.len() - 1];
        let inner_nul = inner.iter().position(|&b| b == 0).unwrap();
        let inner_json: Value = serde_json::from_slice(&inner[..inner_nul]).unwrap();
        assert_eq!(inner_json["cmdName"], "tracerGetBinData");
        assert_eq!(inner_json["traceCount"], 0, "batch starts at the first step");
        let bin = &inner[inner_nul + 1..inner.len() - 1];
        assert_eq!(bin.len(), count * BIN_ELEM_LEN);
        // First record: opcode fetch of LD A,n at 0, undecoded.
        assert_eq!(&bin[..5], &[0x00, 0x00, 0x3E, 0x00, 0x15]);
    }

    fn bin_header(sink: &CaptureSink) -> Value {
        let mut decoder = HdlcDecoder::new();
        let frame = sink
            .take()
            .into_iter()
            .find_map(|b| decoder.push_byte(b).map(<[u8]>::to_vec))
            .unwrap();
        let nul = frame.iter().position(|&b| b == 0).unwrap();
        let inner = &frame[nul + 1..];
        let inner_nul = inner.iter().position(|&b| b == 0).unwrap();
        serde_json::from_slice(&inner[..inner_nul]).unwrap()
    }

    #[test]
    fn binary_batch_header_names_first_step_after_drain() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        rig.start(TracerModes {
            record: true,
            ..TracerModes::default()
        });
        rig.run(1);
        let drained = rig.tracer.trace_count() as u64;
        while rig.tracer.trace_count() > 0 {
            rig.tracer.get_trace_long(&mut rig.arbiter);
        }
        rig.run(1);
        assert!(rig.tracer.trace_count() > 0);

        let sink = CaptureSink::new();
        let mut out = Outbound::new(Box::new(sink.clone()), 12_000);
        assert!(rig.tracer.get_trace_bin(&mut rig.arbiter, &mut out));
        assert_eq!(bin_header(&sink)["traceCount"], drained);
    }

    #[test]
    fn empty_ring_sends_no_batch() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        let sink = CaptureSink::new();
        let mut out = Outbound::new(Box::new(sink.clone()), 12_000);
        assert!(!rig.tracer.get_trace_bin(&mut rig.arbiter, &mut out));
        assert!(sink.is_empty());
    }

    #[test]
    fn binary_batch_skipped_without_tx_space() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        rig.start(TracerModes {
            record: true,
            ..TracerModes::default()
        });
        rig.run(1);
        let count = rig.tracer.trace_count();
        let sink = CaptureSink::new();
        sink.set_available(rig.tracer.bin_batch_tx_space() - 1);
        let mut out = Outbound::new(Box::new(sink.clone()), 12_000);
        assert!(!rig.tracer.get_trace_bin(&mut rig.arbiter, &mut out));
        assert!(sink.is_empty());
        assert_eq!(rig.tracer.trace_count(), count);
    }

    #[test]
    fn stop_disables_and_clears() {
        let mut rig = rig(&BridgeConfig::default(), &PROGRAM);
        rig.start(TracerModes {
            record: true,
            compare: true,
            ..TracerModes::default()
        });
        rig.run(2);
        rig.tracer.stop(false, &mut rig.arbiter);
        assert!(!rig.tracer.is_active());
        assert_eq!(rig.tracer.trace_count(), 0);
        assert_eq!(rig.tracer.stats(), TracerStats::default());
        assert!(!rig.arbiter.socket(rig.tracer.socket()).unwrap().enabled);
    }

    #[test]
    fn exceptions_drain_at_service_cadence() {
        let config = BridgeConfig {
            tracer_service_divider: 3,
            ..BridgeConfig::default()
        };
        let mut rig = rig(&config, &PROGRAM);
        let _ = rig.tracer.exceptions.try_put(ExceptionRecord {
            step: 1,
            observed: BusCycle::default(),
            returned: None,
            expected: BusCycle::default(),
        });
        rig.tracer.service();
        rig.tracer.service();
        assert_eq!(rig.tracer.exceptions.occupancy(), 1);
        rig.tracer.service();
        assert_eq!(rig.tracer.exceptions.occupancy(), 0);
    }
}
