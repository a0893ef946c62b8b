//! Command surface over the bus arbiter.
//!
//! Arguments come either from a slash-separated `reqStr` (`/x/Rd/4000/10/0`)
//! or from named JSON fields. Numeric text is hexadecimal unless the field is
//! the `<name>Dec` variant or the argument is decimal by nature (pin
//! numbers). Raw line commands answer with the line state read back after the
//! operation.

use std::fmt::Write as _;

use serde_json::{Map, Value};

use crate::app::Bridge;
use crate::arbiter::{ArbiterError, BusAction, BusActionReason, BusArbiter, BusSocketSpec, SocketHandle};
use crate::dispatcher::{Command, Reply};
use crate::hw::{BusHardware, MuxLine, bus_line_pin, pins};
use crate::outbound::Outbound;
use crate::tracker::{TargetTracker, TrackerState};

const LOG_TARGET: &str = "BusController";

// ---------------------------------------------------------------------------
// Argument extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Radix {
    Hex,
    Dec,
}

/// Leading digits of `text` in `radix`, like C `strtoul`: an optional `0x`
/// for hex, parsing stops at the first non-digit, no digits gives 0.
#[must_use]
pub fn parse_prefix(text: &str, radix: Radix) -> u32 {
    let text = text.trim_start();
    let (digits, base) = match radix {
        Radix::Dec => (text, 10),
        Radix::Hex => (
            text.strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text),
            16,
        ),
    };
    digits
        .chars()
        .map_while(|c| c.to_digit(base))
        .fold(0_u32, |acc, d| acc.saturating_mul(base).saturating_add(d))
}

/// Path segment `position` of `reqStr`, if present and non-empty.
fn req_segment<'a>(cmd: &'a Command, position: usize) -> Option<&'a str> {
    let req = cmd.json.get("reqStr")?.as_str()?;
    req.split('/').nth(position + 2).filter(|s| !s.is_empty())
}

/// Numeric argument `name`, or path segment `position`.
#[must_use]
pub fn arg_u32(cmd: &Command, name: &str, position: usize, radix: Radix) -> Option<u32> {
    if let Some(seg) = req_segment(cmd, position) {
        return Some(parse_prefix(seg, radix));
    }
    if let Some(v) = cmd.json.get(name) {
        return match v {
            Value::Number(n) => n.as_u64().map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
            Value::String(s) => Some(parse_prefix(s, radix)),
            Value::Bool(b) => Some(u32::from(*b)),
            _ => None,
        };
    }
    match cmd.json.get(&format!("{name}Dec"))? {
        Value::Number(n) => n.as_u64().map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
        Value::String(s) => Some(parse_prefix(s, Radix::Dec)),
        _ => None,
    }
}

/// Text argument `name`, or path segment `position` up to the next slash.
#[must_use]
pub fn arg_str(cmd: &Command, name: &str, position: usize) -> Option<String> {
    if let Some(seg) = req_segment(cmd, position) {
        return Some(seg.to_string());
    }
    cmd.text(name).or_else(|| cmd.text(&format!("{name}Dec")))
}

fn flag(cmd: &Command, key: &str, default: bool) -> bool {
    match cmd.json.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map_or(default, |v| v != 0),
        Some(Value::String(s)) => s.trim().parse::<i64>().map_or(default, |v| v != 0),
        _ => default,
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Line state as reported by the raw commands.
///
/// `ctrl` shows a letter for each asserted (low) control line, `.` otherwise.
#[must_use]
pub fn bus_lines_json(lines: u32) -> Map<String, Value> {
    let asserted = |pin: u8, c: char| if lines & (1 << pin) == 0 { c } else { '.' };
    let ctrl: String = [
        asserted(pins::MREQ_BAR, 'M'),
        asserted(pins::IORQ_BAR, 'I'),
        asserted(pins::RD_BAR, 'R'),
        asserted(pins::WR_BAR, 'W'),
        asserted(pins::M1_BAR, '1'),
    ]
    .into_iter()
    .collect();
    let mut body = Map::new();
    body.insert("err".into(), "ok".into());
    body.insert("raw".into(), format!("{lines:02x}").into());
    body.insert("pib".into(), format!("{:02x}", (lines >> pins::DATA) & 0xFF).into());
    body.insert("ctrl".into(), ctrl.into());
    body
}

fn hex_string(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn clock_reply(hz: u32) -> Reply {
    let mut body = Map::new();
    body.insert("err".into(), "ok".into());
    body.insert("clockHz".into(), hz.to_string().into());
    Reply::Body(body)
}

fn outcome(result: Result<(), ArbiterError>) -> Reply {
    match result {
        Ok(()) => Reply::ok(),
        Err(e) => {
            log::warn!(target: LOG_TARGET, "{e}");
            Reply::err("fail")
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct BusController {
    socket: SocketHandle,
    tracker_reset_pending: bool,
    step_pending: bool,
}

impl BusController {
    pub fn new<H: BusHardware>(arbiter: &mut BusArbiter<H>) -> Result<Self, ArbiterError> {
        let socket = arbiter.register(BusSocketSpec {
            enabled: true,
            ..BusSocketSpec::default()
        })?;
        Ok(Self {
            socket,
            tracker_reset_pending: false,
            step_pending: false,
        })
    }

    #[must_use]
    pub const fn socket(&self) -> SocketHandle {
        self.socket
    }

    /// Send the one-shot completion notices once the tracker has paused.
    pub fn service(&mut self, tracker: &TargetTracker, outbound: &mut Outbound) {
        if !tracker.is_step_paused() {
            return;
        }
        let mut body = Map::new();
        body.insert("err".into(), "ok".into());
        if self.tracker_reset_pending {
            self.tracker_reset_pending = false;
            outbound.send_unnumbered("targetTrackerOnDone", &body);
        }
        if self.step_pending {
            self.step_pending = false;
            outbound.send_unnumbered("stepIntoDone", &body);
        }
    }
}

fn block_access<H: BusHardware>(bridge: &mut Bridge<H>, cmd: &Command, write: bool) -> Reply {
    let (Some(addr), Some(len), Some(is_io)) = (
        arg_u32(cmd, "addr", 1, Radix::Hex),
        arg_u32(cmd, "len", 2, Radix::Hex),
        arg_u32(cmd, "isIo", 3, Radix::Hex),
    ) else {
        return Reply::err("InvArgs");
    };
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    let max = bridge.arbiter.max_block_len();
    if len == 0 || len > max || (write && len > cmd.params.len()) {
        return Reply::err("LenTooLong");
    }
    let Ok(addr16) = u16::try_from(addr) else {
        return Reply::err("InvArgs");
    };
    let socket = bridge.controller.socket;
    let mut buf = if write {
        cmd.params[..len].to_vec()
    } else {
        vec![0; len]
    };
    let result = bridge.arbiter.block_access_sync(
        socket,
        addr16,
        &mut buf,
        is_io != 0,
        write,
        &mut bridge.consumers,
    );
    if let Err(e) = result {
        log::debug!(target: LOG_TARGET, "{} {addr:04x} len {len}: {e}", cmd.name);
        return Reply::err("fail");
    }
    if write {
        return Reply::ok();
    }
    let mut body = Map::new();
    body.insert("err".into(), "ok".into());
    body.insert("len".into(), len.into());
    body.insert("addr".into(), format!("0x{addr:04x}").into());
    body.insert("isIo".into(), is_io.into());
    body.insert("data".into(), hex_string(&buf).into());
    Reply::Body(body)
}

/// Bus controller commands.
pub fn handle_message<H: BusHardware>(bridge: &mut Bridge<H>, cmd: &Command) -> Option<Reply> {
    let socket = bridge.controller.socket;
    let arbiter = &mut bridge.arbiter;
    let lines = |arbiter: &BusArbiter<H>| Reply::Body(bus_lines_json(arbiter.raw_lines()));
    let reply = match cmd.name.to_ascii_lowercase().as_str() {
        "rd" => block_access(bridge, cmd, false),
        "wr" => block_access(bridge, cmd, true),

        "rawbuscontrolon" | "rawbuscontroloff" => {
            arbiter.raw_control_enable(cmd.is("rawBusControlOn"));
            lines(arbiter)
        }
        "rawbuswaitclear" => {
            arbiter.raw_wait_clear();
            lines(arbiter)
        }
        "rawbuswaitdisable" => {
            arbiter.raw_wait_disable();
            Reply::ok()
        }
        "rawbusclockenable" | "rawbusclockdisable" => {
            arbiter.raw_clock_enable(cmd.is("rawBusClockEnable"));
            lines(arbiter)
        }
        "rawbustake" => {
            arbiter.raw_take_bus();
            lines(arbiter)
        }
        "rawbusrelease" => {
            arbiter.raw_release_bus();
            lines(arbiter)
        }
        "rawbussetaddress" => {
            let Some(addr) = arg_u32(cmd, "addr", 1, Radix::Hex) else {
                return Some(Reply::err("InvArgs"));
            };
            arbiter.raw_set_address(u16::try_from(addr & 0xFFFF).unwrap_or_default());
            lines(arbiter)
        }
        "rawbusgetdata" => {
            arbiter.raw_read_data();
            lines(arbiter)
        }
        "rawbussetdata" | "rawbuswritepib" => {
            let Some(data) = arg_u32(cmd, "data", 1, Radix::Hex) else {
                return Some(Reply::err("InvArgs"));
            };
            log::debug!(target: LOG_TARGET, "set data {data:02x}");
            arbiter.raw_set_data(data.to_le_bytes()[0]);
            lines(arbiter)
        }
        "rawbussetpin" => {
            let (Some(pin), Some(value)) = (
                arg_u32(cmd, "pin", 1, Radix::Dec),
                arg_u32(cmd, "value", 2, Radix::Hex),
            ) else {
                return Some(Reply::err("InvArgs"));
            };
            arbiter.raw_set_pin(u8::try_from(pin).unwrap_or(u8::MAX), value != 0);
            lines(arbiter)
        }
        "rawbusgetpin" => {
            let Some(pin) = arg_u32(cmd, "pin", 1, Radix::Dec) else {
                return Some(Reply::err("InvArgs"));
            };
            arbiter.raw_get_pin(u8::try_from(pin).unwrap_or(u8::MAX));
            lines(arbiter)
        }
        "rawbusgetlines" => lines(arbiter),
        "rawbussetline" => {
            let (Some(name), Some(value)) = (
                arg_str(cmd, "line", 1),
                arg_u32(cmd, "value", 2, Radix::Hex),
            ) else {
                return Some(Reply::err("InvArgs"));
            };
            log::debug!(target: LOG_TARGET, "set line {name} {value}");
            match bus_line_pin(&name) {
                Some(pin) => arbiter.raw_set_pin(pin, value != 0),
                None => log::debug!(target: LOG_TARGET, "unknown bus line {name}"),
            }
            lines(arbiter)
        }
        "rawbuscontrolmuxset" => {
            let Some(name) = arg_str(cmd, "line", 1) else {
                return Some(Reply::err("InvArgs"));
            };
            match MuxLine::from_name(&name) {
                Some(line) => arbiter.raw_mux_set(line),
                None => log::debug!(target: LOG_TARGET, "unknown mux line {name}"),
            }
            lines(arbiter)
        }
        "rawbusmuxclear" => {
            arbiter.raw_mux_clear();
            lines(arbiter)
        }

        "busstatus" => Reply::Body(arbiter.status_json()),
        "busstatusclear" => {
            arbiter.clear_status();
            Reply::ok()
        }
        "businit" => {
            arbiter.bus_init();
            Reply::ok()
        }
        "targetreset" => {
            log::debug!(target: LOG_TARGET, "target reset");
            outcome(arbiter.request(socket, BusAction::Reset, BusActionReason::General))
        }
        "targetbusreq" => {
            log::debug!(target: LOG_TARGET, "target bus request");
            outcome(arbiter.request(socket, BusAction::BusRq, BusActionReason::General))
        }
        "targetbusrel" => outcome(arbiter.release_bus()),
        "clockhzget" => clock_reply(arbiter.clock_freq_hz()),
        "clockhzset" => {
            let from_params = || match serde_json::from_slice::<Value>(&cmd.params) {
                Ok(Value::Object(json)) => json.get("clockHz").and_then(decimal_value),
                _ => None,
            };
            let hz = cmd.json.get("clockHz").and_then(decimal_value).or_else(from_params)?;
            arbiter.set_clock_freq_hz(hz);
            clock_reply(arbiter.clock_freq_hz())
        }

        "waitholdon" | "waitholdoff" => outcome(arbiter.wait_hold(socket, cmd.is("waitHoldOn"))),
        "waitrelease" => {
            arbiter.wait_release();
            Reply::ok()
        }
        "waitmemoryon" | "waitmemoryoff" => {
            outcome(arbiter.wait_on_memory(socket, cmd.is("waitMemoryOn")))
        }
        "waitioon" | "waitiooff" => outcome(arbiter.wait_on_io(socket, cmd.is("waitIOOn"))),
        "waitcycleus" => {
            let us = cmd.json.get("cycleUs").and_then(decimal_value)?;
            arbiter.set_wait_cycle_us(u64::from(us));
            Reply::ok()
        }

        "targettrackeron" => {
            let reset = flag(cmd, "reset", true);
            let tracker = &mut bridge.consumers.tracker;
            match tracker.enable(true, reset, arbiter) {
                Ok(()) => {
                    bridge.controller.tracker_reset_pending = reset;
                    Reply::ok()
                }
                Err(e) => outcome(Err(e)),
            }
        }
        "targettrackeroff" => {
            log::debug!(target: LOG_TARGET, "tracker off");
            bridge.controller.tracker_reset_pending = false;
            bridge.controller.step_pending = false;
            outcome(bridge.consumers.tracker.enable(false, false, arbiter))
        }
        "stepinto" => {
            let tracker = &mut bridge.consumers.tracker;
            tracker.step_into(arbiter);
            // Only a live tracker ever pauses to answer this.
            bridge.controller.step_pending = tracker.state() != TrackerState::Disabled;
            Reply::ok()
        }
        "steprun" => {
            log::debug!(target: LOG_TARGET, "tracker run");
            bridge.consumers.tracker.step_run(arbiter);
            Reply::ok()
        }
        "getregs" => {
            let regs = bridge.consumers.tracker.regs_formatted(arbiter.hw().target_registers());
            let mut body = Map::new();
            body.insert("err".into(), "ok".into());
            body.insert("regs".into(), regs.into());
            Reply::Body(body)
        }
        _ => return None,
    };
    Some(reply)
}

fn decimal_value(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
        Value::String(s) => Some(parse_prefix(s, Radix::Dec)),
        _ => None,
    }
}
