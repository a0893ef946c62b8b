//! Command envelope parsing and routing.
//!
//! A frame payload is a NUL-terminated JSON command followed by a binary
//! parameter block. Upload commands are handled here; everything else is
//! offered to the registered comms sockets in order until one claims it.
//! A relay (`rdp`) envelope is unwrapped one level and its answer re-wrapped.

use std::rc::Rc;

use raider_core::TimeSource;
use serde_json::{Map, Value};

use crate::outbound::{Outbound, RELAY_CMD};
use crate::upload::{FileInfo, FileReception};

const LOG_TARGET: &str = "CmdHandler";

// ---------------------------------------------------------------------------
// Commands and replies
// ---------------------------------------------------------------------------

/// A decoded command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub json: Map<String, Value>,
    pub params: Vec<u8>,
    pub msg_idx: Option<u32>,
}

impl Command {
    /// Split a payload at its first NUL and parse the JSON half.
    ///
    /// `None` for anything that is not a JSON object with a `cmdName`.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let (text, rest) = match payload.iter().position(|&b| b == 0) {
            Some(nul) => (&payload[..nul], &payload[nul + 1..]),
            None => (payload, &[][..]),
        };
        let Ok(Value::Object(json)) = serde_json::from_slice::<Value>(text) else {
            return None;
        };
        let name = json.get("cmdName")?.as_str()?.to_string();
        let msg_idx = json.get("msgIdx").and_then(value_u32);
        // A declared length trims trailing padding after the block.
        let params_len = json
            .get("dataLen")
            .and_then(value_u32)
            .and_then(|n| usize::try_from(n).ok())
            .map_or(rest.len(), |n| n.min(rest.len()));
        Some(Self {
            name,
            json,
            params: rest[..params_len].to_vec(),
            msg_idx,
        })
    }

    /// Case-insensitive name match.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// A field as text: strings verbatim, numbers and booleans rendered.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<String> {
        match self.json.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            _ => None,
        }
    }

    /// A field as a decimal number, from a number or a numeric string.
    #[must_use]
    pub fn decimal(&self, key: &str) -> Option<u64> {
        match self.json.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn value_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// What a handler wants sent back.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Sent as `<cmdName>Resp`.
    Body(Map<String, Value>),
    /// Sent under its own name.
    Named(&'static str, Map<String, Value>),
    /// Handled, nothing to send.
    Silent,
}

impl Reply {
    #[must_use]
    pub fn ok() -> Self {
        Self::err("ok")
    }

    /// A body holding only `"err"`.
    #[must_use]
    pub fn err(code: &str) -> Self {
        let mut body = Map::new();
        body.insert("err".into(), code.into());
        Self::Body(body)
    }
}

// ---------------------------------------------------------------------------
// Comms sockets
// ---------------------------------------------------------------------------

/// Handles a command; `None` means not mine.
pub type MessageFn<C> = fn(&mut C, &Command) -> Option<Reply>;

/// Takes a received file; `false` means not mine.
pub type FileFn<C> = fn(&mut C, &FileInfo, &[u8]) -> bool;

pub struct CommsSocket<C> {
    pub name: &'static str,
    pub enabled: bool,
    pub on_message: Option<MessageFn<C>>,
    pub on_file: Option<FileFn<C>>,
    pub on_firmware: Option<FileFn<C>>,
}

impl<C> CommsSocket<C> {
    #[must_use]
    pub const fn messages(name: &'static str, on_message: MessageFn<C>) -> Self {
        Self {
            name,
            enabled: true,
            on_message: Some(on_message),
            on_file: None,
            on_firmware: None,
        }
    }
}

/// What the dispatcher needs from the state it routes into.
pub trait DispatchContext {
    fn outbound(&mut self) -> &mut Outbound;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommsHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Plain(u32),
    Relay(u32),
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher<C> {
    sockets: Vec<CommsSocket<C>>,
    capacity: usize,
    reception: Option<FileReception>,
    idle_timeout_us: u64,
    clock: Rc<dyn TimeSource>,
}

impl<C: DispatchContext> Dispatcher<C> {
    pub fn new(capacity: usize, idle_timeout_ms: u64, clock: Rc<dyn TimeSource>) -> Self {
        Self {
            sockets: Vec::with_capacity(capacity),
            capacity,
            reception: None,
            idle_timeout_us: idle_timeout_ms.saturating_mul(1000),
            clock,
        }
    }

    /// Add a comms socket; `None` when the table is full.
    pub fn register(&mut self, socket: CommsSocket<C>) -> Option<CommsHandle> {
        if self.sockets.len() >= self.capacity {
            log::warn!(target: LOG_TARGET, "comms socket table full, {} rejected", socket.name);
            return None;
        }
        self.sockets.push(socket);
        Some(CommsHandle(self.sockets.len() - 1))
    }

    pub fn enable(&mut self, handle: CommsHandle, on: bool) {
        if let Some(socket) = self.sockets.get_mut(handle.0) {
            socket.enabled = on;
        }
    }

    /// Declared length and bytes so far of the upload in progress.
    #[must_use]
    pub fn file_receive_status(&self) -> Option<(usize, usize)> {
        self.reception.as_ref().and_then(FileReception::progress)
    }

    /// Abandon an upload that has gone quiet.
    pub fn service(&mut self) {
        let now = self.clock.micros();
        if self
            .reception
            .as_ref()
            .is_some_and(|rx| rx.is_idle(now, self.idle_timeout_us))
        {
            log::debug!(target: LOG_TARGET, "upload abandoned after idle timeout");
            self.reception = None;
        }
    }

    /// Route one frame payload.
    pub fn dispatch(&mut self, ctx: &mut C, payload: &[u8]) {
        let Some(cmd) = Command::parse(payload) else {
            log::debug!(target: LOG_TARGET, "ignoring frame without a command");
            return;
        };
        if cmd.is(RELAY_CMD) {
            let Some(inner) = Command::parse(&cmd.params) else {
                return;
            };
            let idx = inner.msg_idx.or(cmd.msg_idx).unwrap_or(0);
            self.handle(ctx, &inner, Route::Relay(idx));
        } else {
            let idx = cmd.msg_idx.unwrap_or(0);
            self.handle(ctx, &cmd, Route::Plain(idx));
        }
    }

    fn handle(&mut self, ctx: &mut C, cmd: &Command, route: Route) {
        let reply = if cmd.is("ufStart") {
            self.file_start(cmd);
            None
        } else if cmd.is("ufBlock") {
            self.file_block(cmd);
            None
        } else if cmd.is("ufEnd") {
            self.file_end(ctx, cmd, route);
            None
        } else {
            self.offer(ctx, cmd)
        };
        if let Some(reply) = reply {
            send_reply(ctx.outbound(), cmd, reply, route);
        }
    }

    fn offer(&self, ctx: &mut C, cmd: &Command) -> Option<Reply> {
        self.sockets
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| s.on_message)
            .find_map(|on_message| on_message(ctx, cmd))
    }

    /// Begin a reception. Nothing is sent back; the sender learns the
    /// outcome from `ufEnd`.
    fn file_start(&mut self, cmd: &Command) {
        let name = cmd.text("fileName").unwrap_or_default();
        let len = cmd
            .decimal("fileLen")
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        if len == 0 {
            log::warn!(target: LOG_TARGET, "ufStart {name}: no file length");
            return;
        }
        if self.reception.take().is_some() {
            log::debug!(target: LOG_TARGET, "ufStart replaces an unfinished upload");
        }
        let info = FileInfo {
            name,
            file_type: cmd.text("fileType").unwrap_or_default(),
            len,
            start: cmd.json.clone(),
        };
        self.reception = FileReception::start(info, self.clock.micros());
    }

    fn file_block(&mut self, cmd: &Command) {
        let Some(rx) = self.reception.as_mut() else {
            return;
        };
        let Some(offset) = cmd.decimal("index").and_then(|n| usize::try_from(n).ok()) else {
            return;
        };
        rx.block(offset, &cmd.params, self.clock.micros());
    }

    fn file_end(&mut self, ctx: &mut C, cmd: &Command, route: Route) {
        let Some(rx) = self.reception.take() else {
            return;
        };
        let expected = cmd.decimal("blockCount").unwrap_or(0);
        let mut body = Map::new();
        body.insert("rxCount".into(), rx.blocks().into());
        body.insert("expCount".into(), expected.into());
        if u64::from(rx.blocks()) != expected {
            log::warn!(
                target: LOG_TARGET,
                "ufEnd {}: received {} blocks, sender says {expected}",
                rx.info().name,
                rx.blocks()
            );
            send_reply(ctx.outbound(), cmd, Reply::Named("ufEndNotAck", body), route);
            return;
        }
        let (info, data) = rx.finish();
        send_reply(ctx.outbound(), cmd, Reply::Named("ufEndAck", body), route);
        self.deliver(ctx, &info, &data);
    }

    fn deliver(&self, ctx: &mut C, info: &FileInfo, data: &[u8]) {
        let enabled = self.sockets.iter().filter(|s| s.enabled);
        let taken = if info.is_firmware() {
            log::info!(
                target: LOG_TARGET,
                "firmware {} len {} crc {:04x}",
                info.name,
                data.len(),
                hdlc_link::crc16(data)
            );
            enabled
                .filter_map(|s| s.on_firmware)
                .next()
                .is_some_and(|on_firmware| on_firmware(ctx, info, data))
        } else {
            enabled
                .filter_map(|s| s.on_file)
                .any(|on_file| on_file(ctx, info, data))
        };
        if !taken {
            log::warn!(target: LOG_TARGET, "no handler took {}", info.name);
        }
    }
}

fn send_reply(out: &mut Outbound, cmd: &Command, reply: Reply, route: Route) {
    let (name, body) = match reply {
        Reply::Silent => return,
        Reply::Body(body) => (format!("{}Resp", cmd.name), body),
        Reply::Named(name, body) => (name.to_string(), body),
    };
    match route {
        Route::Plain(idx) => out.send_message(&name, &body, idx, &[]),
        Route::Relay(idx) => out.send_relay(&name, &body, Some(idx), &[]),
    };
}
