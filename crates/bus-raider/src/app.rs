//! The bridge as a whole: link in, dispatcher, bus consumers, link out.
//!
//! [`App::feed`] takes received link bytes, [`App::service`] is one pass of
//! the polled loop. Neither blocks except for the bounded synchronous bus
//! accesses some commands make.

use std::rc::Rc;

use hdlc_link::{HdlcDecoder, LinkSink};
use raider_core::{BusCycle, FlatMemory, TimeSource};
use serde_json::Map;
use thiserror::Error;

use crate::arbiter::{
    ArbiterError, BusAction, BusActionReason, BusArbiter, BusSocketHandler, SocketHandle,
    WaitReturn,
};
use crate::config::{BridgeConfig, ConfigError};
use crate::controller::{self, BusController};
use crate::dispatcher::{CommsSocket, DispatchContext, Dispatcher};
use crate::hw::BusHardware;
use crate::loader::{self, TargetLoader};
use crate::logger::{LogQueue, level_name};
use crate::outbound::{Outbound, UNNUMBERED};
use crate::tracer::{self, StepTracer, TracerMemory};
use crate::tracker::TargetTracker;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Socket(#[from] ArbiterError),
    #[error("comms socket table full")]
    CommsTableFull,
}

/// Consumers that receive bus callbacks, routed by socket.
pub struct BusConsumers {
    pub tracer: StepTracer,
    pub tracker: TargetTracker,
}

impl<H: BusHardware> BusSocketHandler<H> for BusConsumers {
    fn wait_interrupt(
        &mut self,
        handle: SocketHandle,
        cycle: &BusCycle,
        ret: &mut WaitReturn,
        arbiter: &mut BusArbiter<H>,
    ) {
        if handle == self.tracer.socket() {
            self.tracer.on_wait(cycle, ret, arbiter);
        } else if handle == self.tracker.socket() {
            self.tracker.on_wait(cycle, arbiter);
        }
    }

    fn action_complete(
        &mut self,
        handle: SocketHandle,
        action: BusAction,
        reason: BusActionReason,
        arbiter: &mut BusArbiter<H>,
    ) {
        if handle == self.tracer.socket() {
            self.tracer.action_complete(action, reason, arbiter);
        } else if handle == self.tracker.socket() {
            self.tracker.action_complete(action);
        }
    }
}

/// Everything command handlers work on.
pub struct Bridge<H> {
    pub arbiter: BusArbiter<H>,
    pub consumers: BusConsumers,
    pub controller: BusController,
    pub loader: TargetLoader,
    pub outbound: Outbound,
}

impl<H> DispatchContext for Bridge<H> {
    fn outbound(&mut self) -> &mut Outbound {
        &mut self.outbound
    }
}

pub struct App<H> {
    decoder: HdlcDecoder,
    dispatcher: Dispatcher<Bridge<H>>,
    bridge: Bridge<H>,
    clock: Rc<dyn TimeSource>,
    log_queue: Option<LogQueue>,
}

impl<H: BusHardware> App<H> {
    pub fn new(
        hw: H,
        sink: Box<dyn LinkSink>,
        clock: Rc<dyn TimeSource>,
        config: &BridgeConfig,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let mut arbiter = BusArbiter::new(hw, Rc::clone(&clock), config);
        let controller = BusController::new(&mut arbiter)?;
        let tracker = TargetTracker::new(&mut arbiter)?;
        let tracer = StepTracer::new(config, TracerMemory::Mirror(FlatMemory::new()), &mut arbiter)?;
        let loader = TargetLoader::new(&mut arbiter)?;

        let mut dispatcher = Dispatcher::new(
            config.comms_sockets,
            config.file_idle_timeout_ms,
            Rc::clone(&clock),
        );
        let sockets = [
            CommsSocket::messages("BusController", controller::handle_message::<H>),
            CommsSocket::messages("StepTracer", tracer::handle_message::<H>),
            CommsSocket {
                name: "TargetLoader",
                enabled: true,
                on_message: None,
                on_file: Some(loader::on_file::<H>),
                on_firmware: Some(loader::on_firmware::<H>),
            },
        ];
        for socket in sockets {
            dispatcher.register(socket).ok_or(SetupError::CommsTableFull)?;
        }

        Ok(Self {
            decoder: HdlcDecoder::with_max_len(config.max_rx_frame),
            dispatcher,
            bridge: Bridge {
                arbiter,
                consumers: BusConsumers { tracer, tracker },
                controller,
                loader,
                outbound: Outbound::new(sink, config.max_tx_payload),
            },
            clock,
            log_queue: None,
        })
    }

    /// Forward queued log records to the host from now on.
    pub fn attach_log_queue(&mut self, queue: LogQueue) {
        self.log_queue = Some(queue);
    }

    /// Received link bytes; complete frames are dispatched as they close.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let Some(frame) = self.decoder.push_byte(b) else {
                continue;
            };
            let frame = frame.to_vec();
            self.dispatcher.dispatch(&mut self.bridge, &frame);
        }
    }

    /// One pass of the polled loop.
    pub fn service(&mut self) {
        let bridge = &mut self.bridge;
        bridge.arbiter.service(&mut bridge.consumers);
        bridge.consumers.tracer.service();
        bridge
            .controller
            .service(&bridge.consumers.tracker, &mut bridge.outbound);
        self.dispatcher.service();
        self.drain_logs();
    }

    fn drain_logs(&mut self) {
        let Some(queue) = self.log_queue.as_ref() else {
            return;
        };
        // Records logged while sending wait for the next pass.
        for _ in 0..queue.len() {
            let Some(rec) = queue.pop() else {
                break;
            };
            let mut body = Map::new();
            body.insert("msg".into(), rec.msg.into());
            body.insert("lev".into(), level_name(rec.level).into());
            body.insert(
                "src".into(),
                format!("{} {}", self.clock.micros(), rec.target).into(),
            );
            // Logs go out plain, outside the relay channel.
            self.bridge.outbound.send_message("log", &body, UNNUMBERED, &[]);
        }
    }

    #[must_use]
    pub const fn bridge(&self) -> &Bridge<H> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge<H> {
        &mut self.bridge
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<Bridge<H>> {
        &self.dispatcher
    }

    #[must_use]
    pub const fn link_stats(&self) -> hdlc_link::DecoderStats {
        self.decoder.stats()
    }
}
