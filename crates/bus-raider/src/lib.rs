//! Bus Raider bridge core.
//!
//! The bridge sits on a Z80 target's bus and is driven over a serial link.
//! [`arbiter::BusArbiter`] owns the bus and shares it between bus sockets;
//! the [`tracer::StepTracer`] and [`tracker::TargetTracker`] watch cycles
//! through it, and [`controller`] exposes it as commands. Frames from the
//! link are routed by the [`dispatcher::Dispatcher`]. [`app::App`] ties it
//! together into one polled loop.

pub mod app;
pub mod arbiter;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod hw;
pub mod loader;
pub mod logger;
pub mod outbound;
pub mod sim;
pub mod tracer;
pub mod tracker;
pub mod upload;

pub use app::{App, Bridge, SetupError};
pub use arbiter::{ArbiterError, BusArbiter};
pub use config::BridgeConfig;
pub use hw::BusHardware;
pub use sim::SimTarget;
