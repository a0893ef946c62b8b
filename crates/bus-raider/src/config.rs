//! Bridge configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! gives a working bridge.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("trace margin {margin} must be below trace capacity {capacity}")]
    MarginTooLarge { margin: usize, capacity: usize },
}

/// Pulse width and electrical sense of one target control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    pub duration_us: u64,
    pub active_low: bool,
}

impl LineConfig {
    const fn pulse(duration_us: u64) -> Self {
        Self {
            duration_us,
            active_low: true,
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::pulse(10)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bus_sockets: usize,
    pub comms_sockets: usize,
    /// Largest block a single Rd/Wr may move.
    pub max_block_len: usize,
    pub sync_access_timeout_us: u64,
    pub bus_ack_timeout_us: u64,
    pub reset: LineConfig,
    pub nmi: LineConfig,
    pub irq: LineConfig,
    pub clock_hz: u32,
    pub trace_capacity: usize,
    pub exception_capacity: usize,
    /// Free trace slots below which the tracer holds the target.
    pub trace_margin: usize,
    /// Service calls between exception drains.
    pub tracer_service_divider: u32,
    pub bin_batch_elems: usize,
    pub max_rx_frame: usize,
    pub max_tx_payload: usize,
    pub file_idle_timeout_ms: u64,
    pub log_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bus_sockets: 10,
            comms_sockets: 10,
            max_block_len: 1024,
            sync_access_timeout_us: 50_000,
            bus_ack_timeout_us: 20_000,
            reset: LineConfig::pulse(100),
            nmi: LineConfig::pulse(10),
            irq: LineConfig::pulse(10),
            clock_hz: 1_000_000,
            trace_capacity: 1000,
            exception_capacity: 20,
            trace_margin: 50,
            tracer_service_divider: 10_000,
            bin_batch_elems: 2000,
            max_rx_frame: 10_000,
            max_tx_payload: 12_000,
            file_idle_timeout_ms: 5_000,
            log_queue: 100,
        }
    }
}

impl BridgeConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("bus_sockets", self.bus_sockets),
            ("comms_sockets", self.comms_sockets),
            ("max_block_len", self.max_block_len),
            ("trace_capacity", self.trace_capacity),
            ("exception_capacity", self.exception_capacity),
            ("bin_batch_elems", self.bin_batch_elems),
            ("max_rx_frame", self.max_rx_frame),
            ("max_tx_payload", self.max_tx_payload),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.tracer_service_divider == 0 {
            return Err(ConfigError::Zero("tracer_service_divider"));
        }
        if self.trace_margin >= self.trace_capacity {
            return Err(ConfigError::MarginTooLarge {
                margin: self.trace_margin,
                capacity: self.trace_capacity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"trace_capacity": 200, "reset": {"duration_us": 5}}"#)
                .unwrap();
        assert_eq!(config.trace_capacity, 200);
        assert_eq!(config.reset.duration_us, 5);
        assert!(config.reset.active_low);
        assert_eq!(config.max_block_len, 1024);
    }

    #[test]
    fn margin_must_fit_in_trace_ring() {
        let config = BridgeConfig {
            trace_capacity: 50,
            ..BridgeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MarginTooLarge { margin: 50, capacity: 50 })
        ));
    }

    #[test]
    fn zero_capacity_is_named() {
        let config = BridgeConfig {
            bus_sockets: 0,
            ..BridgeConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().to_string(), "bus_sockets must be non-zero");
    }
}
