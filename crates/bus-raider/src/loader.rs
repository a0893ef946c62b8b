//! Puts uploaded files into target memory.
//!
//! S-record images (`fileType` `srec`, or a `.srec`/`.s19`/`.hex` name) are
//! decoded and each data record written at its own address. Anything else is
//! written verbatim at `baseAddr` (hex, default 0). Writes go through the
//! arbiter in blocks no larger than the maximum block length.

use format_srec::SrecImage;
use serde_json::Value;

use crate::app::Bridge;
use crate::arbiter::{ArbiterError, BusArbiter, BusSocketSpec, SocketHandle};
use crate::controller::{Radix, parse_prefix};
use crate::hw::BusHardware;
use crate::upload::FileInfo;

const LOG_TARGET: &str = "TargetLoader";

const SREC_SUFFIXES: [&str; 3] = [".srec", ".s19", ".hex"];

/// What the last successful load put where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    pub name: String,
    pub bytes: usize,
    /// Lowest address written.
    pub base: u16,
    /// Execution address named by the image.
    pub start: Option<u32>,
}

pub struct TargetLoader {
    socket: SocketHandle,
    last: Option<LoadedFile>,
    firmware: Option<LoadedFile>,
}

impl TargetLoader {
    pub fn new<H: BusHardware>(arbiter: &mut BusArbiter<H>) -> Result<Self, ArbiterError> {
        let socket = arbiter.register(BusSocketSpec {
            enabled: true,
            ..BusSocketSpec::default()
        })?;
        Ok(Self {
            socket,
            last: None,
            firmware: None,
        })
    }

    #[must_use]
    pub const fn last_file(&self) -> Option<&LoadedFile> {
        self.last.as_ref()
    }

    /// The last firmware image that decoded cleanly.
    #[must_use]
    pub const fn last_firmware(&self) -> Option<&LoadedFile> {
        self.firmware.as_ref()
    }
}

fn is_srec(info: &FileInfo) -> bool {
    let name = info.name.to_ascii_lowercase();
    info.file_type.eq_ignore_ascii_case("srec") || SREC_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn base_addr(info: &FileInfo) -> u32 {
    match info.start.get("baseAddr") {
        Some(Value::Number(n)) => n.as_u64().map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
        Some(Value::String(s)) => parse_prefix(s, Radix::Hex),
        _ => 0,
    }
}

fn write_chunk<H: BusHardware>(bridge: &mut Bridge<H>, addr: u32, data: &[u8]) -> Result<(), String> {
    let max = bridge.arbiter.max_block_len().max(1);
    let socket = bridge.loader.socket;
    for (i, block) in data.chunks(max).enumerate() {
        let at = addr.saturating_add(u32::try_from(i * max).unwrap_or(u32::MAX));
        let end = at.saturating_add(u32::try_from(block.len()).unwrap_or(u32::MAX));
        let Ok(at16) = u16::try_from(at) else {
            return Err(format!("address {at:x} outside target space"));
        };
        if end > 0x1_0000 {
            return Err(format!("block at {at:04x} runs past the end of memory"));
        }
        let mut buf = block.to_vec();
        bridge
            .arbiter
            .block_access_sync(socket, at16, &mut buf, false, true, &mut bridge.consumers)
            .map_err(|e| format!("write at {at16:04x}: {e}"))?;
    }
    Ok(())
}

fn write_image<H: BusHardware>(bridge: &mut Bridge<H>, image: &SrecImage) -> Result<u16, String> {
    for (addr, bytes) in &image.chunks {
        write_chunk(bridge, *addr, bytes)?;
    }
    let lowest = image.chunks.iter().map(|(addr, _)| *addr).min().unwrap_or(0);
    Ok(u16::try_from(lowest).unwrap_or(u16::MAX))
}

/// File handler: load into target memory.
pub fn on_file<H: BusHardware>(bridge: &mut Bridge<H>, info: &FileInfo, data: &[u8]) -> bool {
    let result = if is_srec(info) {
        match format_srec::decode(data) {
            Ok(image) => write_image(bridge, &image).map(|base| (base, image.data_len(), image.start)),
            Err(e) => Err(e.to_string()),
        }
    } else {
        let base = base_addr(info);
        write_chunk(bridge, base, data)
            .map(|()| (u16::try_from(base).unwrap_or(u16::MAX), data.len(), None))
    };
    match result {
        Ok((base, bytes, start)) => {
            log::info!(target: LOG_TARGET, "{} loaded, {bytes} bytes at {base:04x}", info.name);
            bridge.loader.last = Some(LoadedFile {
                name: info.name.clone(),
                bytes,
                base,
                start,
            });
            true
        }
        Err(e) => {
            log::warn!(target: LOG_TARGET, "{} not loaded: {e}", info.name);
            false
        }
    }
}

/// Firmware handler. There is no flash behind the bridge here, so the image
/// is only checked and remembered.
pub fn on_firmware<H: BusHardware>(bridge: &mut Bridge<H>, info: &FileInfo, data: &[u8]) -> bool {
    match format_srec::decode(data) {
        Ok(image) => {
            let base = image.chunks.iter().map(|(addr, _)| *addr).min().unwrap_or(0);
            log::info!(
                target: LOG_TARGET,
                "firmware {}: {} bytes in {} records",
                info.name,
                image.data_len(),
                image.chunks.len()
            );
            bridge.loader.firmware = Some(LoadedFile {
                name: info.name.clone(),
                bytes: image.data_len(),
                base: u16::try_from(base).unwrap_or(u16::MAX),
                start: image.start,
            });
            true
        }
        Err(e) => {
            log::warn!(target: LOG_TARGET, "firmware {} rejected: {e}", info.name);
            false
        }
    }
}
