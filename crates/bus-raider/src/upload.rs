//! Reassembly of files sent as `ufStart` / `ufBlock` / `ufEnd`.

use serde_json::{Map, Value};

const LOG_TARGET: &str = "CmdHandler";

/// What `ufStart` declared about a file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub file_type: String,
    pub len: usize,
    /// The whole start command, for handler-specific fields.
    pub start: Map<String, Value>,
}

impl FileInfo {
    #[must_use]
    pub fn is_firmware(&self) -> bool {
        self.file_type.eq_ignore_ascii_case("firmware")
    }
}

/// One in-progress upload.
#[derive(Debug)]
pub struct FileReception {
    info: FileInfo,
    buf: Vec<u8>,
    received: usize,
    blocks: u32,
    last_block_us: u64,
}

impl FileReception {
    /// Allocate the receive buffer. `None` if the allocation fails.
    #[must_use]
    pub fn start(info: FileInfo, now_us: u64) -> Option<Self> {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(info.len).is_err() {
            log::warn!(target: LOG_TARGET, "ufStart {}: cannot allocate {} bytes", info.name, info.len);
            return None;
        }
        buf.resize(info.len, 0);
        log::debug!(target: LOG_TARGET, "ufStart {} type {} len {}", info.name, info.file_type, info.len);
        Some(Self {
            info,
            buf,
            received: 0,
            blocks: 0,
            last_block_us: now_us,
        })
    }

    /// Store a chunk at `offset`. Chunks outside the declared length are
    /// dropped.
    pub fn block(&mut self, offset: usize, data: &[u8], now_us: u64) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        if end > self.buf.len() {
            log::debug!(target: LOG_TARGET, "ufBlock {offset}+{} beyond {}", data.len(), self.buf.len());
            return false;
        }
        self.buf[offset..end].copy_from_slice(data);
        self.received += data.len();
        self.blocks += 1;
        self.last_block_us = now_us;
        true
    }

    #[must_use]
    pub const fn blocks(&self) -> u32 {
        self.blocks
    }

    #[must_use]
    pub const fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Declared length and bytes received so far, while bytes are still
    /// outstanding.
    #[must_use]
    pub const fn progress(&self) -> Option<(usize, usize)> {
        if self.received >= self.info.len {
            return None;
        }
        Some((self.info.len, self.received))
    }

    #[must_use]
    pub fn is_idle(&self, now_us: u64, timeout_us: u64) -> bool {
        now_us.saturating_sub(self.last_block_us) >= timeout_us
    }

    /// Hand over the file. The data is what was received, capped at the
    /// declared length.
    #[must_use]
    pub fn finish(self) -> (FileInfo, Vec<u8>) {
        let mut buf = self.buf;
        buf.truncate(self.received.min(self.info.len));
        (self.info, buf)
    }
}
