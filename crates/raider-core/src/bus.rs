//! Memory and I/O bus interface.

/// Memory bus interface.
///
/// A CPU core reads and writes the 16-bit memory space of the target
/// through this trait. Implementations decide where the bytes live.
pub trait Bus {
    /// Read a byte from the given address.
    fn read(&mut self, address: u16) -> u8;

    /// Write a byte to the given address.
    fn write(&mut self, address: u16, value: u8);
}

/// A bus that also has a separate I/O port space.
///
/// The Z80 reaches its 16-bit I/O space with IN and OUT instructions; the
/// full address bus is driven during those cycles.
pub trait IoBus: Bus {
    /// Read a byte from the given I/O port.
    fn read_io(&mut self, port: u16) -> u8;

    /// Write a byte to the given I/O port.
    fn write_io(&mut self, port: u16, value: u8);
}

/// Flat 64 KiB memory with a 256-port I/O space decoded on the low address byte.
#[derive(Clone)]
pub struct FlatMemory {
    mem: Box<[u8; 0x1_0000]>,
    io: [u8; 256],
    /// Value returned for I/O reads of ports nothing has written.
    io_default: u8,
    io_written: [bool; 256],
}

impl FlatMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_io_default(0xFF)
    }

    #[must_use]
    pub fn with_io_default(io_default: u8) -> Self {
        Self {
            mem: Box::new([0; 0x1_0000]),
            io: [0; 256],
            io_default,
            io_written: [false; 256],
        }
    }

    /// Copy `data` into memory starting at `address`, wrapping at 64K.
    pub fn load(&mut self, address: u16, data: &[u8]) {
        let mut addr = address;
        for &byte in data {
            self.mem[usize::from(addr)] = byte;
            addr = addr.wrapping_add(1);
        }
    }

    /// Read a byte without side effects.
    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        self.mem[usize::from(address)]
    }

    /// The whole memory image.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.mem[..]
    }

    /// Replace memory from an image; shorter images leave the tail untouched.
    pub fn copy_from(&mut self, image: &[u8]) {
        let len = image.len().min(self.mem.len());
        self.mem[..len].copy_from_slice(&image[..len]);
    }

    /// Forget every I/O write so reads return the default value again.
    pub fn clear_io(&mut self) {
        self.io = [0; 256];
        self.io_written = [false; 256];
    }
}

impl Default for FlatMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for FlatMemory {
    fn read(&mut self, address: u16) -> u8 {
        self.mem[usize::from(address)]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.mem[usize::from(address)] = value;
    }
}

impl IoBus for FlatMemory {
    fn read_io(&mut self, port: u16) -> u8 {
        let idx = usize::from(port & 0xFF);
        if self.io_written[idx] {
            self.io[idx]
        } else {
            self.io_default
        }
    }

    fn write_io(&mut self, port: u16, value: u8) {
        let idx = usize::from(port & 0xFF);
        self.io[idx] = value;
        self.io_written[idx] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_wraps_at_top_of_memory() {
        let mut mem = FlatMemory::new();
        mem.load(0xFFFF, &[0x11, 0x22]);
        assert_eq!(mem.peek(0xFFFF), 0x11);
        assert_eq!(mem.peek(0x0000), 0x22);
    }

    #[test]
    fn unwritten_ports_return_default() {
        let mut mem = FlatMemory::with_io_default(0x80);
        assert_eq!(mem.read_io(0x1234), 0x80);
        mem.write_io(0x0034, 0x55);
        assert_eq!(mem.read_io(0xFF34), 0x55, "ports decode on the low byte");
        mem.clear_io();
        assert_eq!(mem.read_io(0x34), 0x80);
    }
}
