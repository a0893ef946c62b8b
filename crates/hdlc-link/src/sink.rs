use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Byte sink for outbound wire data.
pub trait LinkSink {
    /// Queue bytes for transmission.
    fn put_bytes(&mut self, bytes: &[u8]);

    /// Free space in the transmit queue, in bytes.
    fn tx_available(&self) -> usize;
}

/// In-memory sink. Clones share the captured bytes, so a test can keep
/// one handle while the other is boxed into the code under test.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    bytes: Rc<RefCell<Vec<u8>>>,
    available: Rc<Cell<usize>>,
}

impl CaptureSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Rc::new(RefCell::new(Vec::new())),
            available: Rc::new(Cell::new(usize::MAX)),
        }
    }

    /// Pretend the transmit queue has only `bytes` free.
    pub fn set_available(&self, bytes: usize) {
        self.available.set(bytes);
    }

    /// Remove and return everything captured so far.
    #[must_use]
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.bytes.borrow_mut())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.borrow().is_empty()
    }
}

impl Default for CaptureSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSink for CaptureSink {
    fn put_bytes(&mut self, bytes: &[u8]) {
        self.bytes.borrow_mut().extend_from_slice(bytes);
    }

    fn tx_available(&self) -> usize {
        self.available.get()
    }
}
