//! Forwarding `log` records to the host.
//!
//! Records are queued behind a mutex and drained by the service loop, which
//! sends each as an unnumbered `log` message. Logging never touches the link
//! directly, so it is safe from anywhere, including code the link itself
//! calls.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use parking_lot::Mutex;

/// One formatted log record waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedLog {
    pub level: Level,
    pub target: String,
    pub msg: String,
}

/// Consumer end of the log queue.
#[derive(Debug, Clone)]
pub struct LogQueue {
    inner: Arc<Mutex<VecDeque<QueuedLog>>>,
}

impl LogQueue {
    #[must_use]
    pub fn pop(&self) -> Option<QueuedLog> {
        self.inner.lock().pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// `log::Log` implementation feeding a bounded queue. A full queue rejects
/// the newest record.
pub struct LinkLogger {
    queue: Arc<Mutex<VecDeque<QueuedLog>>>,
    capacity: usize,
    level: LevelFilter,
    lost: Mutex<u64>,
}

impl LinkLogger {
    #[must_use]
    pub fn new(capacity: usize, level: LevelFilter) -> (Self, LogQueue) {
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let logger = Self {
            queue: Arc::clone(&queue),
            capacity,
            level,
            lost: Mutex::new(0),
        };
        (logger, LogQueue { inner: queue })
    }

    /// Records rejected because the queue was full.
    #[must_use]
    pub fn lost(&self) -> u64 {
        *self.lost.lock()
    }
}

impl Log for LinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            *self.lost.lock() += 1;
            return;
        }
        queue.push_back(QueuedLog {
            level: record.level(),
            target: record.target().to_string(),
            msg: record.args().to_string(),
        });
    }

    fn flush(&self) {}
}

/// Install a `LinkLogger` as the global logger.
pub fn install(capacity: usize, level: LevelFilter) -> Result<LogQueue, SetLoggerError> {
    let (logger, queue) = LinkLogger::new(capacity, level);
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(queue)
}

/// Level name as sent in the `lev` field.
#[must_use]
pub const fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warn => "warn",
        Level::Info => "info",
        Level::Debug => "debug",
        Level::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(logger: &LinkLogger, level: Level, msg: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("BusArbiter")
                .args(format_args!("{msg}"))
                .build(),
        );
    }

    #[test]
    fn records_queue_in_order() {
        let (logger, queue) = LinkLogger::new(4, LevelFilter::Debug);
        record(&logger, Level::Warn, "first");
        record(&logger, Level::Debug, "second");
        let first = queue.pop().unwrap();
        assert_eq!(first.level, Level::Warn);
        assert_eq!(first.target, "BusArbiter");
        assert_eq!(first.msg, "first");
        assert_eq!(queue.pop().unwrap().msg, "second");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn full_queue_rejects_newest() {
        let (logger, queue) = LinkLogger::new(2, LevelFilter::Trace);
        for msg in ["a", "b", "c"] {
            record(&logger, Level::Info, msg);
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(logger.lost(), 1);
        assert_eq!(queue.pop().unwrap().msg, "a");
    }

    #[test]
    fn filtered_levels_are_not_queued() {
        let (logger, queue) = LinkLogger::new(4, LevelFilter::Warn);
        record(&logger, Level::Debug, "quiet");
        assert!(queue.is_empty());
    }
}
