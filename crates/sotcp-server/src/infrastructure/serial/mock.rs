//! Scripted in-memory [`SerialLink`] for exercising sessions without hardware.
//!
//! A script is a queue of read outcomes.  Each `read_chunk` call consumes one
//! step; data longer than the requested size is split across calls the way a
//! real device delivers it.  Once the script runs out the link behaves like an
//! idle device: every read sleeps for the idle delay and returns no bytes.
//!
//! ```
//! use sotcp_server::infrastructure::serial::mock::ScriptedSerialLink;
//!
//! let link = ScriptedSerialLink::new()
//!     .then_data(b"abc\r")
//!     .then_timeout()
//!     .then_data(b"def\r");
//! let counts = link.counters();
//! assert_eq!(counts.reads(), 0);
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::SerialLink;

const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug)]
enum Step {
    Data(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    Timeout,
    Fail(io::ErrorKind),
}

/// Shared counters that outlive the link once it is boxed into a session.
#[derive(Debug, Clone, Default)]
pub struct SerialCounters {
    reads: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl SerialCounters {
    /// Number of `read_chunk` calls made so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `close` calls made so far, successful or not.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ScriptedSerialLink {
    script: VecDeque<Step>,
    idle_delay: Duration,
    fail_close: bool,
    closed: bool,
    counts: SerialCounters,
}

impl Default for ScriptedSerialLink {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSerialLink {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            idle_delay: DEFAULT_IDLE_DELAY,
            fail_close: false,
            closed: false,
            counts: SerialCounters::default(),
        }
    }

    /// Queues bytes for the following read(s).
    pub fn then_data(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.script.push_back(Step::Data(bytes.as_ref().to_vec()));
        self
    }

    /// Queues bytes delivered by a read that blocks for `delay` first, like a
    /// device answering late within its read timeout.
    pub fn then_data_after(mut self, delay: Duration, bytes: impl AsRef<[u8]>) -> Self {
        self.script.push_back(Step::Delayed(delay, bytes.as_ref().to_vec()));
        self
    }

    /// Queues one read that times out with no bytes.
    pub fn then_timeout(mut self) -> Self {
        self.script.push_back(Step::Timeout);
        self
    }

    /// Queues one read that fails with `kind`.
    pub fn then_fail(mut self, kind: io::ErrorKind) -> Self {
        self.script.push_back(Step::Fail(kind));
        self
    }

    /// How long a read waits once the script is exhausted.
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    /// Makes the first `close` report an I/O error.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn counters(&self) -> SerialCounters {
        self.counts.clone()
    }
}

impl ScriptedSerialLink {
    /// Pops the data step at the front, returning at most `max` bytes and
    /// leaving the remainder queued.
    fn take_data(&mut self, max: usize) -> io::Result<Vec<u8>> {
        match self.script.pop_front() {
            Some(Step::Data(mut bytes)) => {
                if bytes.len() > max {
                    let rest = bytes.split_off(max);
                    self.script.push_front(Step::Data(rest));
                }
                Ok(bytes)
            }
            Some(other) => {
                self.script.push_front(other);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl SerialLink for ScriptedSerialLink {
    async fn read_chunk(&mut self, max: usize) -> io::Result<Vec<u8>> {
        self.counts.reads.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "scripted serial link is closed",
            ));
        }

        match self.script.pop_front() {
            Some(step @ Step::Data(_)) => {
                self.script.push_front(step);
                self.take_data(max)
            }
            Some(Step::Delayed(delay, bytes)) => {
                tokio::time::sleep(delay).await;
                self.script.push_front(Step::Data(bytes));
                self.take_data(max)
            }
            Some(Step::Timeout) => Ok(Vec::new()),
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted serial failure")),
            None => {
                tokio::time::sleep(self.idle_delay).await;
                Ok(Vec::new())
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.counts.closes.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "scripted serial link is already closed",
            ));
        }
        self.closed = true;
        if self.fail_close {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted close failure"));
        }
        Ok(())
    }
}
