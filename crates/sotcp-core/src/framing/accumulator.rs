//! Delimiter-based framing accumulator.
//!
//! Serial devices deliver bytes in arbitrary chunks: one read may end in the
//! middle of a message, or contain several.  [`FrameAccumulator`] buffers raw
//! bytes until the configured delimiter byte arrives and then emits everything
//! before it as one [`Frame`].
//!
//! # State machine
//!
//! ```text
//!             non-delimiter byte
//!   ┌──────┐ ───────────────────▶ ┌──────────────┐ ──┐ non-delimiter byte
//!   │ Idle │                      │ Accumulating │ ◀─┘
//!   └──────┘ ◀─────────────────── └──────────────┘
//!       │      delimiter / cap /
//!       │      flush (emit frame)
//!       └── delimiter: emit empty frame
//! ```
//!
//! The buffer is empty exactly when the machine is `Idle`.  The delimiter is
//! never part of an emitted frame, and bytes are never decoded as text.
//!
//! # Bounded growth
//!
//! A device that never sends the delimiter would otherwise grow the buffer
//! without limit.  Once the buffer reaches `max_len` bytes it is emitted as a
//! [`FrameKind::Overflow`] frame and the machine returns to `Idle`.

/// Current state of a [`FrameAccumulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    /// Nothing buffered.
    Idle,
    /// At least one byte buffered, waiting for the delimiter.
    Accumulating,
}

/// Why a frame was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The delimiter byte arrived.
    Delimited,
    /// The buffer reached its size cap before a delimiter arrived.
    Overflow,
    /// Pending bytes were flushed without a delimiter (idle timeout).
    Idle,
}

/// One message extracted from the serial stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload bytes, delimiter excluded.  May be empty for adjacent delimiters.
    pub bytes: Vec<u8>,
    pub kind: FrameKind,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Buffer plus two-state machine converting raw bytes into frames.
#[derive(Debug)]
pub struct FrameAccumulator {
    delimiter: u8,
    max_len: usize,
    state: FramerState,
    buffer: Vec<u8>,
}

impl FrameAccumulator {
    /// Creates an accumulator splitting on `delimiter`.
    ///
    /// `max_len` is clamped to at least one byte.
    pub fn new(delimiter: u8, max_len: usize) -> Self {
        Self {
            delimiter,
            max_len: max_len.max(1),
            state: FramerState::Idle,
            buffer: Vec::new(),
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Bytes received since the last emitted frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Feeds one chunk of raw bytes and returns the frames it completed, in
    /// input order.  Trailing bytes after the last delimiter stay buffered.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &byte in data {
            if byte == self.delimiter {
                frames.push(self.take(FrameKind::Delimited));
                continue;
            }

            match self.state {
                FramerState::Idle => {
                    self.buffer.push(byte);
                    self.state = FramerState::Accumulating;
                }
                FramerState::Accumulating => self.buffer.push(byte),
            }

            if self.buffer.len() >= self.max_len {
                frames.push(self.take(FrameKind::Overflow));
            }
        }

        frames
    }

    /// Emits any buffered bytes as an [`FrameKind::Idle`] frame.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn flush(&mut self) -> Option<Frame> {
        match self.state {
            FramerState::Idle => None,
            FramerState::Accumulating => Some(self.take(FrameKind::Idle)),
        }
    }

    fn take(&mut self, kind: FrameKind) -> Frame {
        self.state = FramerState::Idle;
        Frame {
            bytes: std::mem::take(&mut self.buffer),
            kind,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
