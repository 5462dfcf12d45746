//! # sotcp-core
//!
//! Shared, I/O-free building blocks for the serial-over-TCP bridge.
//!
//! The bridge exposes one TCP listening endpoint per configured serial device.
//! Once a client connects, bytes read from the device are re-framed at a
//! configurable delimiter byte and each complete message is forwarded to the
//! client as one send.
//!
//! This crate holds the parts of that pipeline that do not touch sockets or
//! devices:
//!
//! - **`domain`** – [`SessionSpec`], the typed description of one serial↔TCP
//!   pairing, together with the serial line settings ([`Parity`],
//!   [`StopBits`], [`DataBits`]) and the [`Delimiter`] byte.  Validation
//!   failures are reported as [`SpecError`].
//!
//! - **`framing`** – [`FrameAccumulator`], the two-state machine that turns a
//!   raw byte stream into delimiter-bounded [`Frame`]s.
//!
//! The `sotcp-server` crate wires these types to real serial ports and
//! `tokio` sockets.

pub mod domain;
pub mod framing;

pub use domain::session_spec::{
    validate_all, DataBits, Delimiter, FramingSettings, Parity, SerialSettings, SessionSpec,
    SpecError, StopBits,
};
pub use framing::accumulator::{Frame, FrameAccumulator, FrameKind, FramerState};
