//! Infrastructure layer: serial devices and TCP sockets.
//!
//! # Responsibilities
//!
//! - Opening serial ports with typed line settings ([`serial`])
//! - Bounded-timeout serial reads with the partial-read contract
//! - Binding listeners, accepting the one client of each session, and
//!   full-buffer sends ([`tcp`])
//!
//! # What does NOT belong here?
//!
//! - Framing and session lifecycle (that is the application layer)
//! - Configuration file parsing (that is the domain layer)

pub mod serial;
pub mod tcp;

pub use serial::{open_session_serial, SerialLink, SerialPortLink};
pub use tcp::{ClientConnection, SessionListener};
