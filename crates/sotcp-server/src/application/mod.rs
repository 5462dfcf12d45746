//! Application layer: session lifecycle and scheduling.
//!
//! Code here orchestrates the core framing types and talks to devices and
//! sockets only through the infrastructure adapters, so a session can be
//! driven by a scripted serial link in tests exactly as by real hardware.
//!
//! # Sub-modules
//!
//! - **`session`**   – One serial device paired with one TCP listener: bind,
//!   accept, read and forward framed messages, clean up.
//!
//! - **`scheduler`** – Owns every session, runs them sequentially or one task
//!   per session, and owns shutdown and ordered cleanup.

pub mod scheduler;
pub mod session;

pub use scheduler::{RunSummary, SessionScheduler, StopHandle};
pub use session::{BridgeSession, SessionReport};
