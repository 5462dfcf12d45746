//! sotcp-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # Layers
//!
//! - [`domain`] holds configuration and the error taxonomy.
//! - [`application`] holds [`application::BridgeSession`] and
//!   [`application::SessionScheduler`].
//! - [`infrastructure`] adapts serial devices and TCP sockets.

pub mod application;
pub mod domain;
pub mod infrastructure;
