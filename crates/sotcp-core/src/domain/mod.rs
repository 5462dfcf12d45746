//! Domain types describing configured bridge sessions.
//!
//! Nothing in here opens a port or a socket; the server crate turns a
//! [`SessionSpec`] into live resources.

pub mod session_spec;

pub use session_spec::{
    validate_all, DataBits, Delimiter, FramingSettings, Parity, SerialSettings, SessionSpec,
    SpecError, StopBits,
};
