//! Serial adapter.
//!
//! [`SerialLink`] is the contract the application layer reads through.  The
//! production implementation is [`SerialPortLink`] (the `serialport` crate);
//! tests use [`mock::ScriptedSerialLink`].
//!
//! # Partial-read contract
//!
//! `read_chunk(max)` returns between `0` and `max` bytes.  Returning fewer
//! bytes than requested, including none at all, means the read timeout
//! elapsed; it is not an error.  Only a device-level failure is an `Err`,
//! and the bridge treats it as fatal.

use std::io;

use async_trait::async_trait;
use sotcp_core::SessionSpec;
use tracing::info;

use crate::domain::error::BridgeError;

pub mod mock;
pub mod port;

pub use port::{open_serial, SerialPortLink};

/// A readable, closable serial device handle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SerialLink: Send {
    /// Reads up to `max` bytes, waiting at most the configured timeout.
    async fn read_chunk(&mut self, max: usize) -> io::Result<Vec<u8>>;

    /// Releases the device.
    ///
    /// Returns `NotConnected` when the handle was already closed.
    async fn close(&mut self) -> io::Result<()>;
}

/// Opens the serial device described by `spec`.
///
/// # Errors
///
/// [`BridgeError::Connect`] when the port does not exist, is busy, or a line
/// setting is not supported by the platform backend.
pub fn open_session_serial(spec: &SessionSpec) -> Result<Box<dyn SerialLink>, BridgeError> {
    let settings = spec.serial_settings();
    info!(
        "[{}] Connecting to serial port: {} ({} baud, {}-{}-{})",
        spec.name,
        settings.port,
        settings.baud,
        settings.data_bits.bits(),
        settings.parity,
        settings.stop_bits
    );

    let link = open_serial(&settings).map_err(|source| BridgeError::Connect {
        session: spec.name.clone(),
        target: format!("serial port {}", settings.port),
        source,
    })?;
    Ok(Box::new(link))
}
