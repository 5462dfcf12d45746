//! [`SerialLink`] backed by the `serialport` crate.
//!
//! `serialport` exposes blocking `std::io::Read`.  Each read runs on Tokio's
//! blocking pool so a session waiting on its device never stalls the runtime
//! threads that drive the other sessions.

use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serialport::{FlowControl, SerialPort};
use sotcp_core::{DataBits, Parity, SerialSettings, StopBits};
use tracing::debug;

use super::SerialLink;

fn unsupported(setting: &str, value: impl std::fmt::Display) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{setting} '{value}' is not supported by the serial backend"),
    )
}

/// Maps [`Parity`] onto the backend.  Mark and space parity have no
/// `serialport` equivalent and are rejected.
pub fn to_serialport_parity(parity: Parity) -> io::Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(unsupported("parity", parity)),
    }
}

/// Maps [`StopBits`] onto the backend.  1.5 stop bits are rejected.
pub fn to_serialport_stop_bits(stop_bits: StopBits) -> io::Result<serialport::StopBits> {
    match stop_bits {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::OnePointFive => Err(unsupported("stop bits", stop_bits)),
    }
}

pub fn to_serialport_data_bits(data_bits: DataBits) -> serialport::DataBits {
    match data_bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

/// One bounded read applying the partial-read contract: a timeout yields an
/// empty buffer, any other error is returned.
pub(crate) fn read_partial<R>(reader: &mut R, max: usize) -> io::Result<Vec<u8>>
where
    R: Read + ?Sized,
{
    let mut buf = vec![0u8; max];
    match reader.read(&mut buf) {
        Ok(n) => {
            buf.truncate(n);
            Ok(buf)
        }
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Opens a serial device.
///
/// # Errors
///
/// `InvalidInput` for line settings the backend cannot apply, otherwise the
/// backend's open error.
pub fn open_serial(settings: &SerialSettings) -> io::Result<SerialPortLink> {
    let parity = to_serialport_parity(settings.parity)?;
    let stop_bits = to_serialport_stop_bits(settings.stop_bits)?;

    let port = serialport::new(settings.port.as_str(), settings.baud)
        .data_bits(to_serialport_data_bits(settings.data_bits))
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(FlowControl::None)
        .timeout(settings.timeout)
        .open()
        .map_err(io::Error::from)?;

    debug!("opened serial port {}", settings.port);
    Ok(SerialPortLink {
        port_name: settings.port.clone(),
        port: Some(Arc::new(Mutex::new(port))),
    })
}

/// An open serial device.
///
/// The port sits behind `Arc<Mutex<..>>` so a read can move a handle onto the
/// blocking pool while the link itself stays with its session.
pub struct SerialPortLink {
    port_name: String,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialPortLink {
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl std::fmt::Debug for SerialPortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortLink")
            .field("port_name", &self.port_name)
            .field("open", &self.port.is_some())
            .finish()
    }
}

#[async_trait]
impl SerialLink for SerialPortLink {
    async fn read_chunk(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let port = self.port.as_ref().map(Arc::clone).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "serial port is closed")
        })?;

        tokio::task::spawn_blocking(move || {
            let mut guard = port
                .lock()
                .map_err(|_| io::Error::other("serial port lock poisoned"))?;
            read_partial(&mut **guard, max)
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn close(&mut self) -> io::Result<()> {
        // Dropping the last Arc closes the OS handle.  A read still running
        // on the blocking pool holds a clone until its timeout elapses.
        match self.port.take() {
            Some(port) => {
                drop(port);
                debug!("closed serial port {}", self.port_name);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port is already closed",
            )),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
