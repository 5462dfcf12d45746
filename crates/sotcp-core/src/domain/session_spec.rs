//! Typed session specifications.
//!
//! A [`SessionSpec`] is one configured serial↔TCP pairing.  The field names
//! match the keys of the on-disk configuration so a spec deserializes directly
//! from one `[[session]]` table:
//!
//! ```toml
//! [[session]]
//! name = "Sensor1"
//! tcp_address = "0.0.0.0"
//! tcp_port = 5000
//! serial_port = "/dev/ttyUSB0"
//! serial_baud = 9600
//! serial_parity = "none"
//! serial_stopbits = 1
//! serial_bytesize = 8
//! serial_timeout = 1.0
//! serial_read_bytes = 32
//! serial_send_on = "\r"
//! ```
//!
//! Every key except `name` falls back to the defaults listed on
//! [`SessionSpec::with_defaults`].
//!
//! # Line settings
//!
//! Parity, stop bits and byte size are closed enumerations.  An unknown value
//! in the configuration is rejected during deserialization with a message that
//! names the accepted values, instead of surfacing later as a failed lookup.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Default cap on a single buffered message, in bytes.
pub const DEFAULT_MAX_MESSAGE: usize = 64 * 1024;

/// Validation failures for one spec or a set of specs.
#[derive(Debug, Error, PartialEq)]
pub enum SpecError {
    /// A session was configured without a name.
    #[error("session name must not be empty")]
    EmptyName,

    /// Two sessions share the same name.
    #[error("duplicate session name '{0}'")]
    DuplicateName(String),

    /// Two sessions would bind the same TCP endpoint.
    #[error("sessions '{first}' and '{second}' both bind {endpoint}")]
    DuplicateEndpoint {
        first: String,
        second: String,
        endpoint: SocketAddr,
    },

    /// `tcp_address` is not an IP address.
    #[error("[{name}] invalid tcp_address '{address}'")]
    InvalidAddress { name: String, address: String },

    /// `serial_read_bytes` is zero.
    #[error("[{name}] serial_read_bytes must be greater than zero")]
    ZeroReadSize { name: String },

    /// `serial_baud` is zero.
    #[error("[{name}] serial_baud must be greater than zero")]
    ZeroBaud { name: String },

    /// `serial_timeout` is negative, zero, NaN or too large.
    #[error("[{name}] serial_timeout must be a positive number of seconds, got {value}")]
    InvalidTimeout { name: String, value: f64 },

    /// `serial_flush_idle` is negative, zero, NaN or too large.
    #[error("[{name}] serial_flush_idle must be a positive number of seconds, got {value}")]
    InvalidFlushIdle { name: String, value: f64 },

    /// `serial_max_message` is zero.
    #[error("[{name}] serial_max_message must be greater than zero")]
    ZeroMaxMessage { name: String },
}

// ── Line settings ─────────────────────────────────────────────────────────────

/// Serial parity.
///
/// `Mark` and `Space` are accepted by the configuration even though not every
/// serial backend can apply them; the adapter reports that at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Parity::None => "none",
            Parity::Even => "even",
            Parity::Odd => "odd",
            Parity::Mark => "mark",
            Parity::Space => "space",
        };
        f.write_str(s)
    }
}

/// Number of stop bits: `1`, `1.5` or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        f.write_str(s)
    }
}

impl Serialize for StopBits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StopBits::One => serializer.serialize_u8(1),
            StopBits::OnePointFive => serializer.serialize_f64(1.5),
            StopBits::Two => serializer.serialize_u8(2),
        }
    }
}

impl<'de> Deserialize<'de> for StopBits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StopBitsVisitor;

        impl<'de> Visitor<'de> for StopBitsVisitor {
            type Value = StopBits;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("stop bits 1, 1.5 or 2")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<StopBits, E> {
                match v {
                    1 => Ok(StopBits::One),
                    2 => Ok(StopBits::Two),
                    _ => Err(E::invalid_value(Unexpected::Signed(v), &self)),
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<StopBits, E> {
                match v {
                    1 => Ok(StopBits::One),
                    2 => Ok(StopBits::Two),
                    _ => Err(E::invalid_value(Unexpected::Unsigned(v), &self)),
                }
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<StopBits, E> {
                if v == 1.0 {
                    Ok(StopBits::One)
                } else if v == 1.5 {
                    Ok(StopBits::OnePointFive)
                } else if v == 2.0 {
                    Ok(StopBits::Two)
                } else {
                    Err(E::invalid_value(Unexpected::Float(v), &self))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<StopBits, E> {
                match v.trim() {
                    "1" => Ok(StopBits::One),
                    "1.5" => Ok(StopBits::OnePointFive),
                    "2" => Ok(StopBits::Two),
                    _ => Err(E::invalid_value(Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(StopBitsVisitor)
    }
}

/// Character size in bits (5 through 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    /// Number of bits per character.
    pub const fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u64> for DataBits {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(other),
        }
    }
}

impl Serialize for DataBits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for DataBits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DataBitsVisitor;

        impl<'de> Visitor<'de> for DataBitsVisitor {
            type Value = DataBits;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte size between 5 and 8")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<DataBits, E> {
                DataBits::try_from(v).map_err(|v| E::invalid_value(Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<DataBits, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(|u| DataBits::try_from(u).ok())
                    .ok_or_else(|| E::invalid_value(Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_any(DataBitsVisitor)
    }
}

/// The single byte that terminates one message from the serial device.
///
/// Configured either as a one-byte string (`"\r"`) or as an integer
/// (`13`).  Strings whose UTF-8 encoding is longer than one byte are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delimiter(u8);

impl Delimiter {
    pub const CARRIAGE_RETURN: Delimiter = Delimiter(b'\r');

    pub const fn new(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn byte(self) -> u8 {
        self.0
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Self::CARRIAGE_RETURN
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

impl Serialize for Delimiter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_ascii() {
            serializer.serialize_str(&char::from(self.0).to_string())
        } else {
            serializer.serialize_u8(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Delimiter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DelimiterVisitor;

        impl<'de> Visitor<'de> for DelimiterVisitor {
            type Value = Delimiter;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a one-byte string or an integer between 0 and 255")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Delimiter, E> {
                match v.as_bytes() {
                    [byte] => Ok(Delimiter(*byte)),
                    _ => Err(E::invalid_value(Unexpected::Str(v), &self)),
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Delimiter, E> {
                u8::try_from(v)
                    .map(Delimiter)
                    .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Delimiter, E> {
                u8::try_from(v)
                    .map(Delimiter)
                    .map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_any(DelimiterVisitor)
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

/// Everything the serial adapter needs to open a device.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub data_bits: DataBits,
    /// Upper bound on one blocking read.  A read that times out returns
    /// whatever arrived, possibly nothing.
    pub timeout: Duration,
}

/// Everything the framing layer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FramingSettings {
    pub delimiter: Delimiter,
    /// Maximum bytes requested from the device per read.
    pub read_chunk: usize,
    /// Buffered bytes are forwarded as an overflow frame at this size.
    pub max_message: usize,
    /// Buffered bytes are forwarded after this long without new input.
    pub flush_idle: Option<Duration>,
}

// ── SessionSpec ───────────────────────────────────────────────────────────────

/// One configured serial↔TCP pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Identifier used in log output.
    pub name: String,
    #[serde(default = "default_tcp_address")]
    pub tcp_address: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,
    #[serde(default)]
    pub serial_parity: Parity,
    #[serde(default)]
    pub serial_stopbits: StopBits,
    #[serde(default)]
    pub serial_bytesize: DataBits,
    /// Read timeout in seconds.
    #[serde(default = "default_serial_timeout")]
    pub serial_timeout: f64,
    #[serde(default = "default_serial_read_bytes")]
    pub serial_read_bytes: usize,
    #[serde(default)]
    pub serial_send_on: Delimiter,
    #[serde(default = "default_serial_max_message")]
    pub serial_max_message: usize,
    /// Idle flush interval in seconds; absent disables idle flushing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_flush_idle: Option<f64>,
}

fn default_tcp_address() -> String {
    "0.0.0.0".to_string()
}
fn default_tcp_port() -> u16 {
    5000
}
fn default_serial_port() -> String {
    "COM3".to_string()
}
fn default_serial_baud() -> u32 {
    9600
}
fn default_serial_timeout() -> f64 {
    1.0
}
fn default_serial_read_bytes() -> usize {
    32
}
fn default_serial_max_message() -> usize {
    DEFAULT_MAX_MESSAGE
}

impl SessionSpec {
    /// Builds a spec named `name` with every other field at its default.
    ///
    /// | Field               | Default      |
    /// |---------------------|--------------|
    /// | tcp_address         | `0.0.0.0`    |
    /// | tcp_port            | `5000`       |
    /// | serial_port         | `COM3`       |
    /// | serial_baud         | `9600`       |
    /// | serial_parity       | none         |
    /// | serial_stopbits     | 1            |
    /// | serial_bytesize     | 8            |
    /// | serial_timeout      | 1 s          |
    /// | serial_read_bytes   | 32           |
    /// | serial_send_on      | `\r`         |
    /// | serial_max_message  | 65536        |
    /// | serial_flush_idle   | disabled     |
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tcp_address: default_tcp_address(),
            tcp_port: default_tcp_port(),
            serial_port: default_serial_port(),
            serial_baud: default_serial_baud(),
            serial_parity: Parity::default(),
            serial_stopbits: StopBits::default(),
            serial_bytesize: DataBits::default(),
            serial_timeout: default_serial_timeout(),
            serial_read_bytes: default_serial_read_bytes(),
            serial_send_on: Delimiter::default(),
            serial_max_message: default_serial_max_message(),
            serial_flush_idle: None,
        }
    }

    /// Resolves the TCP endpoint to bind.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::InvalidAddress`] when `tcp_address` is not an IPv4
    /// or IPv6 literal.
    pub fn bind_addr(&self) -> Result<SocketAddr, SpecError> {
        let ip: IpAddr = self
            .tcp_address
            .trim()
            .parse()
            .map_err(|_| SpecError::InvalidAddress {
                name: self.name.clone(),
                address: self.tcp_address.clone(),
            })?;
        Ok(SocketAddr::new(ip, self.tcp_port))
    }

    /// Serial line settings for the adapter.
    ///
    /// Call [`validate`](Self::validate) first; an invalid timeout falls back
    /// to one second here rather than panicking.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            port: self.serial_port.clone(),
            baud: self.serial_baud,
            parity: self.serial_parity,
            stop_bits: self.serial_stopbits,
            data_bits: self.serial_bytesize,
            timeout: Duration::try_from_secs_f64(self.serial_timeout)
                .unwrap_or(Duration::from_secs(1)),
        }
    }

    /// Framing settings for the session's accumulator.
    pub fn framing_settings(&self) -> FramingSettings {
        FramingSettings {
            delimiter: self.serial_send_on,
            read_chunk: self.serial_read_bytes,
            max_message: self.serial_max_message,
            flush_idle: self
                .serial_flush_idle
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }

    /// Checks the fields of this spec in isolation.
    ///
    /// # Errors
    ///
    /// Returns the first [`SpecError`] found.
    pub fn validate(&self) -> Result<(), SpecError> {
        let name = || self.name.clone();

        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        self.bind_addr()?;
        if self.serial_baud == 0 {
            return Err(SpecError::ZeroBaud { name: name() });
        }
        if self.serial_read_bytes == 0 {
            return Err(SpecError::ZeroReadSize { name: name() });
        }
        if self.serial_max_message == 0 {
            return Err(SpecError::ZeroMaxMessage { name: name() });
        }
        if !is_positive_duration(self.serial_timeout) {
            return Err(SpecError::InvalidTimeout {
                name: name(),
                value: self.serial_timeout,
            });
        }
        if let Some(idle) = self.serial_flush_idle {
            if !is_positive_duration(idle) {
                return Err(SpecError::InvalidFlushIdle {
                    name: name(),
                    value: idle,
                });
            }
        }
        Ok(())
    }
}

fn is_positive_duration(secs: f64) -> bool {
    secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}

/// Validates every spec and the constraints between them.
///
/// Names must be unique.  Endpoints must be unique unless the port is `0`
/// (the OS picks a distinct ephemeral port for each bind).
///
/// # Errors
///
/// Returns the first [`SpecError`] found, in configuration order.
pub fn validate_all(specs: &[SessionSpec]) -> Result<(), SpecError> {
    let mut names = HashSet::new();
    let mut endpoints: Vec<(SocketAddr, &str)> = Vec::new();

    for spec in specs {
        spec.validate()?;

        if !names.insert(spec.name.as_str()) {
            return Err(SpecError::DuplicateName(spec.name.clone()));
        }

        let endpoint = spec.bind_addr()?;
        if endpoint.port() != 0 {
            if let Some((_, first)) = endpoints.iter().find(|(e, _)| *e == endpoint) {
                return Err(SpecError::DuplicateEndpoint {
                    first: (*first).to_string(),
                    second: spec.name.clone(),
                    endpoint,
                });
            }
            endpoints.push((endpoint, spec.name.as_str()));
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
