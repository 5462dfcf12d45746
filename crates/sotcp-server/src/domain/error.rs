//! Error taxonomy for the bridge.
//!
//! | Class            | Variant(s)                         | Effect                          |
//! |------------------|------------------------------------|---------------------------------|
//! | Config           | [`BridgeError::Config`]            | startup falls back or aborts    |
//! | Connect          | [`BridgeError::Connect`]           | fatal to startup                |
//! | Transport        | [`BridgeError::Transport`], `Task` | fatal, every session shuts down |
//! | Cleanup          | `Close`, `AlreadyClosed`           | logged, never propagated        |
//!
//! An interrupt (Ctrl+C) is not an error: it is a stop request and `run`
//! returns `Ok`.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::domain::config::ConfigError;

/// The operation that failed mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Accept,
    SerialRead,
    Send,
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportOp::Accept => "accept",
            TransportOp::SerialRead => "serial read",
            TransportOp::Send => "send to client",
        })
    }
}

/// A resource released during cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Client,
    Listener,
    Serial,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Client => "client connection",
            Resource::Listener => "TCP listener",
            Resource::Serial => "serial port",
        })
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A serial port or listening socket could not be opened at startup.
    #[error("[{session}] could not open {target}: {source}")]
    Connect {
        session: String,
        target: String,
        #[source]
        source: io::Error,
    },

    /// Accept, serial read or send failed after startup.
    #[error("[{session}] {op} failed: {source}")]
    Transport {
        session: String,
        op: TransportOp,
        #[source]
        source: io::Error,
    },

    /// A session task panicked or was aborted.
    #[error("[{session}] session task ended abnormally: {reason}")]
    Task { session: String, reason: String },

    /// Closing a resource reported an error.
    #[error("[{session}] failed to close {resource}: {source}")]
    Close {
        session: String,
        resource: Resource,
        #[source]
        source: io::Error,
    },

    /// Closing a resource that was already closed.
    #[error("[{session}] {resource} is already closed")]
    AlreadyClosed { session: String, resource: Resource },

    /// `run` was called before `initialize` succeeded.
    #[error("scheduler has not been initialized")]
    NotInitialized,
}

impl BridgeError {
    pub(crate) fn transport(session: &str, op: TransportOp, source: io::Error) -> Self {
        BridgeError::Transport {
            session: session.to_string(),
            op,
            source,
        }
    }

    /// Maps a close failure; `NotConnected` means the resource was already
    /// released.
    pub(crate) fn close(session: &str, resource: Resource, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotConnected {
            BridgeError::AlreadyClosed {
                session: session.to_string(),
                resource,
            }
        } else {
            BridgeError::Close {
                session: session.to_string(),
                resource,
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_maps_not_connected_to_already_closed() {
        let err = BridgeError::close(
            "A",
            Resource::Serial,
            io::Error::from(io::ErrorKind::NotConnected),
        );
        assert!(matches!(
            err,
            BridgeError::AlreadyClosed {
                resource: Resource::Serial,
                ..
            }
        ));
    }

    #[test]
    fn test_close_keeps_other_errors() {
        let err = BridgeError::close(
            "A",
            Resource::Client,
            io::Error::from(io::ErrorKind::BrokenPipe),
        );
        assert!(matches!(err, BridgeError::Close { .. }));
    }

    #[test]
    fn test_transport_message_names_session_and_operation() {
        let err = BridgeError::transport(
            "Sensor1",
            TransportOp::SerialRead,
            io::Error::new(io::ErrorKind::Other, "device unplugged"),
        );
        let msg = err.to_string();
        assert!(msg.contains("[Sensor1]"));
        assert!(msg.contains("serial read"));
        assert!(msg.contains("device unplugged"));
    }
}
