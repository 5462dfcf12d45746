//! BridgeSession: one serial device paired with one TCP listening endpoint.
//!
//! A session owns its serial handle, its listener, at most one client
//! connection and a [`FrameAccumulator`].  The scheduler drives it through
//! these phases:
//!
//! ```text
//! new ──► bind ──► accept ──► read_and_forward (repeated) ──► cleanup
//! ```
//!
//! There is no reconnect: once accepted, the client stays attached until the
//! whole server shuts down or a transport error ends the run.
//!
//! # Invariants
//!
//! - The accumulator buffer is empty after construction and after every
//!   emitted frame.
//! - At most one client is attached.
//! - The delimiter byte is never forwarded.
//! - The serial handle is opened before construction and closed exactly once
//!   by [`BridgeSession::cleanup`].

use std::net::SocketAddr;
use std::time::Instant;

use sotcp_core::{Frame, FrameAccumulator, FrameKind, FramingSettings, SessionSpec};
use tracing::{debug, info, trace, warn};

use crate::domain::error::{BridgeError, Resource, TransportOp};
use crate::infrastructure::serial::SerialLink;
use crate::infrastructure::tcp::{ClientConnection, SessionListener};

/// Per-session totals reported when the scheduler stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub name: String,
    /// Address of the client that was attached, if one ever connected.
    pub client: Option<SocketAddr>,
    pub frames_forwarded: u64,
    pub bytes_forwarded: u64,
}

pub struct BridgeSession {
    spec: SessionSpec,
    bind_addr: SocketAddr,
    framing: FramingSettings,
    accumulator: FrameAccumulator,
    listener: Option<SessionListener>,
    client: Option<ClientConnection>,
    serial: Box<dyn SerialLink>,
    last_input: Instant,
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("name", &self.spec.name)
            .field("bind_addr", &self.bind_addr)
            .field("listener", &self.listener)
            .field("client", &self.client)
            .field("pending", &self.accumulator.pending().len())
            .finish_non_exhaustive()
    }
}

impl BridgeSession {
    /// Creates a session around an already-open serial handle.
    ///
    /// The listener is not bound yet; call [`bind`](Self::bind).
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] when `spec` fails validation.
    pub fn new(spec: SessionSpec, serial: Box<dyn SerialLink>) -> Result<Self, BridgeError> {
        spec.validate()
            .map_err(|e| BridgeError::Config(e.into()))?;
        let bind_addr = spec
            .bind_addr()
            .map_err(|e| BridgeError::Config(e.into()))?;
        let framing = spec.framing_settings();
        let accumulator = FrameAccumulator::new(framing.delimiter.byte(), framing.max_message);

        Ok(Self {
            spec,
            bind_addr,
            framing,
            accumulator,
            listener: None,
            client: None,
            serial,
            last_input: Instant::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    /// The bound address once [`bind`](Self::bind) succeeded.  With port `0`
    /// this is the port the OS picked.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(SessionListener::local_addr)
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client.as_ref().map(ClientConnection::peer_addr)
    }

    /// Bytes buffered since the last emitted frame.
    pub fn pending(&self) -> &[u8] {
        self.accumulator.pending()
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            name: self.spec.name.clone(),
            client: self.client_addr(),
            frames_forwarded: self.client.as_ref().map_or(0, ClientConnection::frames_sent),
            bytes_forwarded: self.client.as_ref().map_or(0, ClientConnection::bytes_sent),
        }
    }

    /// Binds and starts listening.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Connect`] when the address is in use or not bindable.
    pub async fn bind(&mut self) -> Result<SocketAddr, BridgeError> {
        let listener = SessionListener::bind(self.bind_addr)
            .await
            .map_err(|source| BridgeError::Connect {
                session: self.spec.name.clone(),
                target: format!("TCP listener on {}", self.bind_addr),
                source,
            })?;
        let local = listener.local_addr();
        info!("[{}] Listening on {}", self.spec.name, local);
        self.listener = Some(listener);
        Ok(local)
    }

    /// Waits for the one client this session serves.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] with [`TransportOp::Accept`] when the
    /// listener fails or is not bound.
    pub async fn accept(&mut self) -> Result<SocketAddr, BridgeError> {
        let listener = self.listener.as_ref().ok_or_else(|| {
            BridgeError::transport(
                &self.spec.name,
                TransportOp::Accept,
                std::io::Error::new(std::io::ErrorKind::NotConnected, "listener is not bound"),
            )
        })?;
        let client = listener
            .accept()
            .await
            .map_err(|e| BridgeError::transport(&self.spec.name, TransportOp::Accept, e))?;

        let peer = client.peer_addr();
        info!("[{}] Client connected from {}", self.spec.name, peer);
        self.client = Some(client);
        self.last_input = Instant::now();
        Ok(peer)
    }

    /// Performs one bounded serial read and returns the frames it completed.
    ///
    /// An empty read is a timeout, not an error.  When idle flushing is
    /// enabled and nothing has arrived for that long, pending bytes are
    /// returned as an idle frame.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] with [`TransportOp::SerialRead`] on a device
    /// failure.
    pub async fn read_frames(&mut self) -> Result<Vec<Frame>, BridgeError> {
        let chunk = self
            .serial
            .read_chunk(self.framing.read_chunk)
            .await
            .map_err(|e| BridgeError::transport(&self.spec.name, TransportOp::SerialRead, e))?;

        if chunk.is_empty() {
            trace!("[{}] serial read timed out with no data", self.spec.name);
            return Ok(self.idle_flush().into_iter().collect());
        }

        trace!("[{}] read {} serial bytes", self.spec.name, chunk.len());
        self.last_input = Instant::now();
        let frames = self.accumulator.feed(&chunk);
        for frame in frames.iter().filter(|f| f.kind == FrameKind::Overflow) {
            warn!(
                "[{}] no delimiter within {} bytes, forwarding buffered bytes",
                self.spec.name,
                frame.len()
            );
        }
        Ok(frames)
    }

    fn idle_flush(&mut self) -> Option<Frame> {
        let idle = self.framing.flush_idle?;
        if self.last_input.elapsed() < idle {
            return None;
        }
        let frame = self.accumulator.flush()?;
        debug!(
            "[{}] flushing {} bytes after {:?} without a delimiter",
            self.spec.name,
            frame.len(),
            idle
        );
        Some(frame)
    }

    /// Sends one frame to the attached client.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] with [`TransportOp::Send`] when no client is
    /// attached or the socket fails.
    pub async fn forward(&mut self, frame: &Frame) -> Result<(), BridgeError> {
        match self.client.as_mut() {
            Some(client) => forward_frame(&self.spec.name, client, frame).await,
            None => Err(BridgeError::transport(
                &self.spec.name,
                TransportOp::Send,
                std::io::Error::new(std::io::ErrorKind::NotConnected, "no client attached"),
            )),
        }
    }

    /// Reads once from the serial device and forwards every completed frame.
    /// Returns the number of frames forwarded.
    pub async fn read_and_forward(&mut self) -> Result<usize, BridgeError> {
        let frames = self.read_frames().await?;
        for frame in &frames {
            self.forward(frame).await?;
        }
        Ok(frames.len())
    }

    /// Detaches the client so a writer task can own it while this session
    /// keeps reading the serial device.
    pub(crate) fn take_client(&mut self) -> Option<ClientConnection> {
        self.client.take()
    }

    pub(crate) fn restore_client(&mut self, client: ClientConnection) {
        self.client = Some(client);
    }

    /// Closes the client (if one is attached), the listener, then the serial
    /// handle.
    ///
    /// Every close is attempted even when an earlier one fails.  Failures are
    /// logged and returned; they are never propagated as a run failure.
    pub async fn cleanup(&mut self) -> Vec<BridgeError> {
        let name = self.spec.name.clone();
        let mut failures = Vec::new();

        if let Some(client) = self.client.as_mut() {
            info!("[{}] Closing client connection {}", name, client.peer_addr());
            if let Err(e) = client.close().await {
                failures.push(BridgeError::close(&name, Resource::Client, e));
            }
        }

        match self.listener.as_mut() {
            Some(listener) => {
                info!("[{}] Closing TCP listener on {}", name, listener.local_addr());
                if let Err(e) = listener.close() {
                    failures.push(BridgeError::close(&name, Resource::Listener, e));
                }
            }
            None => debug!("[{}] TCP listener was never bound", name),
        }

        info!("[{}] Closing serial port {}", name, self.spec.serial_port);
        if let Err(e) = self.serial.close().await {
            failures.push(BridgeError::close(&name, Resource::Serial, e));
        }

        for failure in &failures {
            warn!("{failure}");
        }
        failures
    }
}

/// Sends one frame as a single full-buffer write.
pub(crate) async fn forward_frame(
    session: &str,
    client: &mut ClientConnection,
    frame: &Frame,
) -> Result<(), BridgeError> {
    client
        .send_all(&frame.bytes)
        .await
        .map_err(|e| BridgeError::transport(session, TransportOp::Send, e))?;
    debug!(
        "[{}] Sent {} bytes to {}",
        session,
        frame.len(),
        client.peer_addr()
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::mock::ScriptedSerialLink;
    use crate::infrastructure::serial::MockSerialLink;
    use std::io;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn loopback_spec(name: &str) -> SessionSpec {
        let mut spec = SessionSpec::with_defaults(name);
        spec.tcp_address = "127.0.0.1".to_string();
        spec.tcp_port = 0;
        spec
    }

    /// Binds `session`, connects a peer and accepts it.
    async fn attach(session: &mut BridgeSession) -> TcpStream {
        let addr = session.bind().await.expect("bind");
        let peer = TcpStream::connect(addr).await.expect("connect");
        session.accept().await.expect("accept");
        peer
    }

    #[test]
    fn test_new_rejects_invalid_spec() {
        let mut spec = loopback_spec("bad");
        spec.serial_read_bytes = 0;

        let result = BridgeSession::new(spec, Box::new(ScriptedSerialLink::new()));

        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_new_session_has_empty_buffer_and_no_client() {
        let session =
            BridgeSession::new(loopback_spec("A"), Box::new(ScriptedSerialLink::new())).unwrap();

        assert!(session.pending().is_empty());
        assert!(session.client_addr().is_none());
        assert!(session.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_read_and_forward_sends_delimited_messages() {
        // Arrange
        let serial = ScriptedSerialLink::new().then_data(b"abc\rdef\r");
        let mut session = BridgeSession::new(loopback_spec("A"), Box::new(serial)).unwrap();
        let mut peer = attach(&mut session).await;

        // Act
        let forwarded = session.read_and_forward().await.expect("forward");

        // Assert
        assert_eq!(forwarded, 2);
        assert!(session.pending().is_empty());
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcdef");
        assert_eq!(session.report().frames_forwarded, 2);
        assert_eq!(session.report().bytes_forwarded, 6);
    }

    #[tokio::test]
    async fn test_partial_reads_accumulate_across_calls() {
        let mut spec = loopback_spec("A");
        spec.serial_read_bytes = 4;
        let serial = ScriptedSerialLink::new()
            .then_data(b"hel")
            .then_timeout()
            .then_data(b"lo wo")
            .then_data(b"rld\r");
        let mut session = BridgeSession::new(spec, Box::new(serial)).unwrap();
        let mut peer = attach(&mut session).await;

        assert_eq!(session.read_and_forward().await.unwrap(), 0);
        assert_eq!(session.pending(), b"hel");
        assert_eq!(session.read_and_forward().await.unwrap(), 0);
        assert_eq!(session.read_and_forward().await.unwrap(), 0);
        assert_eq!(session.pending(), b"hello w");
        // "o" then "rld\r" arrive as two reads of at most four bytes.
        assert_eq!(session.read_and_forward().await.unwrap(), 0);
        assert_eq!(session.read_and_forward().await.unwrap(), 1);

        let mut buf = [0u8; 11];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn test_idle_flush_forwards_pending_bytes() {
        // Arrange: flush after 5 ms of silence
        let mut spec = loopback_spec("A");
        spec.serial_flush_idle = Some(0.005);
        let serial = ScriptedSerialLink::new()
            .then_data(b"no-delimiter")
            .with_idle_delay(Duration::from_millis(20));
        let mut session = BridgeSession::new(spec, Box::new(serial)).unwrap();
        let mut peer = attach(&mut session).await;

        // Act
        assert_eq!(session.read_and_forward().await.unwrap(), 0);
        let flushed = session.read_and_forward().await.unwrap();

        // Assert
        assert_eq!(flushed, 1);
        assert!(session.pending().is_empty());
        let mut buf = [0u8; 12];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"no-delimiter");
    }

    #[tokio::test]
    async fn test_no_idle_flush_by_default() {
        let serial = ScriptedSerialLink::new()
            .then_data(b"held")
            .with_idle_delay(Duration::from_millis(5));
        let mut session = BridgeSession::new(loopback_spec("A"), Box::new(serial)).unwrap();
        let _peer = attach(&mut session).await;

        session.read_and_forward().await.unwrap();
        session.read_and_forward().await.unwrap();

        assert_eq!(session.pending(), b"held");
    }

    #[tokio::test]
    async fn test_serial_failure_is_transport_error() {
        let serial = ScriptedSerialLink::new().then_fail(io::ErrorKind::BrokenPipe);
        let mut session = BridgeSession::new(loopback_spec("A"), Box::new(serial)).unwrap();
        let _peer = attach(&mut session).await;

        let err = session.read_and_forward().await.unwrap_err();

        assert!(matches!(
            err,
            BridgeError::Transport {
                op: TransportOp::SerialRead,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_forward_without_client_is_send_error() {
        let serial = ScriptedSerialLink::new().then_data(b"x\r");
        let mut session = BridgeSession::new(loopback_spec("A"), Box::new(serial)).unwrap();

        let err = session.read_and_forward().await.unwrap_err();

        assert!(matches!(
            err,
            BridgeError::Transport {
                op: TransportOp::Send,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_connect_error() {
        let mut first =
            BridgeSession::new(loopback_spec("A"), Box::new(ScriptedSerialLink::new())).unwrap();
        let taken = first.bind().await.unwrap();

        let mut spec = loopback_spec("B");
        spec.tcp_port = taken.port();
        let mut second = BridgeSession::new(spec, Box::new(ScriptedSerialLink::new())).unwrap();

        assert!(matches!(
            second.bind().await,
            Err(BridgeError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_closes_everything_once() {
        // Arrange
        let serial = ScriptedSerialLink::new();
        let counts = serial.counters();
        let mut session = BridgeSession::new(loopback_spec("A"), Box::new(serial)).unwrap();
        let mut peer = attach(&mut session).await;

        // Act
        let failures = session.cleanup().await;

        // Assert
        assert!(failures.is_empty(), "unexpected failures: {failures:?}");
        assert_eq!(counts.closes(), 1);
        let mut rest = Vec::new();
        assert_eq!(peer.read_to_end(&mut rest).await.unwrap(), 0, "peer sees EOF");
    }

    #[tokio::test]
    async fn test_cleanup_after_client_hang_up_is_clean() {
        let mut session =
            BridgeSession::new(loopback_spec("A"), Box::new(ScriptedSerialLink::new())).unwrap();
        let peer = attach(&mut session).await;
        drop(peer);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let failures = session.cleanup().await;

        assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    }

    #[tokio::test]
    async fn test_second_cleanup_reports_already_closed() {
        let mut session =
            BridgeSession::new(loopback_spec("A"), Box::new(ScriptedSerialLink::new())).unwrap();
        let _peer = attach(&mut session).await;
        session.cleanup().await;

        let failures = session.cleanup().await;

        assert_eq!(failures.len(), 3);
        assert!(failures
            .iter()
            .all(|f| matches!(f, BridgeError::AlreadyClosed { .. })));
    }

    #[tokio::test]
    async fn test_cleanup_attempts_serial_close_once_even_when_it_fails() {
        // Arrange
        let mut serial = MockSerialLink::new();
        serial
            .expect_close()
            .times(1)
            .returning(|| Err(io::Error::new(io::ErrorKind::Other, "device gone")));
        let mut session = BridgeSession::new(loopback_spec("A"), Box::new(serial)).unwrap();
        session.bind().await.unwrap();

        // Act
        let failures = session.cleanup().await;

        // Assert: listener closed fine, serial failure reported
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            BridgeError::Close {
                resource: Resource::Serial,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_read_uses_configured_chunk_size() {
        let mut spec = loopback_spec("A");
        spec.serial_read_bytes = 7;
        let mut serial = MockSerialLink::new();
        serial
            .expect_read_chunk()
            .withf(|max| *max == 7)
            .times(1)
            .returning(|_| Ok(b"partial".to_vec()));
        let mut session = BridgeSession::new(spec, Box::new(serial)).unwrap();

        let frames = session.read_frames().await.unwrap();

        assert!(frames.is_empty());
        assert_eq!(session.pending(), b"partial");
    }
}
