//! TCP transport: one listening socket per session and the single client
//! connection accepted on it.
//!
//! Both types keep their socket in an `Option` so closing is explicit and
//! idempotent from the caller's point of view: the first `close` releases the
//! socket, later calls return `io::ErrorKind::NotConnected` instead of
//! panicking.
//!
//! Uses only `tokio::net`, which behaves the same on Windows, Linux and macOS.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn not_connected(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{what} is closed"))
}

/// Writes every byte of `bytes` and flushes.
///
/// `write_all` retries short writes internally, so this returns only once the
/// whole buffer is handed to the OS or the connection reports an error.
pub async fn write_all_flushed<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Shuts down the write side of `writer`.
///
/// A peer that already reset the connection makes the OS report
/// `NotConnected`; the connection is gone either way, so that counts as a
/// clean shutdown rather than a second close.
async fn shutdown_write<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match writer.shutdown().await {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

/// A bound listening socket.
#[derive(Debug)]
pub struct SessionListener {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
}

impl SessionListener {
    /// Binds and starts listening on `addr`.  Port `0` picks a free port;
    /// [`local_addr`](Self::local_addr) reports the one chosen.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the address is in use or not bindable.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener: Some(listener),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    /// Waits for one client to connect.
    ///
    /// # Errors
    ///
    /// `NotConnected` after [`close`](Self::close), otherwise the accept error.
    pub async fn accept(&self) -> io::Result<ClientConnection> {
        let listener = self.listener.as_ref().ok_or_else(|| not_connected("listener"))?;
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(ClientConnection::new(stream, peer))
    }

    /// Stops listening.
    ///
    /// # Errors
    ///
    /// `NotConnected` if already closed.
    pub fn close(&mut self) -> io::Result<()> {
        self.listener
            .take()
            .map(drop)
            .ok_or_else(|| not_connected("listener"))
    }
}

/// The connected client of one session.
///
/// Counts what has been forwarded so the scheduler can report per-session
/// totals after the socket itself is gone.
#[derive(Debug)]
pub struct ClientConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    frames_sent: u64,
    bytes_sent: u64,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            peer,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Sends one message as a single full-buffer write.  An empty message
    /// writes nothing but still counts as forwarded.
    ///
    /// # Errors
    ///
    /// `NotConnected` after [`close`](Self::close), otherwise the socket error
    /// (typically `BrokenPipe` or `ConnectionReset` once the client is gone).
    pub async fn send_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| not_connected("client connection"))?;
        write_all_flushed(stream, bytes).await?;
        self.frames_sent += 1;
        self.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    /// Shuts down the write side and releases the socket.
    ///
    /// The socket is released even when the shutdown itself fails.  A peer
    /// that has already disconnected is not an error.
    ///
    /// # Errors
    ///
    /// `NotConnected` only if this connection was already closed, otherwise
    /// the shutdown error.
    pub async fn close(&mut self) -> io::Result<()> {
        let mut stream = self.stream.take().ok_or_else(|| not_connected("client connection"))?;
        shutdown_write(&mut stream).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::AsyncReadExt;

    async fn connected_pair() -> (SessionListener, ClientConnection, TcpStream) {
        let listener = SessionListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind loopback");
        let peer = TcpStream::connect(listener.local_addr()).await.expect("connect");
        let conn = listener.accept().await.expect("accept");
        (listener, conn, peer)
    }

    #[tokio::test]
    async fn test_write_all_flushed_writes_every_byte() {
        // Arrange: a mock writer that expects the whole buffer
        let mut writer = tokio_test::io::Builder::new().write(b"abc").build();

        // Act / Assert: the mock panics on unexpected or missing writes
        write_all_flushed(&mut writer, b"abc").await.expect("write");
    }

    #[tokio::test]
    async fn test_write_all_flushed_retries_short_writes() {
        // The mock accepts the buffer in two pieces; write_all must keep going.
        let mut writer = tokio_test::io::Builder::new()
            .write(b"hel")
            .write(b"lo")
            .build();

        write_all_flushed(&mut writer, b"hello").await.expect("write");
    }

    #[tokio::test]
    async fn test_write_all_flushed_reports_errors() {
        let mut writer = tokio_test::io::Builder::new()
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();

        let err = write_all_flushed(&mut writer, b"x").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    /// Writer whose shutdown fails with a fixed error kind.
    struct FailingShutdown(io::ErrorKind);

    impl AsyncWrite for FailingShutdown {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::from(self.0)))
        }
    }

    #[tokio::test]
    async fn test_shutdown_after_peer_reset_is_clean() {
        let mut writer = FailingShutdown(io::ErrorKind::NotConnected);

        shutdown_write(&mut writer).await.expect("peer already gone");
    }

    #[tokio::test]
    async fn test_shutdown_reports_other_errors() {
        let mut writer = FailingShutdown(io::ErrorKind::PermissionDenied);

        let err = shutdown_write(&mut writer).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_close_after_peer_dropped_is_ok() {
        // Arrange: the peer hangs up before the server closes its side
        let (_listener, mut conn, peer) = connected_pair().await;
        drop(peer);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Act / Assert: only a second close reports NotConnected
        conn.close().await.expect("close after peer hang-up");
        assert_eq!(
            conn.close().await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[tokio::test]
    async fn test_bind_port_zero_reports_actual_port() {
        let listener = SessionListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.is_open());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let first = SessionListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let second = SessionListener::bind(first.local_addr()).await;

        assert!(second.is_err(), "second bind on the same port must fail");
    }

    #[tokio::test]
    async fn test_send_all_delivers_and_counts() {
        // Arrange
        let (_listener, mut conn, mut peer) = connected_pair().await;

        // Act
        conn.send_all(b"abc").await.unwrap();
        conn.send_all(b"").await.unwrap();
        conn.send_all(b"de").await.unwrap();
        conn.close().await.unwrap();

        // Assert
        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abcde");
        assert_eq!(conn.frames_sent(), 3);
        assert_eq!(conn.bytes_sent(), 5);
    }

    #[tokio::test]
    async fn test_double_close_is_not_connected() {
        let (mut listener, mut conn, _peer) = connected_pair().await;

        conn.close().await.unwrap();
        listener.close().unwrap();

        assert_eq!(
            conn.close().await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert_eq!(
            listener.close().unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert!(!conn.is_open());
        assert!(!listener.is_open());
    }

    #[tokio::test]
    async fn test_send_after_close_is_not_connected() {
        let (_listener, mut conn, _peer) = connected_pair().await;
        conn.close().await.unwrap();

        let err = conn.send_all(b"late").await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_accept_after_close_is_not_connected() {
        let mut listener = SessionListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        listener.close().unwrap();

        let err = listener.accept().await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
