//! SessionScheduler: owns every [`BridgeSession`], drives accept and
//! streaming, and owns shutdown and cleanup.
//!
//! # Scheduling modes
//!
//! **Sequential** runs a single control flow.  The accept phase waits for a
//! client on each session in configured order, so a client connecting to a
//! later session is not serviced until every earlier session has a client
//! too.  Streaming passes then call
//! [`read_and_forward`](BridgeSession::read_and_forward) on each session in
//! order; a silent device delays the sessions after it by up to its read
//! timeout.
//!
//! **Concurrent** spawns one Tokio task per session.  Each task accepts its
//! own client and then runs two halves joined together:
//!
//! ```text
//!  serial ──read_frames──► pump_serial ──mpsc (queue_depth)──► drain_queue ──► client
//! ```
//!
//! The bounded queue means a stalled client only stalls its own session.
//!
//! # Shutdown
//!
//! [`StopHandle::stop`] cancels a [`CancellationToken`] and `run` returns
//! `Ok`.  Waiting for a client is interrupted in both modes.  Sequential
//! streaming checks the token once per pass, so the pass in progress finishes
//! its reads and forwards every frame they completed; a stop therefore takes
//! up to one pass of read timeouts.  Concurrent sessions observe the token at
//! every blocking boundary (serial read, queue send, socket send).
//!
//! A transport error in any session also cancels the token, so one broken
//! pairing ends every session; `run` then returns that error.
//! Either way every session is cleaned up, in configured order, before `run`
//! returns.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sotcp_core::Frame;

use crate::application::session::{forward_frame, BridgeSession, SessionReport};
use crate::domain::config::SchedulingMode;
use crate::domain::error::BridgeError;
use crate::infrastructure::tcp::ClientConnection;

/// Cloneable handle that requests a graceful stop from any task or thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// What each session forwarded before the scheduler stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sessions: Vec<SessionReport>,
}

impl RunSummary {
    pub fn total_frames(&self) -> u64 {
        self.sessions.iter().map(|s| s.frames_forwarded).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.sessions.iter().map(|s| s.bytes_forwarded).sum()
    }
}

pub struct SessionScheduler {
    mode: SchedulingMode,
    queue_depth: usize,
    sessions: Vec<BridgeSession>,
    initialized: bool,
    token: CancellationToken,
}

impl SessionScheduler {
    /// `queue_depth` is clamped to at least one frame.
    pub fn new(mode: SchedulingMode, queue_depth: usize) -> Self {
        Self {
            mode,
            queue_depth: queue_depth.max(1),
            sessions: Vec::new(),
            initialized: false,
            token: CancellationToken::new(),
        }
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Sessions in configured order.
    pub fn sessions(&self) -> &[BridgeSession] {
        &self.sessions
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.token.clone(),
        }
    }

    /// Requests a graceful stop; same as [`StopHandle::stop`].
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Takes ownership of `sessions` and binds each listener in order.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Connect`] for the first listener that cannot bind.
    /// Every session handed in, bound or not, is cleaned up before the error
    /// is returned.
    pub async fn initialize(&mut self, sessions: Vec<BridgeSession>) -> Result<(), BridgeError> {
        self.sessions = sessions;
        self.initialized = false;

        for index in 0..self.sessions.len() {
            if let Err(e) = self.sessions[index].bind().await {
                error!("{e}");
                self.cleanup_all().await;
                self.sessions.clear();
                return Err(e);
            }
        }

        self.initialized = true;
        Ok(())
    }

    /// Runs until stopped or until a session fails, then cleans up every
    /// session.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotInitialized`] without a successful
    /// [`initialize`](Self::initialize); otherwise the transport error that
    /// ended the run.
    pub async fn run(&mut self) -> Result<RunSummary, BridgeError> {
        if !self.initialized {
            return Err(BridgeError::NotInitialized);
        }
        self.initialized = false;

        info!(
            "Starting {} session(s) in {} mode",
            self.sessions.len(),
            self.mode
        );

        let result = match self.mode {
            SchedulingMode::Sequential => run_sequential(&mut self.sessions, &self.token).await,
            SchedulingMode::Concurrent => self.run_concurrent().await,
        };

        if let Err(e) = &result {
            error!("{e}; shutting down all sessions");
            self.token.cancel();
        }

        self.cleanup_all().await;
        let summary = RunSummary {
            sessions: self.sessions.iter().map(BridgeSession::report).collect(),
        };
        result.map(|()| summary)
    }

    async fn run_concurrent(&mut self) -> Result<(), BridgeError> {
        let handles: Vec<_> = std::mem::take(&mut self.sessions)
            .into_iter()
            .map(|session| {
                let name = session.name().to_string();
                let token = self.token.clone();
                let handle = tokio::spawn(session_task(session, token, self.queue_depth));
                (name, handle)
            })
            .collect();

        let mut first_error = None;
        for (name, handle) in handles {
            match handle.await {
                Ok((session, result)) => {
                    self.sessions.push(session);
                    if let Err(e) = result {
                        first_error.get_or_insert(e);
                    }
                }
                Err(join_error) => {
                    // The session and its handles were dropped with the task.
                    let reason = if join_error.is_panic() {
                        "panicked".to_string()
                    } else {
                        join_error.to_string()
                    };
                    first_error.get_or_insert(BridgeError::Task {
                        session: name,
                        reason,
                    });
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn cleanup_all(&mut self) {
        let mut failures = 0usize;
        for session in &mut self.sessions {
            failures += session.cleanup().await.len();
        }
        if failures > 0 {
            warn!("Cleanup finished with {failures} close failure(s)");
        } else {
            info!("All sessions closed");
        }
    }
}

async fn run_sequential(
    sessions: &mut [BridgeSession],
    token: &CancellationToken,
) -> Result<(), BridgeError> {
    for session in sessions.iter_mut() {
        info!("[{}] Waiting for client", session.name());
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = session.accept() => { accepted?; }
        }
    }

    // A stop lands between passes; the pass in progress runs to completion
    // so no read frame is left unforwarded.
    while !token.is_cancelled() {
        for session in sessions.iter_mut() {
            session.read_and_forward().await?;
        }
    }
    Ok(())
}

/// Body of one concurrent session.  Hands the session back so the scheduler
/// can clean it up; a failure or a panic cancels `token` for every session.
async fn session_task(
    mut session: BridgeSession,
    token: CancellationToken,
    queue_depth: usize,
) -> (BridgeSession, Result<(), BridgeError>) {
    let guard = token.clone().drop_guard();
    let result = drive_session(&mut session, &token, queue_depth).await;
    match &result {
        Ok(()) => {
            guard.disarm();
        }
        Err(e) => {
            error!("{e}");
            drop(guard);
        }
    }
    (session, result)
}

async fn drive_session(
    session: &mut BridgeSession,
    token: &CancellationToken,
    queue_depth: usize,
) -> Result<(), BridgeError> {
    info!("[{}] Waiting for client", session.name());
    tokio::select! {
        _ = token.cancelled() => return Ok(()),
        accepted = session.accept() => { accepted?; }
    }

    let Some(mut client) = session.take_client() else {
        return Ok(());
    };
    let name = session.name().to_string();
    let (tx, rx) = mpsc::channel(queue_depth);

    let (pumped, drained) = tokio::join!(
        pump_serial(session, tx, token),
        drain_queue(&name, &mut client, rx, token),
    );
    session.restore_client(client);
    pumped.and(drained)
}

/// Reads the serial device and queues completed frames.  Ends quietly when
/// the token is cancelled or the writer half has gone away.
async fn pump_serial(
    session: &mut BridgeSession,
    tx: mpsc::Sender<Frame>,
    token: &CancellationToken,
) -> Result<(), BridgeError> {
    loop {
        let frames = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tx.closed() => return Ok(()),
            frames = session.read_frames() => frames?,
        };
        for frame in frames {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                sent = tx.send(frame) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn drain_queue(
    name: &str,
    client: &mut ClientConnection,
    mut rx: mpsc::Receiver<Frame>,
    token: &CancellationToken,
) -> Result<(), BridgeError> {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            sent = forward_frame(name, client, &frame) => sent?,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
