// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unix datagram socket listener.
//!
//! A listener binds a local datagram socket and surfaces every packet it
//! receives as a `Vec<u8>` on a bounded channel. Two tasks run per `listen`
//! call:
//!
//! - the reader, which pulls packets off the socket and hands them to the
//!   channel without ever blocking on it (a full channel drops the packet), and
//!   which reopens the socket after a fixed cooldown when the transport fails;
//! - the control task, which waits on a [`CloseSignal`], stops the reader,
//!   closes the socket and acknowledges the request.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixDatagram;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{
    DATAGRAM_READ_SIZE, DEFAULT_LISTENER_NAME, LISTENER_CLIENT_LOG, LISTENER_RESTART_COOLDOWN,
    SOCKET_BUFFER_SIZE,
};
use crate::diagnostics::Diagnostics;
use crate::emitter::Emitter;
use crate::errors::ListenerError;
use crate::event::Severity;
use crate::shutdown::{ShutdownGroup, ShutdownGuard};

/// Creates a connected close request pair.
pub fn close_channel() -> (ListenerCloser, CloseSignal) {
    let (tx, rx) = mpsc::channel(1);
    (ListenerCloser { tx }, CloseSignal { rx })
}

/// Requesting side of a listener's close signal.
#[derive(Debug, Clone)]
pub struct ListenerCloser {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl ListenerCloser {
    /// Asks the listener to stop and waits for its acknowledgement.
    ///
    /// Returns `false` when no listener is attached to the signal anymore.
    pub async fn close(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).await.is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }
}

/// Receiving side of a listener's close signal.
#[derive(Debug)]
pub struct CloseSignal {
    rx: mpsc::Receiver<oneshot::Sender<()>>,
}

impl CloseSignal {
    /// Waits for a close request. A dropped closer counts as a request.
    pub async fn recv(&mut self) -> Option<oneshot::Sender<()>> {
        self.rx.recv().await
    }
}

/// Local intake of raw messages.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Binds the socket. Opening an open listener is a no-op.
    async fn open(&self, shutdown: &ShutdownGroup) -> Result<(), ListenerError>;

    /// Closes the socket. Closing a closed listener is a no-op.
    async fn close(&self) -> Result<(), ListenerError>;

    /// Opens the listener if needed and starts delivering packets to `out`
    /// until `signal` fires.
    async fn listen(
        &self,
        out: mpsc::Sender<Vec<u8>>,
        signal: CloseSignal,
        shutdown: &ShutdownGroup,
    ) -> Result<(), ListenerError>;
}

struct OpenSocket {
    socket: Arc<UnixDatagram>,
    closed: CancellationToken,
}

#[derive(Default)]
struct Registration {
    group: Option<ShutdownGroup>,
    guard: Option<ShutdownGuard>,
}

struct Inner {
    addr: PathBuf,
    diagnostics: Diagnostics,
    restart_cooldown: Duration,
    socket: Mutex<Option<OpenSocket>>,
    registration: Mutex<Registration>,
}

/// [`Listener`] over a unix datagram socket bound at a filesystem path.
#[derive(Clone)]
pub struct DatagramListener {
    inner: Arc<Inner>,
}

impl DatagramListener {
    pub fn new(addr: impl Into<PathBuf>) -> Self {
        Self::with_name(DEFAULT_LISTENER_NAME, addr, None)
    }

    pub fn with_name(
        name: impl Into<String>,
        addr: impl Into<PathBuf>,
        emitter: Option<Arc<dyn Emitter>>,
    ) -> Self {
        Self::build(name.into(), addr.into(), emitter, LISTENER_RESTART_COOLDOWN)
    }

    #[cfg(test)]
    fn with_restart_cooldown(name: &str, addr: impl Into<PathBuf>, cooldown: Duration) -> Self {
        Self::build(name.to_string(), addr.into(), None, cooldown)
    }

    fn build(
        name: String,
        addr: PathBuf,
        emitter: Option<Arc<dyn Emitter>>,
        restart_cooldown: Duration,
    ) -> Self {
        DatagramListener {
            inner: Arc::new(Inner {
                addr,
                diagnostics: Diagnostics::new(LISTENER_CLIENT_LOG, name, emitter),
                restart_cooldown,
                socket: Mutex::new(None),
                registration: Mutex::new(Registration::default()),
            }),
        }
    }

    pub fn addr(&self) -> &Path {
        &self.inner.addr
    }

    pub fn name(&self) -> &str {
        self.inner.diagnostics.source()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.socket).is_some()
    }
}

#[async_trait]
impl Listener for DatagramListener {
    async fn open(&self, shutdown: &ShutdownGroup) -> Result<(), ListenerError> {
        {
            // A restart keeps the group it already holds a guard on.
            let mut registration = lock(&self.inner.registration);
            if registration.guard.is_none() {
                registration.group = Some(shutdown.clone());
            }
        }
        self.inner.open().await
    }

    async fn close(&self) -> Result<(), ListenerError> {
        self.inner.close().await
    }

    async fn listen(
        &self,
        out: mpsc::Sender<Vec<u8>>,
        signal: CloseSignal,
        shutdown: &ShutdownGroup,
    ) -> Result<(), ListenerError> {
        if !self.is_open() {
            if let Err(e) = self.open(shutdown).await {
                self.inner
                    .log(Severity::Error, "Failed to open downstream listener")
                    .await;
                return Err(e);
            }
        }

        let stop = CancellationToken::new();
        tokio::spawn(read_loop(
            Arc::clone(&self.inner),
            out,
            stop.clone(),
            shutdown.register(),
        ));
        tokio::spawn(control_loop(
            Arc::clone(&self.inner),
            signal,
            stop,
            shutdown.register(),
        ));
        Ok(())
    }
}

impl Inner {
    async fn log(&self, level: Severity, message: impl Into<String>) {
        self.diagnostics.log(level, message).await;
    }

    fn current(&self) -> Option<(Arc<UnixDatagram>, CancellationToken)> {
        lock(&self.socket)
            .as_ref()
            .map(|open| (Arc::clone(&open.socket), open.closed.clone()))
    }

    async fn open(&self) -> Result<(), ListenerError> {
        let bound = {
            let mut socket = lock(&self.socket);
            if socket.is_some() {
                Ok(false)
            } else {
                let result = self.bind().map(|bound| {
                    *socket = Some(OpenSocket {
                        socket: Arc::new(bound),
                        closed: CancellationToken::new(),
                    });
                    true
                });
                result
            }
        };
        let bound = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.log(Severity::Critical, e.to_string()).await;
                return Err(e);
            }
        };

        if !bound {
            self.log(
                Severity::Notice,
                format!("Already listening at {}", self.addr.display()),
            )
            .await;
            return Ok(());
        }

        {
            let mut registration = lock(&self.registration);
            if registration.guard.is_none() {
                registration.guard = registration.group.as_ref().map(ShutdownGroup::register);
            }
        }
        self.log(
            Severity::Info,
            format!("Set socket buffers to {SOCKET_BUFFER_SIZE}"),
        )
        .await;
        self.log(
            Severity::Info,
            format!("Listening on unix datagram socket at {}", self.addr.display()),
        )
        .await;
        Ok(())
    }

    fn bind(&self) -> Result<UnixDatagram, ListenerError> {
        let socket = UnixDatagram::bind(&self.addr).map_err(|source| ListenerError::Bind {
            addr: self.addr.clone(),
            source,
        })?;
        let sock_ref = socket2::SockRef::from(&socket);
        if let Err(e) = sock_ref.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
            debug!("Failed to set SO_RCVBUF on {}: {}", self.addr.display(), e);
        }
        if let Err(e) = sock_ref.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
            debug!("Failed to set SO_SNDBUF on {}: {}", self.addr.display(), e);
        }
        Ok(socket)
    }

    async fn close(&self) -> Result<(), ListenerError> {
        let open = lock(&self.socket).take();
        let Some(open) = open else {
            self.log(
                Severity::Notice,
                format!("Socket at {} is already closed.", self.addr.display()),
            )
            .await;
            return Ok(());
        };

        self.log(
            Severity::Info,
            format!("Closing unix datagram socket at {}", self.addr.display()),
        )
        .await;
        open.closed.cancel();
        drop(open);
        lock(&self.registration).guard = None;

        match std::fs::remove_file(&self.addr) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                self.log(
                    Severity::Error,
                    format!(
                        "Failed to close unix datagram socket at {}: {}",
                        self.addr.display(),
                        source
                    ),
                )
                .await;
                return Err(ListenerError::Close {
                    addr: self.addr.clone(),
                    source,
                });
            }
        }

        self.log(
            Severity::Info,
            format!("Closed unix datagram socket at {}", self.addr.display()),
        )
        .await;
        Ok(())
    }

    /// Closes and reopens the socket after the restart cooldown.
    ///
    /// Returns `false` when the listener was asked to stop in the meantime.
    async fn restart(&self, stop: &CancellationToken) -> bool {
        self.log(
            Severity::Notice,
            format!(
                "Restarting socket in {} seconds",
                self.restart_cooldown.as_secs_f64()
            ),
        )
        .await;
        tokio::select! {
            () = stop.cancelled() => return false,
            () = tokio::time::sleep(self.restart_cooldown) => {}
        }
        if stop.is_cancelled() {
            return false;
        }

        if let Err(e) = self.close().await {
            self.log(Severity::Error, e.to_string()).await;
        }
        if let Err(e) = self.open().await {
            self.log(Severity::Critical, e.to_string()).await;
        }

        // A close request may have landed while we were reopening.
        if stop.is_cancelled() {
            if let Err(e) = self.close().await {
                self.log(Severity::Error, e.to_string()).await;
            }
            return false;
        }
        true
    }
}

enum ReadOutcome {
    Packet(usize),
    Failed(io::Error),
    SocketClosed,
    Stopped,
}

async fn read_loop(
    inner: Arc<Inner>,
    out: mpsc::Sender<Vec<u8>>,
    stop: CancellationToken,
    _guard: ShutdownGuard,
) {
    let mut buf = vec![0u8; DATAGRAM_READ_SIZE];

    while !stop.is_cancelled() {
        let outcome = match inner.current() {
            None => ReadOutcome::SocketClosed,
            Some((socket, closed)) => {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => ReadOutcome::Stopped,
                    () = closed.cancelled() => ReadOutcome::SocketClosed,
                    result = socket.recv(&mut buf) => match result {
                        Ok(n) => ReadOutcome::Packet(n),
                        Err(e) => ReadOutcome::Failed(e),
                    },
                }
            }
        };

        match outcome {
            ReadOutcome::Stopped => break,
            ReadOutcome::Packet(0) => {}
            ReadOutcome::Packet(n) => {
                if !forward(&inner, &out, &buf[..n]).await {
                    break;
                }
            }
            ReadOutcome::Failed(e) if !is_transport_error(&e) => {
                if stop.is_cancelled() {
                    inner
                        .log(Severity::Notice, "No longer accepting packets")
                        .await;
                } else {
                    inner
                        .log(Severity::Error, format!("Failed to read packet: {e}"))
                        .await;
                }
            }
            ReadOutcome::Failed(_) | ReadOutcome::SocketClosed => {
                if stop.is_cancelled() {
                    inner
                        .log(Severity::Notice, "No longer accepting packets")
                        .await;
                    break;
                }
                inner
                    .log(Severity::Critical, "Socket has closed unexpectedly")
                    .await;
                if !inner.restart(&stop).await {
                    break;
                }
            }
        }
    }
    debug!("{}: reader stopped", inner.diagnostics.source());
}

/// Hands one packet to the consumer without waiting for channel capacity.
///
/// Returns `false` once the consumer is gone.
async fn forward(inner: &Inner, out: &mpsc::Sender<Vec<u8>>, packet: &[u8]) -> bool {
    match out.try_send(packet.to_vec()) {
        Ok(()) => {
            inner
                .log(
                    Severity::Debug,
                    format!("Sending {} bytes to forward", packet.len()),
                )
                .await;
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            inner
                .log(
                    Severity::Notice,
                    "Looks like out buffer is full, message dropped",
                )
                .await;
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            inner
                .log(
                    Severity::Notice,
                    "Output channel closed, no longer accepting packets",
                )
                .await;
            false
        }
    }
}

async fn control_loop(
    inner: Arc<Inner>,
    mut signal: CloseSignal,
    stop: CancellationToken,
    _guard: ShutdownGuard,
) {
    let ack = signal.recv().await;
    stop.cancel();
    inner.log(Severity::Notice, "Received close signal").await;
    if let Err(e) = inner.close().await {
        inner
            .log(
                Severity::Error,
                format!("Failed to close unix datagram socket: {e}"),
            )
            .await;
    }
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

fn is_transport_error(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
