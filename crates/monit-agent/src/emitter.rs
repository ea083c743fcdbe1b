// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event emitters publishing to a local datagram socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::UnixDatagram;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::constants::SOCKET_BUFFER_SIZE;
use crate::errors::TransportError;
use crate::event::Event;

/// Sink for [`Event`]s.
///
/// One call performs one send. Implementations do not retry; callers decide
/// whether a failure is worth propagating.
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, event: &Event) -> Result<(), TransportError>;
}

/// Emits JSON encoded events as datagrams to a unix socket.
///
/// The socket is connected on the first call and reused afterwards. A failed
/// write drops the cached connection so the next call reconnects, which lets
/// the emitter follow a receiver that recreated its socket file.
pub struct SocketEmitter {
    raddr: PathBuf,
    laddr: Option<PathBuf>,
    conn: Mutex<Option<UnixDatagram>>,
}

impl SocketEmitter {
    pub fn new(raddr: impl Into<PathBuf>) -> Self {
        SocketEmitter {
            raddr: raddr.into(),
            laddr: None,
            conn: Mutex::new(None),
        }
    }

    /// Binds the sending socket to `laddr` instead of an unnamed address.
    #[must_use]
    pub fn with_local_addr(mut self, laddr: impl Into<PathBuf>) -> Self {
        self.laddr = Some(laddr.into());
        self
    }

    pub fn remote_addr(&self) -> &Path {
        &self.raddr
    }

    fn connect(&self) -> Result<UnixDatagram, TransportError> {
        let connect_error = |source| TransportError::Connect {
            addr: self.raddr.clone(),
            source,
        };

        let socket = match &self.laddr {
            Some(laddr) => {
                // A previous socket bound here would make bind fail with EADDRINUSE.
                self.release_local_addr();
                UnixDatagram::bind(laddr)
            }
            None => UnixDatagram::unbound(),
        }
        .map_err(connect_error)?;

        if let Err(source) = socket.connect(&self.raddr) {
            drop(socket);
            self.release_local_addr();
            return Err(connect_error(source));
        }

        if let Err(e) = socket2::SockRef::from(&socket).set_send_buffer_size(SOCKET_BUFFER_SIZE) {
            debug!("Failed to set send buffer on {}: {}", self.raddr.display(), e);
        }
        debug!("Connected emitter to {}", self.raddr.display());
        Ok(socket)
    }

    /// Unlinks the bound local socket file, if any.
    fn release_local_addr(&self) {
        let Some(laddr) = &self.laddr else {
            return;
        };
        match std::fs::remove_file(laddr) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to remove {}: {}", laddr.display(), e),
        }
    }
}

#[async_trait]
impl Emitter for SocketEmitter {
    async fn emit(&self, event: &Event) -> Result<(), TransportError> {
        let buf = event.to_bytes()?;

        let mut conn = self.conn.lock().await;
        if conn.is_none() {
            *conn = Some(self.connect()?);
        }
        let Some(socket) = conn.as_ref() else {
            return Err(TransportError::Connect {
                addr: self.raddr.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotConnected),
            });
        };

        match socket.send(&buf).await {
            Ok(written) if written == buf.len() => {
                trace!("Emitted {} bytes to {}", written, self.raddr.display());
                Ok(())
            }
            Ok(written) => Err(TransportError::ShortWrite {
                addr: self.raddr.clone(),
                written,
                expected: buf.len(),
            }),
            Err(source) => {
                *conn = None;
                self.release_local_addr();
                Err(TransportError::Write {
                    addr: self.raddr.clone(),
                    source,
                })
            }
        }
    }
}
