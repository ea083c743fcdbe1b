// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP/TLS client pushing raw bytes to the remote collector.
//!
//! The client holds at most one connection. It never reconnects on its own:
//! a failed write is reported to the caller and the connection stays as is
//! until `disconnect` and `connect` are called again.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::constants::{FORWARDER_CLIENT_LOG, TCP_CLIENT_NAME};
use crate::diagnostics::Diagnostics;
use crate::emitter::Emitter;
use crate::errors::ClientError;
use crate::event::Severity;
use crate::shutdown::{ShutdownGroup, ShutdownGuard};
use crate::tls::TlsSettings;

/// Connection to the remote collector.
#[async_trait]
pub trait ForwarderClient: Send + Sync {
    /// Dials the upstream. Connecting a connected client is a no-op.
    async fn connect(&mut self, shutdown: &ShutdownGroup) -> Result<(), ClientError>;

    /// Closes the connection. Disconnecting a disconnected client is a no-op.
    async fn disconnect(&mut self) -> Result<(), ClientError>;

    /// Writes `payload` as-is to the upstream.
    async fn push(&mut self, payload: &[u8]) -> Result<(), ClientError>;

    fn status(&self) -> ClientStatus;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub connected: bool,
    pub has_emitter: bool,
}

impl ClientStatus {
    pub fn is_ok(&self) -> bool {
        self.connected && self.has_emitter
    }

    pub fn message(&self) -> &'static str {
        if !self.connected {
            "No connection to upstream server. "
        } else if !self.has_emitter {
            "No emitter for events. "
        } else {
            ""
        }
    }
}

/// Address and trust configuration of the remote collector.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsSettings>,
}

impl Upstream {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Upstream {
            host: host.into(),
            port,
            tls: None,
        }
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    async fn write_all(&mut self, payload: &[u8]) -> std::io::Result<()> {
        match self {
            Connection::Plain(stream) => stream.write_all(payload).await,
            Connection::Tls(stream) => {
                stream.write_all(payload).await?;
                stream.flush().await
            }
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Connection::Plain(stream) => stream.shutdown().await,
            Connection::Tls(stream) => stream.shutdown().await,
        }
    }
}

pub struct TcpClient {
    upstream: Upstream,
    diagnostics: Diagnostics,
    connection: Option<Connection>,
    registration: Option<ShutdownGuard>,
}

impl TcpClient {
    pub fn new(upstream: Upstream, emitter: Option<Arc<dyn Emitter>>) -> Self {
        TcpClient {
            upstream,
            diagnostics: Diagnostics::new(FORWARDER_CLIENT_LOG, TCP_CLIENT_NAME, emitter),
            connection: None,
            registration: None,
        }
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn log(&self, level: Severity, message: impl Into<String>) {
        self.diagnostics.log(level, message).await;
    }

    async fn dial(&self) -> Result<Connection, ClientError> {
        let addr = self.upstream.addr();
        let transport = if self.upstream.tls.is_some() {
            "tcp/tls"
        } else {
            "tcp"
        };
        let dial_error = |source| ClientError::Dial {
            transport,
            addr: addr.clone(),
            source,
        };

        let stream = TcpStream::connect(&addr).await.map_err(dial_error)?;
        match &self.upstream.tls {
            None => Ok(Connection::Plain(stream)),
            Some(tls) => {
                let connector = TlsConnector::from(Arc::clone(&tls.client_config));
                let stream = connector
                    .connect(tls.server_name.clone(), stream)
                    .await
                    .map_err(dial_error)?;
                Ok(Connection::Tls(Box::new(stream)))
            }
        }
    }

    /// Only a live connection holds the group open.
    fn register(&mut self, shutdown: &ShutdownGroup) {
        if self.registration.is_none() {
            self.registration = Some(shutdown.register());
        }
    }
}

#[async_trait]
impl ForwarderClient for TcpClient {
    async fn connect(&mut self, shutdown: &ShutdownGroup) -> Result<(), ClientError> {
        if self.connection.is_some() {
            self.register(shutdown);
            self.log(Severity::Notice, "Connection already exists").await;
            return Ok(());
        }

        match self.dial().await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.register(shutdown);
                self.log(
                    Severity::Info,
                    format!(
                        "Opened connection to upstream tcp server at {}",
                        self.upstream.addr()
                    ),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                self.log(Severity::Error, e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        if let Some(mut connection) = self.connection.take() {
            if let Err(source) = connection.shutdown().await {
                // The connection is gone either way; only the close handshake failed.
                let err = ClientError::Disconnect {
                    addr: self.upstream.addr(),
                    source,
                };
                self.log(Severity::Error, err.to_string()).await;
                self.registration = None;
                return Err(err);
            }
        }
        self.registration = None;
        self.log(
            Severity::Info,
            format!("Disconnected from {}", self.upstream.addr()),
        )
        .await;
        Ok(())
    }

    async fn push(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        let Some(connection) = self.connection.as_mut() else {
            self.log(Severity::Error, "Connection to upstream is closed")
                .await;
            return Err(ClientError::NotConnected);
        };

        if let Err(source) = connection.write_all(payload).await {
            let err = ClientError::Write {
                addr: self.upstream.addr(),
                source,
            };
            self.log(Severity::Error, err.to_string()).await;
            return Err(err);
        }

        self.log(
            Severity::Debug,
            format!("Pushed {} bytes to {}", payload.len(), self.upstream.addr()),
        )
        .await;
        Ok(())
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            connected: self.connection.is_some(),
            has_emitter: self.diagnostics.has_emitter(),
        }
    }
}
