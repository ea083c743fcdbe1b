// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipes messages from a local listener to the upstream client.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::constants::{FORWARDER_LOG, FORWARDER_NAME, LISTENER_CHANNEL_CAPACITY};
use crate::diagnostics::Diagnostics;
use crate::emitter::Emitter;
use crate::errors::ForwarderError;
use crate::event::Severity;
use crate::listener::{close_channel, Listener, ListenerCloser};
use crate::shutdown::{ShutdownGroup, ShutdownGuard};
use crate::upstream::ForwarderClient;

type SharedClient = Arc<Mutex<Box<dyn ForwarderClient>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderStatus {
    pub is_ok: bool,
    pub message: String,
}

struct Session {
    group: ShutdownGroup,
    closer: ListenerCloser,
    output: Option<mpsc::Receiver<Vec<u8>>>,
    pump: Option<JoinHandle<()>>,
}

pub struct Forwarder {
    upstream: Option<SharedClient>,
    downstream: Option<Arc<dyn Listener>>,
    diagnostics: Diagnostics,
    session: Mutex<Option<Session>>,
}

impl Forwarder {
    pub fn new(emitter: Option<Arc<dyn Emitter>>) -> Self {
        Forwarder {
            upstream: None,
            downstream: None,
            diagnostics: Diagnostics::new(FORWARDER_LOG, FORWARDER_NAME, emitter),
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_upstream(mut self, client: impl ForwarderClient + 'static) -> Self {
        self.upstream = Some(Arc::new(Mutex::new(Box::new(client))));
        self
    }

    #[must_use]
    pub fn with_downstream(mut self, listener: Arc<dyn Listener>) -> Self {
        self.downstream = Some(listener);
        self
    }

    fn parts(&self) -> Result<(&SharedClient, &Arc<dyn Listener>), ForwarderError> {
        let upstream = self
            .upstream
            .as_ref()
            .ok_or(ForwarderError::MissingUpstream)?;
        let downstream = self
            .downstream
            .as_ref()
            .ok_or(ForwarderError::MissingDownstream)?;
        Ok((upstream, downstream))
    }

    /// Connects the upstream client and starts the downstream listener.
    ///
    /// Messages received before [`Forwarder::run`] starts the pump wait in the
    /// listener channel. Connecting a connected forwarder is a no-op.
    pub async fn connect(&self) -> Result<(), ForwarderError> {
        let (upstream, downstream) = self.parts()?;
        let mut session = self.session.lock().await;
        if session.is_some() {
            self.diagnostics
                .log(Severity::Notice, "Forwarder already connected")
                .await;
            return Ok(());
        }

        let group = ShutdownGroup::new();
        let (tx, rx) = mpsc::channel(LISTENER_CHANNEL_CAPACITY);
        let (closer, signal) = close_channel();

        if let Err(e) = upstream.lock().await.connect(&group).await {
            self.diagnostics
                .log(
                    Severity::Error,
                    format!("Failed to connect to upstream: {e}"),
                )
                .await;
            return Err(ForwarderError::Upstream(e));
        }

        if let Err(e) = downstream.listen(tx, signal, &group).await {
            self.diagnostics
                .log(Severity::Error, format!("Failed to connect: {e}"))
                .await;
            if let Err(e) = upstream.lock().await.disconnect().await {
                debug!("{FORWARDER_NAME}: failed to roll back upstream connection: {e}");
            }
            return Err(ForwarderError::Downstream(e));
        }

        *session = Some(Session {
            group,
            closer,
            output: Some(rx),
            pump: None,
        });
        Ok(())
    }

    /// Connects and starts copying every listener message to the upstream.
    pub async fn run(&self) -> Result<(), ForwarderError> {
        self.connect().await?;
        let (upstream, _) = self.parts()?;

        let mut session = self.session.lock().await;
        let Some(session) = session.as_mut() else {
            return Err(ForwarderError::NotConnected);
        };
        let Some(output) = session.output.take() else {
            self.diagnostics
                .log(Severity::Notice, "Forwarder already running")
                .await;
            return Ok(());
        };

        session.pump = Some(tokio::spawn(pump(
            output,
            Arc::clone(upstream),
            self.diagnostics.clone(),
            session.group.register(),
        )));
        self.diagnostics
            .log(Severity::Info, "Forwarder running")
            .await;
        Ok(())
    }

    /// Pushes `msg` straight to the upstream client.
    pub async fn push(&self, msg: &[u8]) -> Result<(), ForwarderError> {
        let upstream = self
            .upstream
            .as_ref()
            .ok_or(ForwarderError::MissingUpstream)?;
        upstream
            .lock()
            .await
            .push(msg)
            .await
            .map_err(ForwarderError::Push)
    }

    /// Stops the listener, drains the pump, disconnects the upstream and
    /// waits for every registered worker to finish.
    pub async fn close(&self) -> Result<(), ForwarderError> {
        let Some(session) = self.session.lock().await.take() else {
            self.diagnostics
                .log(Severity::Notice, "Forwarder is not connected")
                .await;
            return Ok(());
        };
        let Session {
            group,
            closer,
            output,
            pump,
        } = session;

        if !closer.close().await {
            debug!("{FORWARDER_NAME}: downstream listener already stopped");
        }

        // A pump that never started still owns nothing; dropping the receiver
        // is enough.
        drop(output);
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                self.diagnostics
                    .log(Severity::Error, format!("Forwarder pump failed: {e}"))
                    .await;
            }
        }

        let mut result = Ok(());
        if let Some(upstream) = &self.upstream {
            if let Err(e) = upstream.lock().await.disconnect().await {
                result = Err(ForwarderError::Upstream(e));
            }
        }

        group.wait().await;
        self.diagnostics
            .log(Severity::Info, "Forwarder closed")
            .await;
        result
    }

    pub fn status(&self) -> ForwarderStatus {
        let mut message = String::new();
        if self.upstream.is_none() {
            message.push_str("Missing upstream client. ");
        }
        if self.downstream.is_none() {
            message.push_str("No listening client");
        }
        if message.is_empty() {
            return ForwarderStatus {
                is_ok: true,
                message: "Looks ok".to_string(),
            };
        }
        ForwarderStatus {
            is_ok: false,
            message,
        }
    }
}

async fn pump(
    mut output: mpsc::Receiver<Vec<u8>>,
    upstream: SharedClient,
    diagnostics: Diagnostics,
    _guard: ShutdownGuard,
) {
    while let Some(msg) = output.recv().await {
        let result = upstream.lock().await.push(&msg).await;
        if let Err(e) = result {
            diagnostics
                .log(
                    Severity::Error,
                    format!("Dropped {} byte message: {e}", msg.len()),
                )
                .await;
        }
    }
    debug!("{FORWARDER_NAME}: pump drained");
}
