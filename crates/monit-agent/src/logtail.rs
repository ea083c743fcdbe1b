// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Incremental file tailing.
//!
//! A [`LogTail`] polls a file, reads whatever was appended since the last
//! cycle and emits one event per line. The file handle and the cursor share one
//! lock which is held for the whole stat, read and emit transaction, so a
//! concurrent `close` always waits for an in-flight batch.
//!
//! The cursor only advances once the per-cycle worker has drained every line
//! of the window, so an interrupted cycle is re-read rather than skipped.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::constants::{
    LOGTAIL_LOG, LOGTAIL_NAME, LOGTAIL_UPDATE, TAIL_POLL_INTERVAL, TAIL_QUEUE_CAPACITY,
    TAIL_READ_LIMIT,
};
use crate::diagnostics::Diagnostics;
use crate::emitter::Emitter;
use crate::errors::TailError;
use crate::event::{Event, Severity};

#[async_trait]
pub trait TailReader: Send + Sync {
    async fn open(&self) -> Result<(), TailError>;
    async fn close(&self) -> Result<(), TailError>;
    /// Runs read cycles until `shutdown` fires or the reader is closed.
    async fn update(&self, shutdown: CancellationToken) -> Result<(), TailError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailCursor {
    pub path: PathBuf,
    pub offset: u64,
}

/// Byte range scanned by one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    pub start: u64,
    pub len: u64,
    /// The file shrank below the cursor and reading restarts at 0.
    pub rotated: bool,
}

impl ReadWindow {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Computes the next read window for a cursor at `offset` on a file of `size`
/// bytes, scanning at most `limit` bytes.
pub fn plan_window(offset: u64, size: u64, limit: u64) -> ReadWindow {
    let rotated = size < offset;
    let start = if rotated { 0 } else { offset };
    ReadWindow {
        start,
        len: (size - start).min(limit),
        rotated,
    }
}

/// Outcome of a single read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub window: ReadWindow,
    pub lines: usize,
}

struct TailState {
    file: Option<File>,
    offset: u64,
}

pub struct LogTail {
    path: PathBuf,
    pipe: Arc<dyn Emitter>,
    diagnostics: Diagnostics,
    poll_interval: Duration,
    read_limit: u64,
    state: Mutex<TailState>,
}

impl LogTail {
    /// Tails `path`, emitting lines to `pipe` and diagnostics to `logger`.
    pub fn new(
        path: impl Into<PathBuf>,
        pipe: Arc<dyn Emitter>,
        logger: Option<Arc<dyn Emitter>>,
    ) -> Self {
        LogTail {
            path: path.into(),
            pipe,
            diagnostics: Diagnostics::new(LOGTAIL_LOG, LOGTAIL_NAME, logger),
            poll_interval: TAIL_POLL_INTERVAL,
            read_limit: TAIL_READ_LIMIT,
            state: Mutex::new(TailState {
                file: None,
                offset: 0,
            }),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_read_limit(mut self, read_limit: u64) -> Self {
        self.read_limit = read_limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.file.is_some()
    }

    pub async fn cursor(&self) -> TailCursor {
        TailCursor {
            path: self.path.clone(),
            offset: self.state.lock().await.offset,
        }
    }

    async fn log(&self, level: Severity, message: impl Into<String>) {
        self.diagnostics.log(level, message).await;
    }

    async fn open_read_only(&self) -> io::Result<File> {
        match File::open(&self.path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&self.path)
                    .await?;
                File::open(&self.path).await
            }
            other => other,
        }
    }

    /// Runs one stat, read and emit cycle.
    pub async fn poll(&self) -> Result<CycleReport, TailError> {
        let mut state = self.state.lock().await;
        let TailState { file, offset } = &mut *state;
        let Some(file) = file.as_mut() else {
            return Err(TailError::NotOpen(self.path.clone()));
        };

        let size = file
            .metadata()
            .await
            .map_err(|source| TailError::Stat {
                path: self.path.clone(),
                source,
            })?
            .len();

        let window = plan_window(*offset, size, self.read_limit);
        if window.rotated {
            *offset = 0;
            self.log(
                Severity::Info,
                "File size is smaller than position, assuming log rotation and setting position back to 0",
            )
            .await;
        }
        self.log(Severity::Info, format!("Current position set at {offset}"))
            .await;
        self.log(Severity::Info, format!("Current file size {size}"))
            .await;
        self.log(
            Severity::Info,
            format!("Reading from {} to {}", window.start, window.end()),
        )
        .await;

        if window.len == 0 {
            return Ok(CycleReport { window, lines: 0 });
        }

        let read_error = |source| TailError::Read {
            path: self.path.clone(),
            source,
        };
        file.seek(SeekFrom::Start(window.start))
            .await
            .map_err(read_error)?;

        let (tx, rx) = mpsc::channel(TAIL_QUEUE_CAPACITY);
        let worker = tokio::spawn(emit_lines(
            self.path.display().to_string(),
            Arc::clone(&self.pipe),
            self.diagnostics.clone(),
            rx,
        ));

        let mut segments = BufReader::new((&mut *file).take(window.len)).split(b'\n');
        let mut lines = 0;
        let scanned = loop {
            match segments.next_segment().await {
                Ok(Some(mut segment)) => {
                    if segment.last() == Some(&b'\r') {
                        segment.pop();
                    }
                    let line = String::from_utf8_lossy(&segment).into_owned();
                    // Blocks while the worker is behind so no line is lost.
                    if tx.send(line).await.is_err() {
                        break Err(TailError::Worker(self.path.clone()));
                    }
                    lines += 1;
                }
                Ok(None) => break Ok(()),
                Err(source) => break Err(read_error(source)),
            }
        };
        drop(tx);

        let drained = worker.await;
        scanned?;
        drained.map_err(|_| TailError::Worker(self.path.clone()))?;

        *offset = window.end();
        self.log(Severity::Info, format!("Read {} bytes", window.len))
            .await;
        Ok(CycleReport { window, lines })
    }
}

#[async_trait]
impl TailReader for LogTail {
    async fn open(&self) -> Result<(), TailError> {
        let mut state = self.state.lock().await;
        if state.file.is_some() {
            drop(state);
            self.log(
                Severity::Notice,
                format!("File already open {}", self.path.display()),
            )
            .await;
            return Ok(());
        }

        let file = match self.open_read_only().await {
            Ok(file) => file,
            Err(source) => {
                let err = TailError::Open {
                    path: self.path.clone(),
                    source,
                };
                self.log(Severity::Critical, err.to_string()).await;
                return Err(err);
            }
        };
        let size = match file.metadata().await {
            Ok(metadata) => metadata.len(),
            Err(source) => {
                let err = TailError::Stat {
                    path: self.path.clone(),
                    source,
                };
                self.log(Severity::Error, err.to_string()).await;
                return Err(err);
            }
        };

        state.file = Some(file);
        state.offset = size;
        drop(state);
        self.log(Severity::Info, "Successfully opened target file")
            .await;
        self.log(Severity::Info, format!("Set position to {size}"))
            .await;
        Ok(())
    }

    async fn close(&self) -> Result<(), TailError> {
        // Waits for an in-flight cycle, which holds the lock until drained.
        let file = self.state.lock().await.file.take();
        match file {
            None => {
                self.log(Severity::Notice, "File is already closed").await;
            }
            Some(file) => {
                drop(file);
                self.log(
                    Severity::Info,
                    format!("Closed target file {}", self.path.display()),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn update(&self, shutdown: CancellationToken) -> Result<(), TailError> {
        if !self.is_open().await {
            self.open().await?;
        }

        while !shutdown.is_cancelled() {
            match self.poll().await {
                Ok(_) => {}
                Err(TailError::NotOpen(_)) => {
                    self.log(Severity::Notice, "Found closed file while updating")
                        .await;
                    return Ok(());
                }
                Err(e) => {
                    self.log(Severity::Error, format!("Error while running update: {e}"))
                        .await;
                    self.log(Severity::Notice, "Skipping update due to error")
                        .await;
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.log(Severity::Info, "Received signal to terminate")
            .await;
        if let Err(e) = self.close().await {
            self.log(
                Severity::Error,
                "Failed to close properly after receiving signal to terminate.",
            )
            .await;
            return Err(e);
        }
        Ok(())
    }
}

async fn emit_lines(
    source: String,
    pipe: Arc<dyn Emitter>,
    diagnostics: Diagnostics,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(line) = rx.recv().await {
        let event = Event::new(LOGTAIL_UPDATE, source.as_str(), line, Severity::Info);
        if let Err(e) = pipe.emit(&event).await {
            diagnostics
                .log(
                    Severity::Error,
                    format!("Failed to forward log tail update: {e}"),
                )
                .await;
        }
    }
}
