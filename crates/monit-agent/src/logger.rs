// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Diagnostics sink: writes every event received on the logger socket to the
//! agent's log file, one line per event.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::{LOGGER_CHANNEL_CAPACITY, LOGGER_NAME, PARSE_FAILURE_LINE};
use crate::errors::LoggerError;
use crate::event::{Event, Severity};
use crate::listener::{close_channel, Listener, ListenerCloser};
use crate::shutdown::{ShutdownGroup, ShutdownGuard};

type SharedFile = Arc<Mutex<Option<File>>>;

/// Formats one raw datagram as a log line. Undecodable input yields a fixed
/// placeholder.
pub fn format_log_line(raw: &[u8]) -> String {
    match Event::from_bytes(raw) {
        Ok(event) => event.to_log_line(),
        Err(_) => PARSE_FAILURE_LINE.to_string(),
    }
}

struct Running {
    group: ShutdownGroup,
    closer: ListenerCloser,
    worker: JoinHandle<()>,
}

pub struct Logger {
    listener: Arc<dyn Listener>,
    log_file: PathBuf,
    file: SharedFile,
    running: Mutex<Option<Running>>,
}

impl Logger {
    pub fn new(listener: Arc<dyn Listener>, log_file: impl Into<PathBuf>) -> Self {
        Logger {
            listener,
            log_file: log_file.into(),
            file: Arc::new(Mutex::new(None)),
            running: Mutex::new(None),
        }
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Opens the log file, binds the listener and starts the writer.
    ///
    /// Returns once the logger is accepting events, or with the reason it
    /// could not start.
    pub async fn listen_and_log(&self) -> Result<(), LoggerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(LoggerError::AlreadyRunning);
        }

        self.open().await?;

        let group = ShutdownGroup::new();
        if let Err(e) = self.listener.open(&group).await {
            self.log(Severity::Critical, format!("Failed to open listener: {e}"))
                .await;
            self.close_file().await;
            return Err(LoggerError::Listener(e));
        }

        let (tx, rx) = mpsc::channel(LOGGER_CHANNEL_CAPACITY);
        let (closer, signal) = close_channel();
        if let Err(e) = self.listener.listen(tx, signal, &group).await {
            self.log(Severity::Critical, format!("Failed to start listener: {e}"))
                .await;
            if let Err(e) = self.listener.close().await {
                debug!("{LOGGER_NAME}: failed to close listener after start failure: {e}");
            }
            self.close_file().await;
            return Err(LoggerError::Listener(e));
        }

        let worker = tokio::spawn(write_events(
            rx,
            Arc::clone(&self.file),
            self.log_file.clone(),
            group.register(),
        ));
        *running = Some(Running {
            group,
            closer,
            worker,
        });
        self.log(Severity::Info, "Logger started").await;
        info!("{LOGGER_NAME}: writing to {}", self.log_file.display());
        Ok(())
    }

    /// Stops the listener, drains the writer and closes the log file.
    ///
    /// Every failure along the way is collected into a single error.
    pub async fn close(&self) -> Result<(), LoggerError> {
        let Some(running) = self.running.lock().await.take() else {
            debug!("{LOGGER_NAME}: close on a stopped logger");
            return Ok(());
        };
        let mut errors = Vec::new();

        self.log(Severity::Info, "Logger closing").await;
        if !running.closer.close().await {
            debug!("{LOGGER_NAME}: listener already stopped");
        }
        if let Err(e) = running.worker.await {
            errors.push(format!("log writer failed: {e}"));
        }

        if let Some(mut file) = self.file.lock().await.take() {
            if let Err(e) = file.flush().await {
                errors.push(format!(
                    "failed to close log file {}: {e}",
                    self.log_file.display()
                ));
            }
        }

        if let Err(e) = self.listener.close().await {
            errors.push(e.to_string());
        }

        running.group.wait().await;

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LoggerError::Close(errors))
        }
    }

    async fn open(&self) -> Result<(), LoggerError> {
        let mut file = self.file.lock().await;
        if file.is_some() {
            return Ok(());
        }
        if self.log_file.as_os_str().is_empty() {
            return Err(LoggerError::NoLogFile);
        }
        let handle = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_file)
            .await
            .map_err(|source| LoggerError::OpenFile {
                path: self.log_file.clone(),
                source,
            })?;
        *file = Some(handle);
        Ok(())
    }

    async fn close_file(&self) {
        if let Some(mut file) = self.file.lock().await.take() {
            let _ = file.flush().await;
        }
    }

    /// Writes one of the logger's own lines, tagged with its name.
    async fn log(&self, level: Severity, message: impl Into<String>) {
        let line = format!("{}: {} {}", level, LOGGER_NAME, message.into());
        match level {
            Severity::Emergency | Severity::Alert | Severity::Critical | Severity::Error => {
                error!("{line}")
            }
            Severity::Warning => warn!("{line}"),
            _ => debug!("{line}"),
        }
        append_line(&self.file, &self.log_file, &line).await;
    }
}

async fn write_events(
    mut rx: mpsc::Receiver<Vec<u8>>,
    file: SharedFile,
    path: PathBuf,
    _guard: ShutdownGuard,
) {
    while let Some(raw) = rx.recv().await {
        append_line(&file, &path, &format_log_line(&raw)).await;
    }
    debug!("{LOGGER_NAME}: log writer drained");
}

async fn append_line(file: &SharedFile, path: &Path, line: &str) {
    let mut file = file.lock().await;
    let Some(handle) = file.as_mut() else {
        return;
    };
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    let result = match handle.write_all(&buf).await {
        Ok(()) => handle.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!("{LOGGER_NAME}: failed to write to {}: {e}", path.display());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::ListenerError;
    use crate::listener::{CloseSignal, DatagramListener};
    use async_trait::async_trait;
    use tokio::net::UnixDatagram;
    use tracing_test::traced_test;

    #[test]
    fn test_format_log_line() {
        let raw = br#"{"type":"LOGTAIL_LOG","payload":{"source":"logtail","message":"File opened","level":6}}"#;
        assert_eq!(format_log_line(raw), "6: LOGTAIL_LOG logtail File opened");
        assert_eq!(format_log_line(b"not json"), "failed to parse log event");
    }

    #[tokio::test]
    async fn test_logger_writes_events_and_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("log.sock");
        let log_file = dir.path().join("monit-go.log");
        let logger = Logger::new(Arc::new(DatagramListener::new(&sock)), &log_file);

        logger.listen_and_log().await.unwrap();
        let client = UnixDatagram::unbound().unwrap();
        let event = Event::new("FORWARDER_LOG", "forwarder", "hello", Severity::Warning);
        client
            .send_to(&event.to_bytes().unwrap(), &sock)
            .await
            .unwrap();
        client.send_to(b"{broken", &sock).await.unwrap();

        // Give the writer a moment to drain both datagrams.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        logger.close().await.unwrap();

        let contents = std::fs::read_to_string(&log_file).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines.contains(&"4: FORWARDER_LOG forwarder hello"));
        assert!(lines.contains(&"failed to parse log event"));
        assert!(lines.contains(&"6: monit-logger Logger started"));
        assert!(!sock.exists());
    }

    #[tokio::test]
    async fn test_listen_and_log_requires_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(
            Arc::new(DatagramListener::new(dir.path().join("log.sock"))),
            "",
        );
        let result = logger.listen_and_log().await;
        assert!(matches!(result, Err(LoggerError::NoLogFile)));
    }

    #[tokio::test]
    async fn test_listen_and_log_reports_bind_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("monit-go.log");
        let logger = Logger::new(
            Arc::new(DatagramListener::new(dir.path().join("missing/log.sock"))),
            &log_file,
        );

        let result = logger.listen_and_log().await;
        assert!(matches!(result, Err(LoggerError::Listener(_))));
        assert!(!logger.is_running().await);

        let contents = std::fs::read_to_string(&log_file).unwrap();
        assert!(contents.starts_with("2: monit-logger Failed to open listener"));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_and_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(
            Arc::new(DatagramListener::new(dir.path().join("log.sock"))),
            dir.path().join("monit-go.log"),
        );

        logger.listen_and_log().await.unwrap();
        assert!(matches!(
            logger.listen_and_log().await,
            Err(LoggerError::AlreadyRunning)
        ));
        logger.close().await.unwrap();
        logger.close().await.unwrap();
    }

    struct StubbornListener;

    #[async_trait]
    impl Listener for StubbornListener {
        async fn open(&self, _shutdown: &ShutdownGroup) -> Result<(), ListenerError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), ListenerError> {
            Err(ListenerError::Close {
                addr: "/tmp/log.sock".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }

        async fn listen(
            &self,
            out: mpsc::Sender<Vec<u8>>,
            mut signal: CloseSignal,
            _shutdown: &ShutdownGroup,
        ) -> Result<(), ListenerError> {
            tokio::spawn(async move {
                let ack = signal.recv().await;
                drop(out);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_collects_errors() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(Arc::new(StubbornListener), dir.path().join("monit-go.log"));

        logger.listen_and_log().await.unwrap();
        let err = logger.close().await.unwrap_err();
        match err {
            LoggerError::Close(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("/tmp/log.sock"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Opens fine but can neither listen nor close.
    struct DeafListener;

    #[async_trait]
    impl Listener for DeafListener {
        async fn open(&self, _shutdown: &ShutdownGroup) -> Result<(), ListenerError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), ListenerError> {
            Err(ListenerError::Close {
                addr: "/tmp/deaf.sock".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }

        async fn listen(
            &self,
            _out: mpsc::Sender<Vec<u8>>,
            _signal: CloseSignal,
            _shutdown: &ShutdownGroup,
        ) -> Result<(), ListenerError> {
            Err(ListenerError::Bind {
                addr: "/tmp/deaf.sock".into(),
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            })
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_start_failure_reports_close_error() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("monit-go.log");
        let logger = Logger::new(Arc::new(DeafListener), &log_file);

        let result = logger.listen_and_log().await;
        assert!(matches!(result, Err(LoggerError::Listener(_))));
        assert!(!logger.is_running().await);
        assert!(logs_contain("failed to close listener after start failure"));
        assert!(logs_contain("/tmp/deaf.sock"));

        let contents = std::fs::read_to_string(&log_file).unwrap();
        assert!(contents.contains("Failed to start listener"));
    }
}
