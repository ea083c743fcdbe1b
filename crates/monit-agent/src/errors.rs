// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the agent components.

use std::io;
use std::path::PathBuf;

/// Failure to deliver an event over a local datagram socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write to {addr}: {source}")]
    Write {
        addr: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("short write to {addr}: wrote {written} of {expected} bytes")]
    ShortWrite {
        addr: PathBuf,
        written: usize,
        expected: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to open unix datagram socket at {addr}: {source}")]
    Bind {
        addr: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to close unix datagram socket at {addr}: {source}")]
    Close {
        addr: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("failed to open file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat file {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file {0} is not open")]
    NotOpen(PathBuf),

    #[error("update worker for {0} stopped unexpectedly")]
    Worker(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to open {transport} connection to upstream {addr}: {source}")]
    Dial {
        transport: &'static str,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to upstream is closed")]
    NotConnected,

    #[error("failed to forward message to upstream {addr}: {source}")]
    Write {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to disconnect from {addr}: {source}")]
    Disconnect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read trust bundle {path}: {source}")]
    ReadBundle {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse trust bundle: {0}")]
    Pem(String),

    #[error("trust bundle contains no certificates")]
    EmptyBundle,

    #[error("failed to build TLS client config: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("invalid TLS server name {0}")]
    ServerName(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("forwarder has no upstream client")]
    MissingUpstream,

    #[error("forwarder has no downstream listener")]
    MissingDownstream,

    #[error("forwarder is not connected")]
    NotConnected,

    #[error("failed to connect to upstream: {0}")]
    Upstream(#[source] ClientError),

    #[error("failed to open downstream listener: {0}")]
    Downstream(#[source] ListenerError),

    #[error("failed to push to upstream: {0}")]
    Push(#[source] ClientError),
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("no log file provided")]
    NoLogFile,

    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open listener: {0}")]
    Listener(#[source] ListenerError),

    #[error("logger is already running")]
    AlreadyRunning,

    #[error("{}", .0.join("\n"))]
    Close(Vec<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to resolve home directory")]
    NoHomeDir,

    #[error("failed to prepare working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
