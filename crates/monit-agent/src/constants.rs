// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Names, tags and tuning values shared by every agent component.

use std::time::Duration;

/// Working directory created under the user's home when no override is set.
pub const APP_DIR: &str = "monit-go";
/// Socket the forwarder listens on for payload events.
pub const FORWARDER_SOCKET: &str = "fwd.sock";
/// Socket the logger listens on for diagnostic events.
pub const LOGGER_SOCKET: &str = "log.sock";
/// Append-only diagnostics file.
pub const LOGGER_FILE: &str = "monit-go.log";

// Event type tags
pub const FORWARDER_LOG: &str = "FORWARDER_LOG";
pub const FORWARDER_CLIENT_LOG: &str = "FORWARDER_CLIENT_LOG";
pub const LISTENER_CLIENT_LOG: &str = "LISTENER_CLIENT_LOG";
pub const LOGTAIL_LOG: &str = "LOGTAIL_LOG";
pub const LOGTAIL_UPDATE: &str = "logtail update";

// Component names used as event sources
pub const FORWARDER_NAME: &str = "forwarder";
pub const TCP_CLIENT_NAME: &str = "forwarder-tcp-client";
pub const DEFAULT_LISTENER_NAME: &str = "unix-datagram-socket-listener";
pub const FORWARDER_LISTENER_NAME: &str = "forwarder-downstream-client";
pub const LOGGER_LISTENER_NAME: &str = "logger-datagram-listener";
pub const LOGTAIL_NAME: &str = "logtail";
pub const LOGGER_NAME: &str = "monit-logger";

/// Line written by the logger when a datagram is not a valid event.
pub const PARSE_FAILURE_LINE: &str = "failed to parse log event";

/// SO_RCVBUF / SO_SNDBUF applied to every local datagram socket.
pub const SOCKET_BUFFER_SIZE: usize = 65_536;
/// Receive buffer for a single datagram.
pub const DATAGRAM_READ_SIZE: usize = 65_536;
/// Capacity of the channel between a listener and its consumer.
pub const LISTENER_CHANNEL_CAPACITY: usize = 100;
/// Capacity of the logger's intake channel.
pub const LOGGER_CHANNEL_CAPACITY: usize = 1_000;
/// Capacity of the per-cycle line queue of a log tail.
pub const TAIL_QUEUE_CAPACITY: usize = 100;
/// Maximum number of bytes scanned by a single tail cycle.
pub const TAIL_READ_LIMIT: u64 = 5_000_000;

/// Delay before a failed listener reopens its socket.
pub const LISTENER_RESTART_COOLDOWN: Duration = Duration::from_secs(5);
/// Delay between two tail cycles.
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_secs(15);
