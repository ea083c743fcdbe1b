// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host-local log forwarding agent.
//!
//! Producers (such as [`logtail::LogTail`]) publish [`event::Event`]s over unix
//! datagram sockets through an [`emitter::Emitter`]. The
//! [`forwarder::Forwarder`] relays everything arriving on its socket to a
//! remote collector over TCP or TLS, and the [`logger::Logger`] writes the
//! agent's own diagnostics to a local log file.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod emitter;
pub mod errors;
pub mod event;
pub mod forwarder;
pub mod listener;
pub mod logger;
pub mod logtail;
pub mod shutdown;
pub mod tls;
pub mod upstream;
pub mod workdir;
