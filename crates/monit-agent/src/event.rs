// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event model exchanged over the local datagram sockets.
//!
//! Every datagram carries exactly one JSON encoded [`Event`]:
//!
//! ```text
//! {"type":"logtail update","payload":{"source":"/var/log/app.log","message":"GET /","level":6}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Syslog severity. Lower values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.as_u8()
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(Severity::Emergency),
            1 => Ok(Severity::Alert),
            2 => Ok(Severity::Critical),
            3 => Ok(Severity::Error),
            4 => Ok(Severity::Warning),
            5 => Ok(Severity::Notice),
            6 => Ok(Severity::Info),
            7 => Ok(Severity::Debug),
            other => Err(format!("severity must be between 0 and 7, got {other}")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Component or file the event originates from.
    pub source: String,
    pub message: String,
    pub level: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Payload,
}

impl Event {
    pub fn new(
        kind: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
        level: Severity,
    ) -> Self {
        Event {
            kind: kind.into(),
            payload: Payload {
                source: source.into(),
                message: message.into(),
                level,
            },
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes one datagram. Empty type tags are rejected.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, serde_json::Error> {
        let event: Event = serde_json::from_slice(buf)?;
        if event.kind.is_empty() {
            return Err(serde::de::Error::custom("event type must not be empty"));
        }
        Ok(event)
    }

    /// Formats the event as a diagnostics log line: `<level>: <type> <source> <message>`.
    pub fn to_log_line(&self) -> String {
        format!(
            "{}: {} {} {}",
            self.payload.level, self.kind, self.payload.source, self.payload.message
        )
    }
}
