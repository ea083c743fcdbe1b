// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operational diagnostics shared by the agent components.
//!
//! Every component reports its own state changes through a [`Diagnostics`]
//! handle. A report is traced locally and, when an emitter is attached, also
//! published as an [`Event`] to the logger socket so it ends up in the agent's
//! log file.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::emitter::Emitter;
use crate::event::{Event, Severity};

#[derive(Clone)]
pub struct Diagnostics {
    kind: &'static str,
    source: String,
    emitter: Option<Arc<dyn Emitter>>,
}

impl Diagnostics {
    pub fn new(
        kind: &'static str,
        source: impl Into<String>,
        emitter: Option<Arc<dyn Emitter>>,
    ) -> Self {
        Diagnostics {
            kind,
            source: source.into(),
            emitter,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_emitter(&self) -> bool {
        self.emitter.is_some()
    }

    pub async fn log(&self, level: Severity, message: impl Into<String>) {
        let message = message.into();
        trace_report(level, &self.source, &message);

        let Some(emitter) = &self.emitter else {
            return;
        };
        let event = Event::new(self.kind, self.source.as_str(), message, level);
        if let Err(e) = emitter.emit(&event).await {
            debug!("{}: failed to emit diagnostic event: {}", self.source, e);
        }
    }
}

fn trace_report(level: Severity, source: &str, message: &str) {
    match level {
        Severity::Emergency | Severity::Alert | Severity::Critical | Severity::Error => {
            error!("{}: {}", source, message)
        }
        Severity::Warning => warn!("{}: {}", source, message),
        Severity::Notice | Severity::Info => info!("{}: {}", source, message),
        Severity::Debug => trace!("{}: {}", source, message),
    }
}
