// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use monit_agent::emitter::Emitter;
use monit_agent::errors::TransportError;
use monit_agent::event::Event;
use std::sync::{Arc, Mutex};

/// Emitter keeping every event in memory.
#[derive(Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("recorder lock").clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.payload.message)
            .collect()
    }
}

#[async_trait]
impl Emitter for RecordingEmitter {
    async fn emit(&self, event: &Event) -> Result<(), TransportError> {
        self.events.lock().expect("recorder lock").push(event.clone());
        Ok(())
    }
}
