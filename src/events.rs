// SPDX-License-Identifier: GPL-3.0-only

//! Event/lifecycle propagation
//!
//! Decouples the wrapper and module state machines from consumers. Each
//! state-machine instance owns its own [`EventBus`]; listener registration is
//! scoped to the owning device/module lifetime and torn down when the owner
//! closes (the bus is dropped with it, closing every subscription).
//!
//! Delivery order equals emission order per listener. Emission never blocks
//! the emitting context (unbounded channel per listener); a listener whose
//! receiving side is gone is pruned without affecting the remaining listeners
//! or the emitting state machine.

use crate::capture::CaptureState;
use crate::errors::CameraError;
use crate::hal::ApiGeneration;
use crate::params::ParameterValue;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// An immutable notification broadcast to registered listeners.
///
/// Payloads carry enough to reconstruct what changed without re-querying the
/// device.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    DeviceOpened {
        device_id: String,
        generation: ApiGeneration,
    },
    DeviceClosed {
        device_id: String,
    },
    DeviceError {
        device_id: String,
        error: CameraError,
    },
    ParameterChanged {
        device_id: String,
        key: String,
        /// Value before the write; `None` when no prior value was recorded
        previous: Option<ParameterValue>,
        value: ParameterValue,
    },
    /// A configuration batch was rejected; `key` names the offending entry
    ConfigurationRejected {
        device_id: String,
        key: String,
        error: CameraError,
    },
    CaptureStateChanged {
        module: String,
        old: CaptureState,
        new: CaptureState,
    },
    /// The active capture module changed (None after teardown)
    ModuleChanged {
        device_id: String,
        module: Option<String>,
    },
}

/// Receiving side of one subscription
pub type EventReceiver = mpsc::UnboundedReceiver<CameraEvent>;

struct Listener {
    id: String,
    sender: mpsc::UnboundedSender<CameraEvent>,
}

/// Publish/subscribe channel owned by one state-machine instance
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener by id.
    ///
    /// Registration is idempotent: if the id is already registered and its
    /// subscription is still live, this is a no-op and returns `None` rather
    /// than creating a duplicate delivery path.
    pub fn subscribe(&self, listener_id: &str) -> Option<EventReceiver> {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|l| !l.sender.is_closed());
        if listeners.iter().any(|l| l.id == listener_id) {
            debug!(listener = listener_id, "Listener already registered");
            return None;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        listeners.push(Listener {
            id: listener_id.to_string(),
            sender,
        });
        debug!(listener = listener_id, "Listener registered");
        Some(receiver)
    }

    /// Remove a listener. Unknown ids are a no-op.
    pub fn unsubscribe(&self, listener_id: &str) {
        self.listeners.lock().unwrap().retain(|l| l.id != listener_id);
    }

    /// Broadcast an event to every live listener, in registration order.
    /// Dead listeners are pruned; they never block or corrupt the emitter.
    pub fn emit(&self, event: CameraEvent) {
        let mut listeners = self.listeners.lock().unwrap();
        trace!(?event, listeners = listeners.len(), "Emitting event");
        listeners.retain(|l| l.sender.send(event.clone()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}
