// SPDX-License-Identifier: GPL-3.0-only

//! Generic camera wrapper
//!
//! One control surface (open, close, configure, preview, capture) that is
//! independent of API generation. The wrapper owns the capture device's
//! lifecycle through a dedicated *device context* thread: every hardware
//! mutation (open, close, parameter writes, configuration batches) is
//! marshalled onto that thread over a command channel, because the
//! underlying driver APIs do not tolerate concurrent access. Capability
//! metadata is cached on the session and readable from any context; current
//! values go through the synchronized parameter store.
//!
//! Wrapper lifecycle: `Closed → Opening → Open → Closing → Closed`, with
//! `Open → Error → Closed` on unrecoverable hardware failure.

use crate::constants::{COMMAND_TIMEOUT, MAX_OPEN_ATTEMPTS, OPEN_RETRY_DELAY, OPEN_TIMEOUT,
    PREVIEW_CHANNEL_DEPTH};
use crate::errors::{CameraError, CameraResult};
use crate::events::{CameraEvent, EventBus, EventReceiver};
use crate::hal::driver::CaptureRequest;
use crate::hal::{
    ApiBackend, ApiGeneration, DeviceSelector, DriverDeviceInfo, FrameSink, PreviewReceiver,
    select_generation,
};
use crate::params::{Parameter, ParameterStore, ParameterValue};
use crate::quirks::{DeviceIdentity, EffectiveCapabilities, QuirkRegistry};
use crate::settings::SettingsStore;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Authorization gate consulted before any hardware open
pub trait PermissionGate: Send + Sync {
    fn has_camera_access(&self) -> bool;
}

/// Gate that always grants access
#[derive(Debug, Default)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn has_camera_access(&self) -> bool {
        true
    }
}

/// Gate that always denies access
#[derive(Debug, Default)]
pub struct DenyAll;

impl PermissionGate for DenyAll {
    fn has_camera_access(&self) -> bool {
        false
    }
}

/// Wrapper lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperState {
    Closed,
    Opening,
    Open,
    Closing,
    Error,
}

impl std::fmt::Display for WrapperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WrapperState::Closed => "closed",
            WrapperState::Opening => "opening",
            WrapperState::Open => "open",
            WrapperState::Closing => "closing",
            WrapperState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// One opened physical or logical camera unit.
///
/// The capability view is populated once at open time and immutable for the
/// session; the quirk overlay resolved for this device is baked into it.
#[derive(Debug, Clone)]
pub struct CaptureDevice {
    pub session_id: Uuid,
    pub device_id: String,
    pub identity: DeviceIdentity,
    pub generation: ApiGeneration,
    pub capabilities: Arc<EffectiveCapabilities>,
}

/// The two concrete generation backends a camera chooses between at open
pub struct Backends {
    pub legacy: Box<dyn ApiBackend>,
    pub modern: Box<dyn ApiBackend>,
}

type Reply<T> = Sender<CameraResult<T>>;

enum DeviceCommand {
    Open {
        selector: DeviceSelector,
        reply: Reply<CaptureDevice>,
    },
    Close {
        reply: Reply<bool>,
    },
    SetParameter {
        key: String,
        value: ParameterValue,
        reply: Reply<()>,
    },
    ApplyConfiguration {
        entries: Vec<(String, ParameterValue)>,
        reply: Reply<()>,
    },
    StartPreview {
        reply: Reply<PreviewReceiver>,
    },
    StopPreview {
        reply: Reply<()>,
    },
    SubmitCapture {
        request: CaptureRequest,
        sink: FrameSink,
        reply: Reply<()>,
    },
    CancelCapture,
    Fault {
        error: CameraError,
    },
}

struct CameraShared {
    state: Mutex<WrapperState>,
    device: Mutex<Option<CaptureDevice>>,
    values: ParameterStore,
    events: EventBus,
}

/// Thread-safe handle to one camera wrapper. Clones share the same device
/// context; dropping the last handle shuts the context down, closing the
/// device if it is still open.
#[derive(Clone)]
pub struct Camera {
    commands: Sender<DeviceCommand>,
    shared: Arc<CameraShared>,
}

impl Camera {
    pub fn new(
        backends: Backends,
        quirks: QuirkRegistry,
        gate: Arc<dyn PermissionGate>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let shared = Arc::new(CameraShared {
            state: Mutex::new(WrapperState::Closed),
            device: Mutex::new(None),
            values: ParameterStore::new(),
            events: EventBus::new(),
        });

        let (commands, receiver) = channel();
        let worker_shared = Arc::clone(&shared);
        thread::spawn(move || {
            DeviceWorker {
                backends,
                active: None,
                quirks,
                gate,
                settings,
                shared: worker_shared,
            }
            .run(receiver);
        });

        Self { commands, shared }
    }

    /// Register an event listener. Idempotent per listener id.
    pub fn subscribe(&self, listener_id: &str) -> Option<EventReceiver> {
        self.shared.events.subscribe(listener_id)
    }

    pub fn state(&self) -> WrapperState {
        *self.shared.state.lock().unwrap()
    }

    /// The open session, if any. Cheap to clone; capabilities are shared.
    pub fn device(&self) -> Option<CaptureDevice> {
        self.shared.device.lock().unwrap().clone()
    }

    pub fn capabilities(&self) -> CameraResult<Arc<EffectiveCapabilities>> {
        self.device()
            .map(|d| d.capabilities)
            .ok_or_else(|| CameraError::InvalidState("no open device".into()))
    }

    /// Capability metadata for one parameter. Readable from any context.
    pub fn parameter(&self, key: &str) -> CameraResult<Parameter> {
        let capabilities = self.capabilities()?;
        capabilities
            .get(key)
            .cloned()
            .ok_or_else(|| CameraError::NotSupported(key.to_string()))
    }

    /// Current value of a writable parameter, via the synchronized store
    pub fn current_value(&self, key: &str) -> CameraResult<ParameterValue> {
        let parameter = self.parameter(key)?;
        if !parameter.supported {
            return Err(CameraError::NotSupported(key.to_string()));
        }
        Ok(self
            .shared
            .values
            .get(key)
            .unwrap_or(parameter.default))
    }

    /// Open a device. Resolves the API generation per the selector, checks
    /// the permission gate, probes capabilities once and applies the quirk
    /// overlay for the session.
    pub fn open(&self, selector: DeviceSelector) -> CameraResult<CaptureDevice> {
        match self.roundtrip(OPEN_TIMEOUT, |reply| DeviceCommand::Open { selector, reply }) {
            Err(CameraError::Timeout(what)) => {
                // Best-effort release rather than leaving the device held
                let (reply, _keep) = channel();
                let _ = self.commands.send(DeviceCommand::Close { reply });
                Err(CameraError::Timeout(what))
            }
            other => other,
        }
    }

    /// Close the device. Idempotent: closing an already-closed camera is a
    /// no-op and emits nothing.
    pub fn close(&self) -> CameraResult<()> {
        self.roundtrip(COMMAND_TIMEOUT, |reply| DeviceCommand::Close { reply })
            .map(|_closed| ())
    }

    /// Write one parameter. Validation errors (`NotSupported`, `OutOfRange`)
    /// return synchronously and the hardware is never touched.
    pub fn set_parameter(&self, key: &str, value: ParameterValue) -> CameraResult<()> {
        self.roundtrip(COMMAND_TIMEOUT, |reply| DeviceCommand::SetParameter {
            key: key.to_string(),
            value,
            reply,
        })
    }

    /// Apply a batch of writes with all-or-nothing semantics: nothing is
    /// forwarded to hardware unless every entry validates.
    pub fn apply_configuration(
        &self,
        entries: Vec<(String, ParameterValue)>,
    ) -> CameraResult<()> {
        self.roundtrip(COMMAND_TIMEOUT, |reply| DeviceCommand::ApplyConfiguration {
            entries,
            reply,
        })
    }

    pub fn start_preview(&self) -> CameraResult<PreviewReceiver> {
        self.roundtrip(COMMAND_TIMEOUT, |reply| DeviceCommand::StartPreview { reply })
    }

    pub fn stop_preview(&self) -> CameraResult<()> {
        self.roundtrip(COMMAND_TIMEOUT, |reply| DeviceCommand::StopPreview { reply })
    }

    /// Start capture work feeding the given sink. Used by the capture
    /// controller; not part of the consumer surface.
    pub(crate) fn submit_capture(
        &self,
        request: CaptureRequest,
        sink: FrameSink,
    ) -> CameraResult<()> {
        self.roundtrip(COMMAND_TIMEOUT, |reply| DeviceCommand::SubmitCapture {
            request,
            sink,
            reply,
        })
    }

    pub(crate) fn cancel_capture(&self) {
        let _ = self.commands.send(DeviceCommand::CancelCapture);
    }

    /// Report an unrecoverable fault observed outside the device context
    /// (e.g. a disconnect surfaced through a capture callback). Drives
    /// `Open → Error → Closed` with exactly one device-closed event.
    pub(crate) fn report_hardware_fault(&self, error: CameraError) {
        let _ = self.commands.send(DeviceCommand::Fault { error });
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.shared.events
    }

    fn roundtrip<T>(
        &self,
        timeout: Duration,
        build: impl FnOnce(Reply<T>) -> DeviceCommand,
    ) -> CameraResult<T> {
        let (reply, response) = channel();
        self.commands
            .send(build(reply))
            .map_err(|_| CameraError::InvalidState("device context gone".into()))?;
        response
            .recv_timeout(timeout)
            .map_err(|_| CameraError::Timeout("device context command".into()))?
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("state", &self.state())
            .field("device", &self.device().map(|d| d.device_id))
            .finish()
    }
}

/// Owns the backends and the physical handle; runs on the device context
/// thread. All driver objects live and die on this thread.
struct DeviceWorker {
    backends: Backends,
    active: Option<ApiGeneration>,
    quirks: QuirkRegistry,
    gate: Arc<dyn PermissionGate>,
    settings: Arc<dyn SettingsStore>,
    shared: Arc<CameraShared>,
}

impl DeviceWorker {
    fn run(mut self, receiver: Receiver<DeviceCommand>) {
        while let Ok(command) = receiver.recv() {
            match command {
                DeviceCommand::Open { selector, reply } => {
                    let _ = reply.send(self.handle_open(selector));
                }
                DeviceCommand::Close { reply } => {
                    let _ = reply.send(self.handle_close());
                }
                DeviceCommand::SetParameter { key, value, reply } => {
                    let _ = reply.send(self.handle_set(&key, value));
                }
                DeviceCommand::ApplyConfiguration { entries, reply } => {
                    let _ = reply.send(self.handle_apply(entries));
                }
                DeviceCommand::StartPreview { reply } => {
                    let _ = reply.send(self.handle_start_preview());
                }
                DeviceCommand::StopPreview { reply } => {
                    let _ = reply.send(self.handle_stop_preview());
                }
                DeviceCommand::SubmitCapture {
                    request,
                    sink,
                    reply,
                } => {
                    let _ = reply.send(self.handle_submit_capture(request, sink));
                }
                DeviceCommand::CancelCapture => {
                    if let Some(backend) = self.active_backend() {
                        backend.cancel_capture();
                    }
                }
                DeviceCommand::Fault { error } => self.handle_fault(error),
            }
        }
        // Every handle dropped; release hardware before the context exits
        if self.state() != WrapperState::Closed {
            debug!("Device context shutting down with device open; closing");
            let _ = self.handle_close();
        }
    }

    fn state(&self) -> WrapperState {
        *self.shared.state.lock().unwrap()
    }

    fn set_state(&self, state: WrapperState) {
        *self.shared.state.lock().unwrap() = state;
    }

    fn backend_mut(&mut self, generation: ApiGeneration) -> &mut dyn ApiBackend {
        match generation {
            ApiGeneration::Legacy => self.backends.legacy.as_mut(),
            ApiGeneration::Modern => self.backends.modern.as_mut(),
        }
    }

    fn active_backend(&mut self) -> Option<&mut dyn ApiBackend> {
        match self.active {
            Some(ApiGeneration::Legacy) => Some(self.backends.legacy.as_mut()),
            Some(ApiGeneration::Modern) => Some(self.backends.modern.as_mut()),
            None => None,
        }
    }

    fn open_device(&self) -> CameraResult<CaptureDevice> {
        self.shared
            .device
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CameraError::InvalidState("no open device".into()))
    }

    fn enumerate(&self) -> Vec<DriverDeviceInfo> {
        let mut devices = self.backends.legacy.enumerate();
        if devices.is_empty() {
            devices = self.backends.modern.enumerate();
        }
        devices
    }

    fn handle_open(&mut self, selector: DeviceSelector) -> CameraResult<CaptureDevice> {
        match self.state() {
            WrapperState::Closed => {}
            WrapperState::Opening | WrapperState::Closing => {
                return Err(CameraError::InvalidState(
                    "open while a lifecycle transition is in progress".into(),
                ));
            }
            state => {
                return Err(CameraError::InvalidState(format!(
                    "open while {}",
                    state
                )));
            }
        }

        if !self.gate.has_camera_access() {
            return Err(CameraError::PermissionDenied);
        }

        let devices = self.enumerate();
        let info = match &selector.device_id {
            Some(id) => devices.into_iter().find(|d| &d.device_id == id),
            None => devices.into_iter().next(),
        }
        .ok_or_else(|| {
            CameraError::DeviceUnavailable(
                selector.device_id.clone().unwrap_or_else(|| "any".into()),
            )
        })?;

        let generation = select_generation(&info, &selector)?;
        self.set_state(WrapperState::Opening);
        info!(device = %info.device_id, %generation, "Opening camera");

        let descriptor = {
            let backend = self.backend_mut(generation);
            let mut attempt = 1;
            loop {
                match backend.open(&info.device_id) {
                    Ok(descriptor) => break descriptor,
                    Err(err) if err.is_recoverable() && attempt < MAX_OPEN_ATTEMPTS => {
                        warn!(%err, attempt, "Transient open failure, retrying");
                        attempt += 1;
                        thread::sleep(OPEN_RETRY_DELAY);
                    }
                    Err(err) => {
                        self.set_state(WrapperState::Closed);
                        return Err(err);
                    }
                }
            }
        };

        // Capability detection runs once per session
        let base = match self.backend_mut(generation).probe() {
            Ok(base) => base,
            Err(err) => {
                self.backend_mut(generation).close();
                self.set_state(WrapperState::Closed);
                return Err(err);
            }
        };
        let overlay = self.quirks.resolve(&descriptor.identity);
        if !overlay.is_empty() {
            debug!(identity = %descriptor.identity, "Applying device quirk overlay");
        }
        let capabilities = Arc::new(EffectiveCapabilities::new(Arc::new(base), &overlay));

        self.shared.values.seed(capabilities.view());
        self.active = Some(generation);

        let device = CaptureDevice {
            session_id: Uuid::new_v4(),
            device_id: descriptor.device_id.clone(),
            identity: descriptor.identity,
            generation,
            capabilities: Arc::clone(&capabilities),
        };
        *self.shared.device.lock().unwrap() = Some(device.clone());
        self.set_state(WrapperState::Open);

        self.restore_persisted(&device);

        self.shared.events.emit(CameraEvent::DeviceOpened {
            device_id: device.device_id.clone(),
            generation,
        });
        info!(device = %device.device_id, parameters = capabilities.view().len(), "Camera open");
        Ok(device)
    }

    /// Re-apply the last-applied values persisted for this device. Stale
    /// values that no longer validate against the fresh probe are skipped,
    /// never fatal.
    fn restore_persisted(&mut self, device: &CaptureDevice) {
        let Some(saved) = self.settings.load(&device.device_id) else {
            return;
        };
        for (key, value) in saved {
            match device.capabilities.validate(&key, value) {
                Ok(aligned) => {
                    let wire = device.capabilities.wire_key(&key).to_string();
                    if let Err(err) = self
                        .backend_mut(device.generation)
                        .write_parameter(&wire, &aligned)
                    {
                        warn!(key, %err, "Failed to restore persisted parameter");
                    } else {
                        self.shared.values.record(&key, aligned);
                    }
                }
                Err(err) => warn!(key, %err, "Skipping stale persisted parameter"),
            }
        }
    }

    /// Returns whether a device was actually closed (false for the
    /// idempotent no-op case).
    fn handle_close(&mut self) -> CameraResult<bool> {
        match self.state() {
            WrapperState::Closed => Ok(false),
            WrapperState::Opening | WrapperState::Closing => Err(CameraError::InvalidState(
                "close while a lifecycle transition is in progress".into(),
            )),
            WrapperState::Open | WrapperState::Error => {
                self.set_state(WrapperState::Closing);
                if let Some(backend) = self.active_backend() {
                    backend.close();
                }
                self.active = None;
                let closed = self.shared.device.lock().unwrap().take();
                self.shared.values.clear();
                self.set_state(WrapperState::Closed);
                if let Some(device) = closed {
                    info!(device = %device.device_id, "Camera closed");
                    self.shared.events.emit(CameraEvent::DeviceClosed {
                        device_id: device.device_id,
                    });
                }
                Ok(true)
            }
        }
    }

    /// `Open → Error → Closed`: emit the error, then force a close so the
    /// presentation layer sees exactly one device-closed event.
    fn handle_fault(&mut self, fault: CameraError) {
        if self.state() != WrapperState::Open {
            return;
        }
        let device_id = match self.open_device() {
            Ok(device) => device.device_id,
            Err(_) => return,
        };
        error!(device = %device_id, %fault, "Unrecoverable hardware fault");
        self.set_state(WrapperState::Error);
        self.shared.events.emit(CameraEvent::DeviceError {
            device_id,
            error: fault,
        });
        let _ = self.handle_close();
    }

    fn handle_set(&mut self, key: &str, value: ParameterValue) -> CameraResult<()> {
        if self.state() != WrapperState::Open {
            return Err(CameraError::InvalidState("device not open".into()));
        }
        let device = self.open_device()?;

        // Validation first: an unsupported or out-of-range write never
        // reaches the hardware.
        let aligned = device.capabilities.validate(key, value)?;
        let wire = device.capabilities.wire_key(key).to_string();

        if let Err(err) = self
            .backend_mut(device.generation)
            .write_parameter(&wire, &aligned)
        {
            if matches!(err, CameraError::HardwareFault(_)) {
                self.handle_fault(err.clone());
            }
            return Err(err);
        }

        let previous = self.shared.values.get(key);
        self.shared.values.record(key, aligned.clone());
        self.settings
            .save(&device.device_id, &self.shared.values.snapshot());
        self.shared.events.emit(CameraEvent::ParameterChanged {
            device_id: device.device_id,
            key: key.to_string(),
            previous,
            value: aligned,
        });
        Ok(())
    }

    fn handle_apply(&mut self, entries: Vec<(String, ParameterValue)>) -> CameraResult<()> {
        if self.state() != WrapperState::Open {
            return Err(CameraError::InvalidState("device not open".into()));
        }
        let device = self.open_device()?;

        // All-or-nothing: every entry validates before any write happens
        let mut validated = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match device.capabilities.validate(&key, value) {
                Ok(aligned) => validated.push((key, aligned)),
                Err(err) => {
                    self.shared.events.emit(CameraEvent::ConfigurationRejected {
                        device_id: device.device_id.clone(),
                        key,
                        error: err.clone(),
                    });
                    return Err(err);
                }
            }
        }

        for (key, aligned) in &validated {
            let wire = device.capabilities.wire_key(key).to_string();
            if let Err(err) = self
                .backend_mut(device.generation)
                .write_parameter(&wire, aligned)
            {
                if matches!(err, CameraError::HardwareFault(_)) {
                    self.handle_fault(err.clone());
                }
                return Err(err);
            }
            let previous = self.shared.values.get(key);
            self.shared.values.record(key, aligned.clone());
            self.shared.events.emit(CameraEvent::ParameterChanged {
                device_id: device.device_id.clone(),
                key: key.clone(),
                previous,
                value: aligned.clone(),
            });
        }
        self.settings
            .save(&device.device_id, &self.shared.values.snapshot());
        Ok(())
    }

    fn handle_start_preview(&mut self) -> CameraResult<PreviewReceiver> {
        if self.state() != WrapperState::Open {
            return Err(CameraError::InvalidState("device not open".into()));
        }
        let (sender, receiver) = futures::channel::mpsc::channel(PREVIEW_CHANNEL_DEPTH);
        let backend = self
            .active_backend()
            .ok_or_else(|| CameraError::InvalidState("no active backend".into()))?;
        backend.start_preview(sender)?;
        Ok(receiver)
    }

    fn handle_stop_preview(&mut self) -> CameraResult<()> {
        if self.state() != WrapperState::Open {
            return Err(CameraError::InvalidState("device not open".into()));
        }
        if let Some(backend) = self.active_backend() {
            backend.stop_preview();
        }
        Ok(())
    }

    fn handle_submit_capture(
        &mut self,
        request: CaptureRequest,
        sink: FrameSink,
    ) -> CameraResult<()> {
        if self.state() != WrapperState::Open {
            return Err(CameraError::InvalidState("device not open".into()));
        }
        let backend = self
            .active_backend()
            .ok_or_else(|| CameraError::InvalidState("no active backend".into()))?;
        backend.submit_capture(request, sink)
    }
}
