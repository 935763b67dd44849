// SPDX-License-Identifier: GPL-3.0-only

//! Capture-module orchestration
//!
//! One mode of acquisition (photo, burst, RAW, video) at a time runs against
//! an open camera as a *capture module*. Each activation drives the module
//! through `Idle → Preparing → Capturing → Processing → Done`, with `Error`
//! reachable from every working state. State transitions are serialized on a
//! dedicated capture-context thread; frames arrive from the backend over a
//! bounded channel so a slow module back-pressures the hardware pump instead
//! of dropping capture frames.

pub mod modules;

use crate::constants::{FRAME_CHANNEL_DEPTH, FRAME_TIMEOUT, MAX_CAPTURE_RETRIES};
use crate::device::{Camera, CaptureDevice};
use crate::errors::{CameraError, CameraResult};
use crate::events::CameraEvent;
use crate::hal::driver::CaptureRequest;
use crate::hal::{HardwareEvent, SensorFrame};
use crate::params::ParameterValue;
use crate::pipeline::{CaptureOutput, OutputSink, RawCodec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, sync_channel};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle state of an activated capture module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    /// Configuration validation and parameter staging
    Preparing,
    /// Frames are flowing from the hardware
    Capturing,
    /// Downstream conversion and packaging
    Processing,
    /// Output acknowledged by the sink
    Done,
    Error,
}

impl CaptureState {
    /// Terminal states release no more transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureState::Idle | CaptureState::Done | CaptureState::Error
        )
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Preparing => "preparing",
            CaptureState::Capturing => "capturing",
            CaptureState::Processing => "processing",
            CaptureState::Done => "done",
            CaptureState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// One parameter a module needs before it can capture
#[derive(Debug, Clone)]
pub struct ParameterRequirement {
    pub key: String,
    /// Required current value; `None` means the key merely has to be supported
    pub expect: Option<ParameterValue>,
}

impl ParameterRequirement {
    pub fn supported(key: &str) -> Self {
        Self {
            key: key.to_string(),
            expect: None,
        }
    }

    pub fn equals(key: &str, value: ParameterValue) -> Self {
        Self {
            key: key.to_string(),
            expect: Some(value),
        }
    }
}

/// Accumulated capture progress handed to [`CaptureModule::is_complete`]
#[derive(Debug)]
pub struct CaptureProgress {
    pub frames: Vec<SensorFrame>,
    pub started: Instant,
}

impl CaptureProgress {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// One acquisition mode. Implementations decide what hardware work to
/// request, when enough frames have arrived, and how to turn them into
/// downstream output.
pub trait CaptureModule: Send {
    fn name(&self) -> &str;

    /// Parameters that must be satisfiable on the open device. Checked in
    /// `Preparing`; an unsatisfiable requirement fails the activation with
    /// `UnsupportedConfiguration`.
    fn required_parameters(&self) -> Vec<ParameterRequirement> {
        Vec::new()
    }

    fn request(&self) -> CaptureRequest;

    /// Whether the accumulated progress completes this capture. The module
    /// decides; the orchestrator never guesses from the request shape.
    fn is_complete(&self, progress: &CaptureProgress) -> bool;

    /// Turn captured frames into downstream output. Runs in `Processing`.
    fn process(
        &self,
        frames: Vec<SensorFrame>,
        codec: &dyn RawCodec,
        device: &CaptureDevice,
    ) -> CameraResult<CaptureOutput>;
}

#[derive(Debug)]
struct SharedStatus {
    state: Mutex<(CaptureState, Option<CameraError>)>,
    signal: Condvar,
}

impl SharedStatus {
    fn new() -> Self {
        Self {
            state: Mutex::new((CaptureState::Idle, None)),
            signal: Condvar::new(),
        }
    }

    fn set(&self, state: CaptureState, error: Option<CameraError>) {
        let mut guard = self.state.lock().unwrap();
        guard.0 = state;
        if error.is_some() {
            guard.1 = error;
        }
        self.signal.notify_all();
    }

    fn get(&self) -> (CaptureState, Option<CameraError>) {
        self.state.lock().unwrap().clone()
    }

    fn wait_terminal(&self, timeout: Duration) -> CameraResult<CaptureState> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.0.is_terminal() {
                return Ok(guard.0);
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| CameraError::Timeout("capture completion".into()))?;
            let (next, timed_out) = self.signal.wait_timeout(guard, remaining).unwrap();
            guard = next;
            if timed_out.timed_out() && !guard.0.is_terminal() {
                return Err(CameraError::Timeout("capture completion".into()));
            }
        }
    }
}

/// Handle to one module activation
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    module: String,
    status: Arc<SharedStatus>,
    cancel: Arc<AtomicBool>,
}

impl CaptureHandle {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn state(&self) -> CaptureState {
        self.status.get().0
    }

    /// The error that drove the module into `Error`, if any
    pub fn error(&self) -> Option<CameraError> {
        self.status.get().1
    }

    /// Request cancellation. Honored promptly in `Preparing` and `Capturing`
    /// (the module returns to `Idle`); once `Processing` has begun the
    /// request is deferred and the capture completes normally.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Block until the activation reaches a terminal state
    pub fn wait(&self, timeout: Duration) -> CameraResult<CaptureState> {
        self.status.wait_terminal(timeout)
    }
}

struct ActiveCapture {
    module: String,
    status: Arc<SharedStatus>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// Serializes module activations against one camera.
///
/// At most one module is active per device; a second activation while one is
/// running fails with `ModuleBusy` and never interleaves hardware work. A
/// module that finished in `Done` releases the slot implicitly; a module that
/// failed holds the slot until [`CaptureController::reset`] so the error is
/// observed, not silently swallowed.
pub struct CaptureController {
    camera: Camera,
    codec: Arc<dyn RawCodec>,
    sink: Arc<dyn OutputSink>,
    active: Mutex<Option<ActiveCapture>>,
}

impl CaptureController {
    pub fn new(camera: Camera, codec: Arc<dyn RawCodec>, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            camera,
            codec,
            sink,
            active: Mutex::new(None),
        }
    }

    pub fn active_module(&self) -> Option<String> {
        self.active.lock().unwrap().as_ref().map(|a| a.module.clone())
    }

    /// Activate a capture module. Runs the full state machine on a dedicated
    /// capture-context thread; the returned handle observes and cancels it.
    pub fn activate(&self, module: Box<dyn CaptureModule>) -> CameraResult<CaptureHandle> {
        let device = self
            .camera
            .device()
            .ok_or_else(|| CameraError::InvalidState("no open device".into()))?;

        let mut slot = self.active.lock().unwrap();
        if let Some(existing) = slot.as_mut() {
            match existing.status.get().0 {
                CaptureState::Done | CaptureState::Idle => {
                    // Finished cleanly; release the slot for the new module
                    if let Some(worker) = existing.worker.take() {
                        let _ = worker.join();
                    }
                }
                CaptureState::Error => {
                    return Err(CameraError::InvalidState(format!(
                        "module {} failed; reset required",
                        existing.module
                    )));
                }
                _ => return Err(CameraError::ModuleBusy(existing.module.clone())),
            }
            *slot = None;
        }

        let name = module.name().to_string();
        let status = Arc::new(SharedStatus::new());
        let cancel = Arc::new(AtomicBool::new(false));

        info!(module = %name, device = %device.device_id, "Activating capture module");
        self.camera.events().emit(CameraEvent::ModuleChanged {
            device_id: device.device_id.clone(),
            module: Some(name.clone()),
        });

        // Leave Idle before the worker spawns so a handle never mistakes the
        // starting state for a finished one.
        status.set(CaptureState::Preparing, None);
        self.camera.events().emit(CameraEvent::CaptureStateChanged {
            module: name.clone(),
            old: CaptureState::Idle,
            new: CaptureState::Preparing,
        });

        let worker = {
            let camera = self.camera.clone();
            let codec = Arc::clone(&self.codec);
            let sink = Arc::clone(&self.sink);
            let status = Arc::clone(&status);
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || {
                run_capture(camera, device, module, codec, sink, status, cancel);
            })
        };

        *slot = Some(ActiveCapture {
            module: name.clone(),
            status: Arc::clone(&status),
            cancel: Arc::clone(&cancel),
            worker: Some(worker),
        });

        Ok(CaptureHandle {
            module: name,
            status,
            cancel,
        })
    }

    /// Cancel whatever module is active. No-op when nothing runs.
    pub fn cancel_active(&self) {
        if let Some(active) = self.active.lock().unwrap().as_ref() {
            active.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Release the slot after a module ended. Required after `Error`;
    /// harmless otherwise. Fails with `ModuleBusy` while a capture still
    /// runs.
    pub fn reset(&self) -> CameraResult<()> {
        let mut slot = self.active.lock().unwrap();
        if let Some(active) = slot.as_mut() {
            if !active.status.get().0.is_terminal() {
                return Err(CameraError::ModuleBusy(active.module.clone()));
            }
            if let Some(worker) = active.worker.take() {
                let _ = worker.join();
            }
            let module = active.module.clone();
            *slot = None;
            debug!(module = %module, "Capture slot released");
            if let Some(device) = self.camera.device() {
                self.camera.events().emit(CameraEvent::ModuleChanged {
                    device_id: device.device_id,
                    module: None,
                });
            }
        }
        Ok(())
    }
}

fn run_capture(
    camera: Camera,
    device: CaptureDevice,
    module: Box<dyn CaptureModule>,
    codec: Arc<dyn RawCodec>,
    sink: Arc<dyn OutputSink>,
    status: Arc<SharedStatus>,
    cancel: Arc<AtomicBool>,
) {
    let name = module.name().to_string();
    let transition = |old: CaptureState, new: CaptureState, error: Option<CameraError>| {
        status.set(new, error);
        camera.events().emit(CameraEvent::CaptureStateChanged {
            module: name.clone(),
            old,
            new,
        });
    };

    // Preparing (entered by the controller): every required parameter must
    // be satisfiable before any hardware work starts.
    for requirement in module.required_parameters() {
        let result = check_requirement(&camera, &requirement);
        if let Err(err) = result {
            warn!(module = %name, key = %requirement.key, %err, "Capture configuration rejected");
            transition(CaptureState::Preparing, CaptureState::Error, Some(err));
            return;
        }
    }
    if cancel.load(Ordering::SeqCst) {
        debug!(module = %name, "Cancelled during preparation");
        transition(CaptureState::Preparing, CaptureState::Idle, None);
        return;
    }

    // Capturing: frames flow over a bounded channel; the module decides when
    // enough arrived.
    transition(CaptureState::Preparing, CaptureState::Capturing, None);
    let mut progress = CaptureProgress {
        frames: Vec::new(),
        started: Instant::now(),
    };
    let (sender, receiver) = sync_channel(FRAME_CHANNEL_DEPTH);
    if let Err(err) = camera.submit_capture(module.request(), sender.clone()) {
        transition(CaptureState::Capturing, CaptureState::Error, Some(err));
        return;
    }

    let mut retries = 0;
    let outcome = loop {
        if cancel.load(Ordering::SeqCst) {
            camera.cancel_capture();
            debug!(module = %name, frames = progress.frames.len(), "Capture cancelled");
            break None;
        }
        match receiver.recv_timeout(FRAME_TIMEOUT) {
            Ok(HardwareEvent::Frame(frame)) => {
                progress.frames.push(frame);
                if module.is_complete(&progress) {
                    camera.cancel_capture();
                    break Some(Ok(()));
                }
            }
            Ok(HardwareEvent::CaptureComplete) => break Some(Ok(())),
            Ok(HardwareEvent::Fault(fault)) => {
                // Disconnect mid-capture: fail the module and let the device
                // wrapper run its own Open -> Error -> Closed sequence.
                camera.report_hardware_fault(fault.clone());
                break Some(Err(fault));
            }
            Err(RecvTimeoutError::Timeout) => {
                retries += 1;
                if retries > MAX_CAPTURE_RETRIES {
                    break Some(Err(CameraError::Timeout("frame delivery".into())));
                }
                warn!(module = %name, retries, "Frame deadline missed, resubmitting");
                camera.cancel_capture();
                if let Err(err) = camera.submit_capture(module.request(), sender.clone()) {
                    break Some(Err(err));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                break Some(Err(CameraError::HardwareFault("frame source gone".into())));
            }
        }
    };

    match outcome {
        None => {
            transition(CaptureState::Capturing, CaptureState::Idle, None);
            return;
        }
        Some(Err(err)) => {
            transition(CaptureState::Capturing, CaptureState::Error, Some(err));
            return;
        }
        Some(Ok(())) => {
            // Clears the backend's in-flight request even when the driver
            // completed it on its own; the next activation starts clean.
            camera.cancel_capture();
        }
    }

    // Processing: cancellation is deferred from here on, the capture runs to
    // completion.
    transition(CaptureState::Capturing, CaptureState::Processing, None);
    let frames = std::mem::take(&mut progress.frames);
    let frame_count = frames.len();
    let output = match module.process(frames, codec.as_ref(), &device) {
        Ok(output) => output,
        Err(err) => {
            warn!(module = %name, %err, "Processing failed");
            transition(CaptureState::Processing, CaptureState::Error, Some(err));
            return;
        }
    };

    // Done means the sink acknowledged ownership, not that writing finished
    match sink.submit(output) {
        Ok(ticket) => {
            info!(module = %name, frames = frame_count, handoff = %ticket.id, "Capture complete");
            transition(CaptureState::Processing, CaptureState::Done, None);
        }
        Err(err) => {
            transition(CaptureState::Processing, CaptureState::Error, Some(err));
        }
    }
}

fn check_requirement(camera: &Camera, requirement: &ParameterRequirement) -> CameraResult<()> {
    let current = camera.current_value(&requirement.key).map_err(|err| {
        CameraError::UnsupportedConfiguration(format!("{}: {}", requirement.key, err))
    })?;
    if let Some(expected) = &requirement.expect {
        if &current != expected {
            return Err(CameraError::UnsupportedConfiguration(format!(
                "{} is {}, needs {}",
                requirement.key, current, expected
            )));
        }
    }
    Ok(())
}
