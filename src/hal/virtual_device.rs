// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera device
//!
//! An in-process synthetic camera implementing both driver generation
//! contracts, with a configurable capability table, frame pacing and fault
//! injection. It plays the role real platform drivers play in production:
//! the CLI runs against it, and the test suite uses it to exercise open
//! retries, disconnect handling and capture sequencing deterministically.
//!
//! The modern side supports one in-flight request at a time, matching how
//! real request-driven drivers tie a request to a configured session.

use super::driver::{
    CaptureRequest, DriverDeviceInfo, DriverError, DriverResult, LegacyDriver, ModernDriver,
    RequestCallback, RequestEvent, SensorFrame,
};
use super::loop_thread::{LoopAction, LoopController};
use crate::params::normalize::Characteristic;
use crate::params::{ParameterRange, ParameterValue};
use crate::quirks::DeviceIdentity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Synthetic frame dimensions kept deliberately small
const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 48;

fn synth_frame(sequence: u32, raw_bayer: bool) -> SensorFrame {
    // Gradient pattern shifted per frame so consecutive frames differ
    let mut data = Vec::with_capacity((FRAME_WIDTH * FRAME_HEIGHT) as usize);
    for y in 0..FRAME_HEIGHT {
        for x in 0..FRAME_WIDTH {
            data.push(((x + y + sequence) % 256) as u8);
        }
    }
    SensorFrame {
        sequence,
        timestamp_us: sequence as u64 * 33_333,
        width: FRAME_WIDTH,
        height: FRAME_HEIGHT,
        data: Arc::from(data.into_boxed_slice()),
        exposure_us: Some(10_000),
        raw_bayer,
    }
}

/// One synthetic device entry
pub struct VirtualDevice {
    pub info: DriverDeviceInfo,
    /// Generation-1 flat descriptor list as the legacy driver reports it
    descriptors: Vec<(String, String)>,
    /// Generation-2 typed characteristics
    characteristics: Vec<Characteristic>,
    /// Live control values, shared by both generations
    values: HashMap<String, ParameterValue>,
    frame_interval: Duration,
}

impl VirtualDevice {
    pub fn new(device_id: &str, identity: DeviceIdentity, supports_modern: bool) -> Self {
        Self {
            info: DriverDeviceInfo {
                device_id: device_id.to_string(),
                identity,
                supports_modern,
            },
            descriptors: Vec::new(),
            characteristics: Vec::new(),
            values: HashMap::new(),
            frame_interval: Duration::from_millis(5),
        }
    }

    pub fn with_descriptors(mut self, descriptors: &[(&str, &str)]) -> Self {
        self.descriptors = descriptors
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn with_characteristics(mut self, characteristics: Vec<Characteristic>) -> Self {
        self.characteristics = characteristics;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    fn seed_values(&mut self) {
        for entry in &self.characteristics {
            self.values
                .entry(entry.key.clone())
                .or_insert_with(|| entry.default.clone());
        }
        for (key, value) in &self.descriptors {
            if !key.contains("-values")
                && !key.ends_with("-min")
                && !key.ends_with("-max")
                && !key.ends_with("-step")
            {
                self.values
                    .entry(key.clone())
                    .or_insert_with(|| ParameterValue::parse_lossy(value));
            }
        }
    }
}

struct VirtualState {
    devices: Vec<VirtualDevice>,
    connected: Option<usize>,
    frames_emitted: u32,
    /// Errors popped one per connect attempt before connects succeed
    connect_failures: Vec<DriverError>,
    /// Simulated hot-unplug after this many emitted frames
    disconnect_after_frames: Option<u32>,
    active_request: Option<LoopController>,
}

/// Handle to the shared virtual camera state. Clones see the same devices,
/// so a legacy and a modern view of the same hardware stay consistent.
#[derive(Clone)]
pub struct VirtualCamera {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualCamera {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                devices: Vec::new(),
                connected: None,
                frames_emitted: 0,
                connect_failures: Vec::new(),
                disconnect_after_frames: None,
                active_request: None,
            })),
        }
    }

    /// Two representative devices: a modern front sensor with typed
    /// characteristics and a legacy-only rear sensor with a flat,
    /// vendor-flavored parameter list.
    pub fn with_default_devices() -> Self {
        let camera = Self::new();
        camera.add_device(
            VirtualDevice::new(
                "cam-front",
                DeviceIdentity::new("acme", "ax-5", "lumen-isp"),
                true,
            )
            .with_characteristics(vec![
                Characteristic {
                    key: "iso".into(),
                    default: ParameterValue::Int(100),
                    range: ParameterRange::Int {
                        min: 100,
                        max: 3200,
                        step: 1,
                    },
                },
                Characteristic {
                    key: "shutter-us".into(),
                    default: ParameterValue::Int(10_000),
                    range: ParameterRange::Int {
                        min: 50,
                        max: 1_000_000,
                        step: 1,
                    },
                },
                Characteristic {
                    key: "focus-mode".into(),
                    default: ParameterValue::Text("auto".into()),
                    range: ParameterRange::Menu(vec![
                        ParameterValue::Text("auto".into()),
                        ParameterValue::Text("continuous".into()),
                        ParameterValue::Text("manual".into()),
                    ]),
                },
                Characteristic {
                    key: "white-balance".into(),
                    default: ParameterValue::Text("auto".into()),
                    range: ParameterRange::Menu(vec![
                        ParameterValue::Text("auto".into()),
                        ParameterValue::Text("daylight".into()),
                        ParameterValue::Text("cloudy".into()),
                        ParameterValue::Text("tungsten".into()),
                    ]),
                },
                Characteristic {
                    key: "exposure-bias".into(),
                    default: ParameterValue::Int(0),
                    range: ParameterRange::Int {
                        min: -12,
                        max: 12,
                        step: 1,
                    },
                },
                Characteristic {
                    key: "jpeg-quality".into(),
                    default: ParameterValue::Int(90),
                    range: ParameterRange::Int {
                        min: 1,
                        max: 100,
                        step: 1,
                    },
                },
                Characteristic {
                    key: "raw-capable".into(),
                    default: ParameterValue::Bool(true),
                    range: ParameterRange::Bool,
                },
            ]),
        );
        camera.add_device(
            VirtualDevice::new(
                "cam-rear",
                DeviceIdentity::new("vintage-optics", "vo-200", "photon-isp"),
                false,
            )
            .with_descriptors(&[
                ("vo-iso", "100"),
                ("vo-iso-values", "100,200,400,800,1600"),
                ("shutter-us", "10000"),
                ("shutter-us-min", "100"),
                ("shutter-us-max", "500000"),
                ("shutter-us-step", "100"),
                ("focus-mode", "auto"),
                ("focus-mode-values", "auto,infinity,macro"),
                ("white-balance", "auto"),
                ("white-balance-values", "auto,daylight,tungsten"),
                ("zoom-ratio", "100"),
                ("zoom-ratio-min", "100"),
                ("zoom-ratio-max", "400"),
                ("raw-capable", "false"),
            ]),
        );
        camera
    }

    pub fn add_device(&self, mut device: VirtualDevice) {
        device.seed_values();
        self.state.lock().unwrap().devices.push(device);
    }

    /// Make the next connect attempts fail with the given errors, in order
    pub fn inject_connect_failures(&self, failures: Vec<DriverError>) {
        self.state.lock().unwrap().connect_failures = failures;
    }

    /// Simulate hot-unplug after this many frames have been emitted
    pub fn disconnect_after(&self, frames: u32) {
        self.state.lock().unwrap().disconnect_after_frames = Some(frames);
    }

    fn connect_inner(&self, device_id: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.connect_failures.is_empty() {
            let err = state.connect_failures.remove(0);
            debug!(device = device_id, error = %err, "Injected connect failure");
            return Err(err);
        }
        let index = state
            .devices
            .iter()
            .position(|d| d.info.device_id == device_id)
            .ok_or_else(|| DriverError::NotFound(device_id.to_string()))?;
        state.connected = Some(index);
        state.frames_emitted = 0;
        info!(device = device_id, "Virtual device connected");
        Ok(())
    }

    fn disconnect_inner(&self) {
        let controller = {
            let mut state = self.state.lock().unwrap();
            state.connected = None;
            state.active_request.take()
        };
        // Join outside the lock; the generator thread takes it per iteration
        if let Some(mut controller) = controller {
            controller.stop();
        }
    }

    fn connected_index(&self) -> DriverResult<usize> {
        self.state
            .lock()
            .unwrap()
            .connected
            .ok_or(DriverError::Disconnected)
    }

    /// Emit one frame worth of bookkeeping; Err when the simulated unplug
    /// point has been reached.
    fn next_frame(&self, raw_bayer: bool) -> DriverResult<SensorFrame> {
        let mut state = self.state.lock().unwrap();
        if state.connected.is_none() {
            return Err(DriverError::Disconnected);
        }
        if let Some(limit) = state.disconnect_after_frames
            && state.frames_emitted >= limit
        {
            state.connected = None;
            return Err(DriverError::Disconnected);
        }
        state.frames_emitted += 1;
        Ok(synth_frame(state.frames_emitted, raw_bayer))
    }

    fn frame_interval(&self) -> Duration {
        let state = self.state.lock().unwrap();
        state
            .connected
            .map(|i| state.devices[i].frame_interval)
            .unwrap_or(Duration::from_millis(5))
    }
}

impl Default for VirtualCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl LegacyDriver for VirtualCamera {
    fn enumerate(&self) -> Vec<DriverDeviceInfo> {
        self.state
            .lock()
            .unwrap()
            .devices
            .iter()
            .map(|d| d.info.clone())
            .collect()
    }

    fn connect(&mut self, device_id: &str) -> DriverResult<()> {
        self.connect_inner(device_id)
    }

    fn disconnect(&mut self) {
        self.disconnect_inner();
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected.is_some()
    }

    fn parameter_descriptors(&self) -> DriverResult<Vec<(String, String)>> {
        let index = self.connected_index()?;
        Ok(self.state.lock().unwrap().devices[index].descriptors.clone())
    }

    fn write_parameter(&mut self, key: &str, value: &str) -> DriverResult<()> {
        let index = self.connected_index()?;
        let mut state = self.state.lock().unwrap();
        let device = &mut state.devices[index];
        if !device.values.contains_key(key) {
            return Err(DriverError::Rejected(format!("unknown parameter {}", key)));
        }
        device
            .values
            .insert(key.to_string(), ParameterValue::parse_lossy(value));
        Ok(())
    }

    fn read_parameter(&self, key: &str) -> DriverResult<String> {
        let index = self.connected_index()?;
        let state = self.state.lock().unwrap();
        state.devices[index]
            .values
            .get(key)
            .map(ParameterValue::to_wire)
            .ok_or_else(|| DriverError::Rejected(format!("unknown parameter {}", key)))
    }

    fn read_frame(&mut self) -> DriverResult<SensorFrame> {
        // Pace outside the lock, like a blocking sensor readout would
        thread::sleep(self.frame_interval());
        self.next_frame(false)
    }
}

impl ModernDriver for VirtualCamera {
    fn enumerate(&self) -> Vec<DriverDeviceInfo> {
        LegacyDriver::enumerate(self)
    }

    fn connect(&mut self, device_id: &str) -> DriverResult<()> {
        self.connect_inner(device_id)
    }

    fn disconnect(&mut self) {
        self.disconnect_inner();
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected.is_some()
    }

    fn characteristics(&self) -> DriverResult<Vec<Characteristic>> {
        let index = self.connected_index()?;
        Ok(self.state.lock().unwrap().devices[index]
            .characteristics
            .clone())
    }

    fn write_control(&mut self, key: &str, value: &ParameterValue) -> DriverResult<()> {
        let index = self.connected_index()?;
        let mut state = self.state.lock().unwrap();
        let device = &mut state.devices[index];
        if !device.values.contains_key(key) {
            return Err(DriverError::Rejected(format!("unknown control {}", key)));
        }
        device.values.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn read_control(&self, key: &str) -> DriverResult<ParameterValue> {
        let index = self.connected_index()?;
        let state = self.state.lock().unwrap();
        state.devices[index]
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::Rejected(format!("unknown control {}", key)))
    }

    fn submit_request(
        &mut self,
        request: CaptureRequest,
        mut on_event: RequestCallback,
    ) -> DriverResult<()> {
        {
            let state = self.state.lock().unwrap();
            if state.connected.is_none() {
                return Err(DriverError::Disconnected);
            }
            if state
                .active_request
                .as_ref()
                .is_some_and(|c| c.is_running())
            {
                return Err(DriverError::Rejected("request already in flight".into()));
            }
        }

        let camera = self.clone();
        let interval = self.frame_interval();
        let mut delivered: u32 = 0;
        // Completion events fire on this generator thread, standing in for a
        // driver-internal callback thread.
        let controller = LoopController::start("virtual-request", move || {
            thread::sleep(interval);
            match camera.next_frame(request.raw_output) {
                Ok(frame) => {
                    on_event(RequestEvent::Frame(frame));
                    delivered += 1;
                    if request.frame_count.is_some_and(|wanted| delivered >= wanted) {
                        on_event(RequestEvent::Completed);
                        return LoopAction::Stop;
                    }
                    LoopAction::Continue
                }
                Err(err) => {
                    on_event(RequestEvent::Fault(err));
                    LoopAction::Stop
                }
            }
        });

        self.state.lock().unwrap().active_request = Some(controller);
        Ok(())
    }

    fn cancel_request(&mut self) {
        let controller = self.state.lock().unwrap().active_request.take();
        if let Some(mut controller) = controller {
            controller.stop();
        }
    }
}
