// SPDX-License-Identifier: GPL-3.0-only

//! Generation-1 backend
//!
//! Adapts the legacy synchronous driver to the common [`ApiBackend`] surface.
//! The driver is blocking and single-threaded by contract, so it sits behind
//! a mutex and dedicated pump threads turn its blocking `read_frame` into the
//! asynchronous frame-sink model the capture context expects.

use super::driver::{CaptureRequest, DriverDeviceInfo, LegacyDriver};
use super::loop_thread::{LoopAction, LoopController};
use super::{
    ApiBackend, ApiGeneration, DeviceDescriptor, FrameSink, HardwareEvent, PreviewSender,
};
use crate::errors::{CameraError, CameraResult};
use crate::params::normalize;
use crate::params::{CapabilitySet, ParameterValue};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace, warn};

type SharedDriver = Arc<Mutex<Box<dyn LegacyDriver>>>;

/// Legacy synchronous backend
pub struct Gen1Backend {
    driver: SharedDriver,
    device: Option<DeviceDescriptor>,
    capture_loop: Option<LoopController>,
    preview_loop: Option<LoopController>,
}

impl Gen1Backend {
    pub fn new(driver: Box<dyn LegacyDriver>) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            device: None,
            capture_loop: None,
            preview_loop: None,
        }
    }

    fn require_open(&self) -> CameraResult<&DeviceDescriptor> {
        self.device
            .as_ref()
            .ok_or_else(|| CameraError::InvalidState("generation-1 backend not open".into()))
    }
}

impl ApiBackend for Gen1Backend {
    fn generation(&self) -> ApiGeneration {
        ApiGeneration::Legacy
    }

    fn enumerate(&self) -> Vec<DriverDeviceInfo> {
        self.driver.lock().unwrap().enumerate()
    }

    fn open(&mut self, device_id: &str) -> CameraResult<DeviceDescriptor> {
        let mut driver = self.driver.lock().unwrap();
        let info = driver
            .enumerate()
            .into_iter()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| CameraError::DeviceUnavailable(device_id.to_string()))?;

        driver.connect(device_id)?;
        info!(device = device_id, "Opened device on generation-1 driver");

        let descriptor = DeviceDescriptor {
            device_id: info.device_id,
            identity: info.identity,
            generation: ApiGeneration::Legacy,
        };
        self.device = Some(descriptor.clone());
        Ok(descriptor)
    }

    fn probe(&mut self) -> CameraResult<CapabilitySet> {
        self.require_open()?;
        let descriptors = self.driver.lock().unwrap().parameter_descriptors()?;
        let capabilities = normalize::from_legacy_descriptors(&descriptors);
        debug!(
            parameters = capabilities.len(),
            "Probed generation-1 capability list"
        );
        Ok(capabilities)
    }

    fn write_parameter(&mut self, key: &str, value: &ParameterValue) -> CameraResult<()> {
        self.require_open()?;
        // Legacy drivers speak strings on the wire
        self.driver
            .lock()
            .unwrap()
            .write_parameter(key, &value.to_wire())?;
        Ok(())
    }

    fn read_parameter(&mut self, key: &str) -> CameraResult<ParameterValue> {
        self.require_open()?;
        let raw = self.driver.lock().unwrap().read_parameter(key)?;
        Ok(ParameterValue::parse_lossy(&raw))
    }

    fn start_preview(&mut self, mut sender: PreviewSender) -> CameraResult<()> {
        self.require_open()?;
        if self.preview_loop.is_some() {
            return Err(CameraError::InvalidState("preview already running".into()));
        }

        let driver = Arc::clone(&self.driver);
        self.preview_loop = Some(LoopController::start("gen1-preview", move || {
            let frame = match driver.lock().unwrap().read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "Generation-1 preview read failed");
                    return LoopAction::Stop;
                }
            };
            // Preview is lossy: a full buffer drops the frame, a closed
            // receiver ends the stream.
            match sender.try_send(frame) {
                Ok(()) => LoopAction::Continue,
                Err(err) if err.is_full() => {
                    trace!("Preview consumer lagging, dropping frame");
                    LoopAction::Continue
                }
                Err(_) => LoopAction::Stop,
            }
        }));
        Ok(())
    }

    fn stop_preview(&mut self) {
        if let Some(mut controller) = self.preview_loop.take() {
            controller.stop();
        }
    }

    fn submit_capture(&mut self, request: CaptureRequest, sink: FrameSink) -> CameraResult<()> {
        self.require_open()?;
        if self.capture_loop.is_some() {
            return Err(CameraError::InvalidState(
                "generation-1 capture already in flight".into(),
            ));
        }

        let driver = Arc::clone(&self.driver);
        let mut delivered: u32 = 0;
        self.capture_loop = Some(LoopController::start("gen1-capture", move || {
            let result = driver.lock().unwrap().read_frame();
            match result {
                Ok(frame) => {
                    if sink.send(HardwareEvent::Frame(frame)).is_err() {
                        // Capture context went away; nothing left to feed
                        return LoopAction::Stop;
                    }
                    delivered += 1;
                    if request.frame_count.is_some_and(|wanted| delivered >= wanted) {
                        let _ = sink.send(HardwareEvent::CaptureComplete);
                        return LoopAction::Stop;
                    }
                    LoopAction::Continue
                }
                Err(err) => {
                    let _ = sink.send(HardwareEvent::Fault(err.into()));
                    LoopAction::Stop
                }
            }
        }));
        Ok(())
    }

    fn cancel_capture(&mut self) {
        if let Some(mut controller) = self.capture_loop.take() {
            controller.stop();
        }
    }

    fn is_connected(&self) -> bool {
        self.driver.lock().unwrap().is_connected()
    }

    fn close(&mut self) {
        self.cancel_capture();
        self.stop_preview();
        self.driver.lock().unwrap().disconnect();
        if self.device.take().is_some() {
            info!("Closed generation-1 device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::virtual_device::VirtualCamera;
    use std::sync::mpsc::sync_channel;
    use std::time::Duration;

    fn open_backend() -> Gen1Backend {
        let mut backend = Gen1Backend::new(Box::new(VirtualCamera::with_default_devices()));
        backend.open("cam-rear").unwrap();
        backend
    }

    #[test]
    fn test_probe_normalizes_flat_list() {
        let mut backend = open_backend();
        let caps = backend.probe().unwrap();
        assert!(!caps.is_empty());
        // The legacy device duplicates ISO under a vendor key
        assert!(caps.is_supported("vo-iso"));
    }

    #[test]
    fn test_capture_delivers_requested_frames() {
        let mut backend = open_backend();
        let (tx, rx) = sync_channel(8);
        backend
            .submit_capture(CaptureRequest::frames(2), tx)
            .unwrap();

        let mut frames = 0;
        loop {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                HardwareEvent::Frame(_) => frames += 1,
                HardwareEvent::CaptureComplete => break,
                HardwareEvent::Fault(err) => panic!("fault: {}", err),
            }
        }
        assert_eq!(frames, 2);
        backend.close();
    }

    #[test]
    fn test_write_requires_open() {
        let mut backend = Gen1Backend::new(Box::new(VirtualCamera::with_default_devices()));
        let err = backend
            .write_parameter("vo-iso", &ParameterValue::Int(200))
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));
    }
}
