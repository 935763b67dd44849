// SPDX-License-Identifier: GPL-3.0-only

//! Generation-2 backend
//!
//! Adapts the modern asynchronous driver to the common [`ApiBackend`]
//! surface. Completion callbacks arrive on driver-internal threads; the
//! callback registered here only forwards events into the bounded frame sink
//! and never touches backend state, so all state mutation stays on the
//! device context.

use super::driver::{CaptureRequest, DriverDeviceInfo, ModernDriver, RequestEvent};
use super::{
    ApiBackend, ApiGeneration, DeviceDescriptor, FrameSink, HardwareEvent, PreviewSender,
};
use crate::errors::{CameraError, CameraResult};
use crate::params::normalize;
use crate::params::{CapabilitySet, ParameterValue};
use tracing::{debug, info, trace};

/// Modern request/result backend
pub struct Gen2Backend {
    driver: Box<dyn ModernDriver>,
    device: Option<DeviceDescriptor>,
    capture_in_flight: bool,
    preview_running: bool,
}

impl Gen2Backend {
    pub fn new(driver: Box<dyn ModernDriver>) -> Self {
        Self {
            driver,
            device: None,
            capture_in_flight: false,
            preview_running: false,
        }
    }

    fn require_open(&self) -> CameraResult<&DeviceDescriptor> {
        self.device
            .as_ref()
            .ok_or_else(|| CameraError::InvalidState("generation-2 backend not open".into()))
    }
}

impl ApiBackend for Gen2Backend {
    fn generation(&self) -> ApiGeneration {
        ApiGeneration::Modern
    }

    fn enumerate(&self) -> Vec<DriverDeviceInfo> {
        self.driver.enumerate()
    }

    fn open(&mut self, device_id: &str) -> CameraResult<DeviceDescriptor> {
        let info = self
            .driver
            .enumerate()
            .into_iter()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| CameraError::DeviceUnavailable(device_id.to_string()))?;
        if !info.supports_modern {
            return Err(CameraError::DeviceUnavailable(format!(
                "{} has no generation-2 support",
                device_id
            )));
        }

        self.driver.connect(device_id)?;
        info!(device = device_id, "Opened device on generation-2 driver");

        let descriptor = DeviceDescriptor {
            device_id: info.device_id,
            identity: info.identity,
            generation: ApiGeneration::Modern,
        };
        self.device = Some(descriptor.clone());
        Ok(descriptor)
    }

    fn probe(&mut self) -> CameraResult<CapabilitySet> {
        self.require_open()?;
        let entries = self.driver.characteristics()?;
        let capabilities = normalize::from_characteristics(&entries);
        debug!(
            parameters = capabilities.len(),
            "Probed generation-2 characteristics"
        );
        Ok(capabilities)
    }

    fn write_parameter(&mut self, key: &str, value: &ParameterValue) -> CameraResult<()> {
        self.require_open()?;
        self.driver.write_control(key, value)?;
        Ok(())
    }

    fn read_parameter(&mut self, key: &str) -> CameraResult<ParameterValue> {
        self.require_open()?;
        Ok(self.driver.read_control(key)?)
    }

    fn start_preview(&mut self, mut sender: PreviewSender) -> CameraResult<()> {
        self.require_open()?;
        if self.preview_running {
            return Err(CameraError::InvalidState("preview already running".into()));
        }

        // A repeating request; the callback runs on the driver thread and
        // only pushes into the lossy preview channel.
        self.driver.submit_request(
            CaptureRequest::streaming(),
            Box::new(move |event| {
                if let RequestEvent::Frame(frame) = event
                    && let Err(err) = sender.try_send(frame)
                    && err.is_full()
                {
                    trace!("Preview consumer lagging, dropping frame");
                }
            }),
        )?;
        self.preview_running = true;
        Ok(())
    }

    fn stop_preview(&mut self) {
        if self.preview_running {
            self.driver.cancel_request();
            self.preview_running = false;
        }
    }

    fn submit_capture(&mut self, request: CaptureRequest, sink: FrameSink) -> CameraResult<()> {
        self.require_open()?;
        if self.capture_in_flight {
            return Err(CameraError::InvalidState(
                "generation-2 capture already in flight".into(),
            ));
        }

        // Handoff only: the blocking send applies back-pressure to the
        // driver thread when the capture context falls behind.
        self.driver.submit_request(
            request,
            Box::new(move |event| {
                let mapped = match event {
                    RequestEvent::Frame(frame) => HardwareEvent::Frame(frame),
                    RequestEvent::Completed => HardwareEvent::CaptureComplete,
                    RequestEvent::Fault(err) => HardwareEvent::Fault(err.into()),
                };
                let _ = sink.send(mapped);
            }),
        )?;
        self.capture_in_flight = true;
        Ok(())
    }

    fn cancel_capture(&mut self) {
        if self.capture_in_flight {
            self.driver.cancel_request();
            self.capture_in_flight = false;
        }
    }

    fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    fn close(&mut self) {
        self.cancel_capture();
        self.stop_preview();
        self.driver.disconnect();
        if self.device.take().is_some() {
            info!("Closed generation-2 device");
        }
    }
}
