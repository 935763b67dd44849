// SPDX-License-Identifier: GPL-3.0-only

//! Raw driver seam
//!
//! Narrow traits modelling the two hardware driver generations this layer
//! reconciles. These are the external contracts: real platform drivers, the
//! in-process virtual camera and test fakes all implement them.
//!
//! Generation 1 is synchronous and parameter-list-driven: stringly typed
//! key/value descriptors and a blocking frame read. Generation 2 is
//! asynchronous and request/result-driven: typed characteristics, capture
//! requests, and completion callbacks arriving on driver-internal threads.

use crate::errors::CameraError;
use crate::params::normalize::Characteristic;
use crate::params::ParameterValue;
use crate::quirks::DeviceIdentity;
use std::fmt;
use std::sync::Arc;

/// Result type for raw driver calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors at the driver seam, mapped into the crate taxonomy by the backends
#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Device held by another client
    Busy,
    /// No such device
    NotFound(String),
    /// Caller lacks access rights
    AccessDenied,
    /// Device vanished mid-session
    Disconnected,
    /// Driver rejected the request
    Rejected(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Busy => write!(f, "device busy"),
            DriverError::NotFound(id) => write!(f, "device not found: {}", id),
            DriverError::AccessDenied => write!(f, "access denied"),
            DriverError::Disconnected => write!(f, "device disconnected"),
            DriverError::Rejected(msg) => write!(f, "request rejected: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<DriverError> for CameraError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Busy => CameraError::DeviceBusy,
            DriverError::NotFound(id) => CameraError::DeviceUnavailable(id),
            DriverError::AccessDenied => CameraError::PermissionDenied,
            DriverError::Disconnected => CameraError::HardwareFault("device disconnected".into()),
            DriverError::Rejected(msg) => CameraError::HardwareFault(msg),
        }
    }
}

/// Device entry from driver enumeration
#[derive(Debug, Clone)]
pub struct DriverDeviceInfo {
    /// Stable identifier within one process lifetime
    pub device_id: String,
    pub identity: DeviceIdentity,
    /// Whether the modern driver fully supports this device
    pub supports_modern: bool,
}

/// Raw sensor output for one frame, plus the metadata the driver reports
/// about what was actually applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    pub sequence: u32,
    /// Sensor timestamp in microseconds since driver epoch
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    /// Raw pixel data; shared so handoff never copies
    pub data: Arc<[u8]>,
    /// Exposure time actually applied, when the driver reports it
    pub exposure_us: Option<u64>,
    /// True when this is unprocessed Bayer output
    pub raw_bayer: bool,
}

/// One unit of capture work submitted to a backend
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Number of frames wanted; `None` streams until cancelled
    pub frame_count: Option<u32>,
    /// Request unprocessed Bayer output
    pub raw_output: bool,
}

impl CaptureRequest {
    pub fn single() -> Self {
        Self {
            frame_count: Some(1),
            raw_output: false,
        }
    }

    pub fn frames(count: u32) -> Self {
        Self {
            frame_count: Some(count),
            raw_output: false,
        }
    }

    pub fn streaming() -> Self {
        Self {
            frame_count: None,
            raw_output: false,
        }
    }

    pub fn raw(mut self) -> Self {
        self.raw_output = true;
        self
    }
}

/// Completion events delivered by a Generation-2 driver.
///
/// Callbacks arrive on a driver-internal thread; implementors of the
/// callback must hand the event off, never mutate shared state in place.
#[derive(Debug, Clone)]
pub enum RequestEvent {
    Frame(SensorFrame),
    Completed,
    Fault(DriverError),
}

/// Callback registered with a Generation-2 capture request
pub type RequestCallback = Box<dyn FnMut(RequestEvent) + Send>;

/// Legacy synchronous driver interface (Generation 1)
pub trait LegacyDriver: Send {
    fn enumerate(&self) -> Vec<DriverDeviceInfo>;

    fn connect(&mut self, device_id: &str) -> DriverResult<()>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Flat string descriptor list; see [`crate::params::normalize`] for the
    /// descriptor conventions.
    fn parameter_descriptors(&self) -> DriverResult<Vec<(String, String)>>;

    fn write_parameter(&mut self, key: &str, value: &str) -> DriverResult<()>;

    fn read_parameter(&self, key: &str) -> DriverResult<String>;

    /// Block until the next frame is exposed and read out
    fn read_frame(&mut self) -> DriverResult<SensorFrame>;
}

/// Modern asynchronous driver interface (Generation 2)
pub trait ModernDriver: Send {
    fn enumerate(&self) -> Vec<DriverDeviceInfo>;

    fn connect(&mut self, device_id: &str) -> DriverResult<()>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Typed capability entries for the connected device
    fn characteristics(&self) -> DriverResult<Vec<Characteristic>>;

    fn write_control(&mut self, key: &str, value: &ParameterValue) -> DriverResult<()>;

    fn read_control(&self, key: &str) -> DriverResult<ParameterValue>;

    /// Submit a capture request. Completion events are delivered through the
    /// callback on a driver-internal thread until the request finishes or is
    /// cancelled.
    fn submit_request(&mut self, request: CaptureRequest, on_event: RequestCallback)
    -> DriverResult<()>;

    /// Cancel the in-flight capture request, if any
    fn cancel_request(&mut self);
}
