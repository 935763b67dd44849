// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera abstraction layer

use std::fmt;

/// Result type alias using CameraError
pub type CameraResult<T> = Result<T, CameraError>;

/// Unified error taxonomy for device, parameter and capture failures
#[derive(Debug, Clone, PartialEq)]
pub enum CameraError {
    /// Device is held by another process
    DeviceBusy,
    /// Hardware absent or disconnected
    DeviceUnavailable(String),
    /// Camera access rights are missing
    PermissionDenied,
    /// Operation not legal in the current lifecycle state
    InvalidState(String),
    /// Parameter key is absent from the device capability set
    NotSupported(String),
    /// Value lies outside the parameter's declared bounds
    OutOfRange { key: String, value: String },
    /// A capture module's required parameters are not satisfiable
    UnsupportedConfiguration(String),
    /// Another capture module is already active on this device
    ModuleBusy(String),
    /// Hardware open or frame callback exceeded its deadline
    Timeout(String),
    /// Downstream RAW/DNG codec failed
    CodecFailure(String),
    /// Unrecoverable hardware failure (disconnect, driver fault)
    HardwareFault(String),
}

impl CameraError {
    /// Whether the wrapper may retry this error a bounded number of times
    /// before surfacing it. Everything else propagates immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CameraError::DeviceBusy | CameraError::Timeout(_))
    }

    /// Short machine-readable code carried in events
    pub fn code(&self) -> &'static str {
        match self {
            CameraError::DeviceBusy => "device-busy",
            CameraError::DeviceUnavailable(_) => "device-unavailable",
            CameraError::PermissionDenied => "permission-denied",
            CameraError::InvalidState(_) => "invalid-state",
            CameraError::NotSupported(_) => "not-supported",
            CameraError::OutOfRange { .. } => "out-of-range",
            CameraError::UnsupportedConfiguration(_) => "unsupported-configuration",
            CameraError::ModuleBusy(_) => "module-busy",
            CameraError::Timeout(_) => "timeout",
            CameraError::CodecFailure(_) => "codec-failure",
            CameraError::HardwareFault(_) => "hardware-fault",
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::DeviceBusy => write!(f, "Device is busy"),
            CameraError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            CameraError::PermissionDenied => write!(f, "Camera access denied"),
            CameraError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            CameraError::NotSupported(key) => write!(f, "Parameter not supported: {}", key),
            CameraError::OutOfRange { key, value } => {
                write!(f, "Value {} out of range for parameter {}", value, key)
            }
            CameraError::UnsupportedConfiguration(msg) => {
                write!(f, "Unsupported configuration: {}", msg)
            }
            CameraError::ModuleBusy(name) => {
                write!(f, "Capture module already active: {}", name)
            }
            CameraError::Timeout(what) => write!(f, "Timed out: {}", what),
            CameraError::CodecFailure(msg) => write!(f, "Codec failure: {}", msg),
            CameraError::HardwareFault(msg) => write!(f, "Hardware fault: {}", msg),
        }
    }
}

impl std::error::Error for CameraError {}
