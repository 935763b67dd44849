// SPDX-License-Identifier: GPL-3.0-only

//! Hardware abstraction layer
//!
//! One object-safe [`ApiBackend`] trait presents both driver generations as
//! interchangeable backends; the concrete variant is selected at open time by
//! an explicit, overridable [`GenerationPolicy`] instead of vendor guesswork.
//!
//! ```text
//! ┌─────────────────────┐
//! │   Camera (wrapper)  │  ← device context, lifecycle, configuration
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  ApiBackend trait   │  ← common control surface
//! └────┬───────────┬────┘
//!      ▼           ▼
//!  ┌───────┐   ┌───────┐
//!  │ Gen 1 │   │ Gen 2 │  ← legacy sync / modern async drivers
//!  └───────┘   └───────┘
//! ```

pub mod driver;
pub mod gen1;
pub mod gen2;
pub mod loop_thread;
pub mod virtual_device;

pub use driver::{CaptureRequest, DriverDeviceInfo, SensorFrame};

use crate::errors::{CameraError, CameraResult};
use crate::params::{CapabilitySet, ParameterValue};
use crate::quirks::DeviceIdentity;
use serde::{Deserialize, Serialize};

/// One of the two historical hardware-control interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiGeneration {
    /// Legacy synchronous, parameter-list-driven interface
    Legacy,
    /// Modern asynchronous, capture-request/result-driven interface
    Modern,
}

impl std::fmt::Display for ApiGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiGeneration::Legacy => write!(f, "generation-1"),
            ApiGeneration::Modern => write!(f, "generation-2"),
        }
    }
}

/// Policy for automatic generation selection when the caller does not pin
/// one. The ambiguous case (device partially supports both) is decided here,
/// explicitly, rather than inferred from vendor strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationPolicy {
    /// Use Generation 2 when the device fully supports it, else Generation 1
    #[default]
    PreferModern,
    /// Use Generation 1 whenever the device offers it
    PreferLegacy,
    /// Generation 2 or fail with `DeviceUnavailable`
    ModernOnly,
    /// Generation 1 unconditionally
    LegacyOnly,
}

/// How a caller names the device and generation to open
#[derive(Debug, Clone, Default)]
pub struct DeviceSelector {
    /// Stable device id; `None` opens the first enumerated device
    pub device_id: Option<String>,
    /// Explicit generation choice, bypassing the policy
    pub generation: Option<ApiGeneration>,
    pub policy: GenerationPolicy,
}

impl DeviceSelector {
    pub fn first() -> Self {
        Self::default()
    }

    pub fn by_id(device_id: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_generation(mut self, generation: ApiGeneration) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_policy(mut self, policy: GenerationPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Result of resolving a selector against enumeration
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub identity: DeviceIdentity,
    pub generation: ApiGeneration,
}

/// Resolve which API generation to open a device under.
pub fn select_generation(
    info: &DriverDeviceInfo,
    selector: &DeviceSelector,
) -> CameraResult<ApiGeneration> {
    if let Some(generation) = selector.generation {
        if generation == ApiGeneration::Modern && !info.supports_modern {
            return Err(CameraError::DeviceUnavailable(format!(
                "{} has no generation-2 support",
                info.device_id
            )));
        }
        return Ok(generation);
    }

    match selector.policy {
        GenerationPolicy::PreferModern => {
            if info.supports_modern {
                Ok(ApiGeneration::Modern)
            } else {
                Ok(ApiGeneration::Legacy)
            }
        }
        GenerationPolicy::PreferLegacy | GenerationPolicy::LegacyOnly => Ok(ApiGeneration::Legacy),
        GenerationPolicy::ModernOnly => {
            if info.supports_modern {
                Ok(ApiGeneration::Modern)
            } else {
                Err(CameraError::DeviceUnavailable(format!(
                    "{} has no generation-2 support",
                    info.device_id
                )))
            }
        }
    }
}

/// Hardware events handed from driver threads into the capture context.
///
/// The channel is bounded ([`crate::constants::FRAME_CHANNEL_DEPTH`]): a slow
/// capture context back-pressures the driver pump instead of dropping capture
/// frames.
#[derive(Debug, Clone)]
pub enum HardwareEvent {
    Frame(SensorFrame),
    /// The backend delivered every requested frame
    CaptureComplete,
    Fault(CameraError),
}

/// Bounded sink carrying hardware events into the capture context
pub type FrameSink = std::sync::mpsc::SyncSender<HardwareEvent>;

/// Lossy sender for preview frames; full buffers drop frames, never block
pub type PreviewSender = futures::channel::mpsc::Sender<SensorFrame>;

/// Receiving side of a preview stream
pub type PreviewReceiver = futures::channel::mpsc::Receiver<SensorFrame>;

/// Common control surface over both driver generations.
///
/// Implementations are driven exclusively from the device context thread;
/// they spawn their own pump threads where the underlying driver model
/// requires it, but never call back into shared state from those threads.
pub trait ApiBackend: Send {
    fn generation(&self) -> ApiGeneration;

    fn enumerate(&self) -> Vec<DriverDeviceInfo>;

    fn open(&mut self, device_id: &str) -> CameraResult<DeviceDescriptor>;

    /// Query the device's capability surface, normalized. Called once per
    /// session, immediately after open.
    fn probe(&mut self) -> CameraResult<CapabilitySet>;

    fn write_parameter(&mut self, key: &str, value: &ParameterValue) -> CameraResult<()>;

    fn read_parameter(&mut self, key: &str) -> CameraResult<ParameterValue>;

    fn start_preview(&mut self, sender: PreviewSender) -> CameraResult<()>;

    fn stop_preview(&mut self);

    /// Start capture work; frames flow into `sink` until the request
    /// completes or [`ApiBackend::cancel_capture`] is called.
    fn submit_capture(&mut self, request: CaptureRequest, sink: FrameSink) -> CameraResult<()>;

    fn cancel_capture(&mut self);

    fn is_connected(&self) -> bool;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(supports_modern: bool) -> DriverDeviceInfo {
        DriverDeviceInfo {
            device_id: "cam0".into(),
            identity: DeviceIdentity::new("acme", "a1", "isp9"),
            supports_modern,
        }
    }

    #[test]
    fn test_prefer_modern_falls_back() {
        let selector = DeviceSelector::first();
        assert_eq!(
            select_generation(&info(true), &selector).unwrap(),
            ApiGeneration::Modern
        );
        assert_eq!(
            select_generation(&info(false), &selector).unwrap(),
            ApiGeneration::Legacy
        );
    }

    #[test]
    fn test_modern_only_fails_without_support() {
        let selector = DeviceSelector::first().with_policy(GenerationPolicy::ModernOnly);
        assert!(matches!(
            select_generation(&info(false), &selector),
            Err(CameraError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_explicit_choice_overrides_policy() {
        let selector = DeviceSelector::first()
            .with_policy(GenerationPolicy::PreferModern)
            .with_generation(ApiGeneration::Legacy);
        assert_eq!(
            select_generation(&info(true), &selector).unwrap(),
            ApiGeneration::Legacy
        );
    }
}
