// SPDX-License-Identifier: GPL-3.0-only

//! Camera device abstraction and capture orchestration
//!
//! Unifies two camera API generations behind one capability-aware control
//! surface: a legacy synchronous, parameter-list-driven driver interface and
//! a modern asynchronous, request/result-driven one. Consumers open a
//! [`device::Camera`], read its probed [`quirks::EffectiveCapabilities`],
//! configure parameters with synchronous validation, and run acquisition
//! through [`capture::CaptureController`] modules (photo, burst, RAW, video).
//!
//! Threading model: the device context thread owns the hardware handle and
//! serializes every mutation; each capture activation runs its state machine
//! on a capture-context thread fed by a bounded frame channel; consumers only
//! ever see immutable events and shared capability snapshots.

pub mod capture;
pub mod constants;
pub mod device;
pub mod errors;
pub mod events;
pub mod hal;
pub mod params;
pub mod pipeline;
pub mod quirks;
pub mod settings;

pub use capture::{CaptureController, CaptureHandle, CaptureModule, CaptureState};
pub use device::{AllowAll, Backends, Camera, CaptureDevice, PermissionGate, WrapperState};
pub use errors::{CameraError, CameraResult};
pub use events::{CameraEvent, EventBus, EventReceiver};
pub use hal::{ApiGeneration, DeviceSelector, GenerationPolicy};
pub use params::{Parameter, ParameterRange, ParameterValue};
pub use quirks::{DeviceIdentity, DeviceQuirk, QuirkRegistry, QuirkScope};
