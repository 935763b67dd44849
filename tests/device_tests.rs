// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the camera wrapper lifecycle and configuration
//! surface, run against the virtual devices.

use camhal::device::{AllowAll, Backends, Camera, DenyAll, PermissionGate};
use camhal::hal::driver::DriverError;
use camhal::hal::gen1::Gen1Backend;
use camhal::hal::gen2::Gen2Backend;
use camhal::hal::virtual_device::VirtualCamera;
use camhal::hal::DeviceSelector;
use camhal::quirks::{DeviceQuirk, QuirkRegistry, QuirkScope};
use camhal::settings::{DeviceSettings, MemorySettingsStore, SettingsStore};
use camhal::{
    ApiGeneration, CameraError, CameraEvent, Parameter, ParameterRange, ParameterValue,
    WrapperState,
};
use std::sync::Arc;

fn camera_over(driver: VirtualCamera, gate: Arc<dyn PermissionGate>) -> Camera {
    let backends = Backends {
        legacy: Box::new(Gen1Backend::new(Box::new(driver.clone()))),
        modern: Box::new(Gen2Backend::new(Box::new(driver))),
    };
    Camera::new(
        backends,
        QuirkRegistry::builtin_profiles(),
        gate,
        Arc::new(MemorySettingsStore::new()),
    )
}

fn default_camera() -> (Camera, VirtualCamera) {
    let driver = VirtualCamera::with_default_devices();
    (camera_over(driver.clone(), Arc::new(AllowAll)), driver)
}

fn drain(receiver: &mut camhal::EventReceiver) -> Vec<CameraEvent> {
    // Events are emitted synchronously before commands reply, so everything
    // relevant is already queued by the time a test drains.
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn open_selects_generation_per_device() {
    let (camera, _) = default_camera();

    let front = camera.open(DeviceSelector::by_id("cam-front")).unwrap();
    assert_eq!(front.generation, ApiGeneration::Modern);
    camera.close().unwrap();

    let rear = camera.open(DeviceSelector::by_id("cam-rear")).unwrap();
    assert_eq!(rear.generation, ApiGeneration::Legacy);
    camera.close().unwrap();
}

#[test]
fn open_while_open_is_invalid_state() {
    let (camera, _) = default_camera();
    camera.open(DeviceSelector::first()).unwrap();

    let err = camera.open(DeviceSelector::first()).unwrap_err();
    assert!(matches!(err, CameraError::InvalidState(_)));
    camera.close().unwrap();
}

#[test]
fn open_without_permission_is_denied() {
    let driver = VirtualCamera::with_default_devices();
    let camera = camera_over(driver, Arc::new(DenyAll));

    let err = camera.open(DeviceSelector::first()).unwrap_err();
    assert_eq!(err, CameraError::PermissionDenied);
    assert_eq!(camera.state(), WrapperState::Closed);
}

#[test]
fn open_retries_transient_busy() {
    let (camera, driver) = default_camera();
    driver.inject_connect_failures(vec![DriverError::Busy, DriverError::Busy]);

    // Two transient failures fit inside the retry budget
    let device = camera.open(DeviceSelector::by_id("cam-front")).unwrap();
    assert_eq!(device.device_id, "cam-front");
    camera.close().unwrap();
}

#[test]
fn open_gives_up_after_retry_budget() {
    let (camera, driver) = default_camera();
    driver.inject_connect_failures(vec![
        DriverError::Busy,
        DriverError::Busy,
        DriverError::Busy,
    ]);

    let err = camera.open(DeviceSelector::by_id("cam-front")).unwrap_err();
    assert_eq!(err, CameraError::DeviceBusy);
    assert_eq!(camera.state(), WrapperState::Closed);
}

#[test]
fn close_is_idempotent_with_one_event() {
    let (camera, _) = default_camera();
    let mut events = camera.subscribe("test").unwrap();

    camera.open(DeviceSelector::by_id("cam-front")).unwrap();
    camera.close().unwrap();
    camera.close().unwrap();
    camera.close().unwrap();

    let closed = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, CameraEvent::DeviceClosed { .. }))
        .count();
    assert_eq!(closed, 1);
}

#[test]
fn set_parameter_validates_before_hardware() {
    let (camera, _) = default_camera();
    camera.open(DeviceSelector::by_id("cam-front")).unwrap();

    // Out-of-range rejected synchronously, value untouched
    let err = camera
        .set_parameter("iso", ParameterValue::Int(6400))
        .unwrap_err();
    assert!(matches!(err, CameraError::OutOfRange { .. }));
    assert_eq!(
        camera.current_value("iso").unwrap(),
        ParameterValue::Int(100)
    );

    // In-range applied and readable back
    camera
        .set_parameter("iso", ParameterValue::Int(800))
        .unwrap();
    assert_eq!(
        camera.current_value("iso").unwrap(),
        ParameterValue::Int(800)
    );
    camera.close().unwrap();
}

#[test]
fn set_unknown_parameter_is_not_supported() {
    let (camera, _) = default_camera();
    camera.open(DeviceSelector::by_id("cam-front")).unwrap();

    let err = camera
        .set_parameter("face-beauty", ParameterValue::Int(1))
        .unwrap_err();
    assert_eq!(err, CameraError::NotSupported("face-beauty".into()));
    camera.close().unwrap();
}

#[test]
fn quirk_remap_exposes_standard_key_on_legacy_device() {
    let (camera, _) = default_camera();
    let device = camera.open(DeviceSelector::by_id("cam-rear")).unwrap();

    // The rear sensor only reports ISO through its vendor key; the quirk
    // overlay surfaces it under the normalized name.
    assert!(device.capabilities.is_supported("iso"));
    assert!(device.capabilities.get("vo-iso").is_none());
    assert_eq!(device.capabilities.wire_key("iso"), "vo-iso");

    camera
        .set_parameter("iso", ParameterValue::Int(800))
        .unwrap();
    assert_eq!(
        camera.current_value("iso").unwrap(),
        ParameterValue::Int(800)
    );

    // Menu-constrained: a value the menu does not list is out of range
    let err = camera
        .set_parameter("iso", ParameterValue::Int(6400))
        .unwrap_err();
    assert!(matches!(err, CameraError::OutOfRange { .. }));
    camera.close().unwrap();
}

#[test]
fn quirk_hidden_parameter_rejects_writes() {
    let (camera, _) = default_camera();
    let device = camera.open(DeviceSelector::by_id("cam-rear")).unwrap();

    // Advertised by the probe but hidden by the chipset quirk
    assert!(device.capabilities.get("zoom-ratio").is_some());
    assert!(!device.capabilities.is_supported("zoom-ratio"));

    let err = camera
        .set_parameter("zoom-ratio", ParameterValue::Int(200))
        .unwrap_err();
    assert!(matches!(err, CameraError::NotSupported(_)));
    camera.close().unwrap();
}

#[test]
fn apply_configuration_is_all_or_nothing() {
    let (camera, _) = default_camera();
    let mut events = camera.subscribe("test").unwrap();
    camera.open(DeviceSelector::by_id("cam-front")).unwrap();

    let err = camera
        .apply_configuration(vec![
            ("iso".into(), ParameterValue::Int(800)),
            ("shutter-us".into(), ParameterValue::Int(10)), // below minimum
        ])
        .unwrap_err();
    assert!(matches!(err, CameraError::OutOfRange { .. }));

    // The valid entry was not applied either
    assert_eq!(
        camera.current_value("iso").unwrap(),
        ParameterValue::Int(100)
    );
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        CameraEvent::ConfigurationRejected { key, .. } if key == "shutter-us"
    )));

    camera
        .apply_configuration(vec![
            ("iso".into(), ParameterValue::Int(800)),
            ("white-balance".into(), ParameterValue::Text("cloudy".into())),
        ])
        .unwrap();
    assert_eq!(
        camera.current_value("white-balance").unwrap(),
        ParameterValue::Text("cloudy".into())
    );
    camera.close().unwrap();
}

#[test]
fn apply_configuration_hardware_fault_closes_device() {
    // A quirk-added key the virtual firmware does not actually accept: the
    // write passes validation but the driver rejects it, which surfaces as a
    // hardware fault mid-batch and must tear the session down.
    let driver = VirtualCamera::with_default_devices();
    let mut registry = QuirkRegistry::builtin_profiles();
    registry.register(
        DeviceQuirk::new(QuirkScope::Vendor("vintage-optics".into())).add(Parameter::new(
            "exposure-bias",
            ParameterValue::Int(0),
            ParameterRange::Int {
                min: -6,
                max: 6,
                step: 1,
            },
        )),
    );
    let backends = Backends {
        legacy: Box::new(Gen1Backend::new(Box::new(driver.clone()))),
        modern: Box::new(Gen2Backend::new(Box::new(driver))),
    };
    let camera = Camera::new(
        backends,
        registry,
        Arc::new(AllowAll),
        Arc::new(MemorySettingsStore::new()),
    );
    let mut events = camera.subscribe("test").unwrap();
    camera.open(DeviceSelector::by_id("cam-rear")).unwrap();

    let err = camera
        .apply_configuration(vec![("exposure-bias".into(), ParameterValue::Int(2))])
        .unwrap_err();
    assert!(matches!(err, CameraError::HardwareFault(_)));
    assert_eq!(camera.state(), WrapperState::Closed);

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, CameraEvent::DeviceError { .. })));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, CameraEvent::DeviceClosed { .. }))
            .count(),
        1
    );
}

#[test]
fn parameter_changes_emit_events() {
    let (camera, _) = default_camera();
    let mut events = camera.subscribe("test").unwrap();
    camera.open(DeviceSelector::by_id("cam-front")).unwrap();

    camera
        .set_parameter("iso", ParameterValue::Int(800))
        .unwrap();

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        e,
        CameraEvent::ParameterChanged { key, value, .. }
            if key == "iso" && *value == ParameterValue::Int(800)
    )));
    camera.close().unwrap();
}

#[test]
fn persisted_settings_restore_on_open() {
    let driver = VirtualCamera::with_default_devices();
    let store = Arc::new(MemorySettingsStore::new());
    let mut saved = DeviceSettings::new();
    saved.insert("iso".into(), ParameterValue::Int(400));
    // A stale value outside the probed range must be skipped, not fatal
    saved.insert("shutter-us".into(), ParameterValue::Int(1));
    store.save("cam-front", &saved);

    let backends = Backends {
        legacy: Box::new(Gen1Backend::new(Box::new(driver.clone()))),
        modern: Box::new(Gen2Backend::new(Box::new(driver))),
    };
    let camera = Camera::new(
        backends,
        QuirkRegistry::builtin_profiles(),
        Arc::new(AllowAll),
        store,
    );

    camera.open(DeviceSelector::by_id("cam-front")).unwrap();
    assert_eq!(
        camera.current_value("iso").unwrap(),
        ParameterValue::Int(400)
    );
    assert_eq!(
        camera.current_value("shutter-us").unwrap(),
        ParameterValue::Int(10_000)
    );
    camera.close().unwrap();
}

#[test]
fn preview_streams_frames_until_stopped() {
    let (camera, _) = default_camera();
    camera.open(DeviceSelector::by_id("cam-front")).unwrap();

    let mut preview = camera.start_preview().unwrap();
    let frame = futures::executor::block_on(futures::StreamExt::next(&mut preview));
    assert!(frame.is_some());

    camera.stop_preview().unwrap();
    camera.close().unwrap();
}

#[test]
fn reads_never_go_through_the_device_context() {
    let (camera, _) = default_camera();
    let device = camera.open(DeviceSelector::by_id("cam-front")).unwrap();

    // Capability reads work off the session snapshot even while the device
    // context is busy elsewhere; this stays valid after close too.
    let capabilities = device.capabilities.clone();
    camera.close().unwrap();
    assert!(capabilities.is_supported("iso"));
    assert!(camera.device().is_none());
}
