// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture-module state machine, run end to end
//! against the virtual devices.

use camhal::capture::modules::{BurstModule, PhotoModule, RawModule, VideoModule};
use camhal::capture::CaptureController;
use camhal::device::{AllowAll, Backends, Camera};
use camhal::hal::driver::SensorFrame;
use camhal::hal::gen1::Gen1Backend;
use camhal::hal::gen2::Gen2Backend;
use camhal::hal::virtual_device::{VirtualCamera, VirtualDevice};
use camhal::hal::DeviceSelector;
use camhal::params::normalize::Characteristic;
use camhal::pipeline::{
    CalibrationMetadata, CaptureOutput, ChannelSink, EncodedImage, FailingCodec, PassthroughCodec,
    RawCodec,
};
use camhal::quirks::QuirkRegistry;
use camhal::settings::MemorySettingsStore;
use camhal::{
    CameraError, CameraEvent, CameraResult, CaptureState, DeviceIdentity, ParameterRange,
    ParameterValue, WrapperState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn open_camera(device_id: &str) -> (Camera, VirtualCamera) {
    let driver = VirtualCamera::with_default_devices();
    let backends = Backends {
        legacy: Box::new(Gen1Backend::new(Box::new(driver.clone()))),
        modern: Box::new(Gen2Backend::new(Box::new(driver.clone()))),
    };
    let camera = Camera::new(
        backends,
        QuirkRegistry::builtin_profiles(),
        Arc::new(AllowAll),
        Arc::new(MemorySettingsStore::new()),
    );
    camera.open(DeviceSelector::by_id(device_id)).unwrap();
    (camera, driver)
}

fn controller_with(
    camera: &Camera,
    codec: Arc<dyn RawCodec>,
) -> (
    CaptureController,
    futures::channel::mpsc::UnboundedReceiver<CaptureOutput>,
) {
    let (sink, receiver) = ChannelSink::pair();
    (
        CaptureController::new(camera.clone(), codec, Arc::new(sink)),
        receiver,
    )
}

fn wait_for_state(handle: &camhal::CaptureHandle, wanted: CaptureState) {
    let deadline = Instant::now() + WAIT;
    while handle.state() != wanted {
        assert!(Instant::now() < deadline, "never reached {:?}", wanted);
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn photo_capture_reaches_done_with_output() {
    let (camera, _) = open_camera("cam-front");
    let (controller, mut output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller.activate(Box::new(PhotoModule)).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Done);

    match output.try_recv().unwrap() {
        CaptureOutput::Frames(frames) => assert_eq!(frames.len(), 1),
        other => panic!("unexpected output: {:?}", other),
    }
    camera.close().unwrap();
}

#[test]
fn photo_capture_works_on_legacy_device() {
    let (camera, _) = open_camera("cam-rear");
    let (controller, mut output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller.activate(Box::new(PhotoModule)).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Done);
    assert!(output.try_recv().is_ok());
    camera.close().unwrap();
}

#[test]
fn burst_delivers_requested_count() {
    let (camera, _) = open_camera("cam-front");
    let (controller, mut output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller.activate(Box::new(BurstModule::new(4))).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Done);

    match output.try_recv().unwrap() {
        CaptureOutput::Frames(frames) => assert_eq!(frames.len(), 4),
        other => panic!("unexpected output: {:?}", other),
    }
    camera.close().unwrap();
}

#[test]
fn concurrent_activation_is_module_busy() {
    let (camera, _) = open_camera("cam-front");
    let (controller, _output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller
        .activate(Box::new(VideoModule::new(Duration::from_secs(60))))
        .unwrap();
    wait_for_state(&handle, CaptureState::Capturing);

    let err = controller.activate(Box::new(PhotoModule)).unwrap_err();
    assert_eq!(err, CameraError::ModuleBusy("video".into()));

    handle.cancel();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Idle);
    camera.close().unwrap();
}

#[test]
fn slot_is_released_after_done() {
    let (camera, _) = open_camera("cam-front");
    let (controller, mut output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let first = controller.activate(Box::new(PhotoModule)).unwrap();
    assert_eq!(first.wait(WAIT).unwrap(), CaptureState::Done);

    // A finished module frees the device for the next activation
    let second = controller.activate(Box::new(PhotoModule)).unwrap();
    assert_eq!(second.wait(WAIT).unwrap(), CaptureState::Done);
    assert!(output.try_recv().is_ok());
    assert!(output.try_recv().is_ok());
    camera.close().unwrap();
}

#[test]
fn cancel_during_capturing_returns_to_idle() {
    let (camera, _) = open_camera("cam-front");
    let (controller, mut output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller
        .activate(Box::new(VideoModule::new(Duration::from_secs(60))))
        .unwrap();
    wait_for_state(&handle, CaptureState::Capturing);
    handle.cancel();

    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Idle);
    // Nothing was handed downstream
    assert!(output.try_recv().is_err());
    camera.close().unwrap();
}

/// Delegates to the passthrough codec after a pause, keeping the module in
/// `Processing` long enough for a test to act on it.
struct SlowCodec(Duration);

impl RawCodec for SlowCodec {
    fn convert(
        &self,
        raw: &SensorFrame,
        calibration: &CalibrationMetadata,
    ) -> CameraResult<EncodedImage> {
        std::thread::sleep(self.0);
        PassthroughCodec.convert(raw, calibration)
    }
}

#[test]
fn cancel_during_processing_is_deferred() {
    let (camera, _) = open_camera("cam-front");
    let (controller, mut output) =
        controller_with(&camera, Arc::new(SlowCodec(Duration::from_millis(300))));

    let handle = controller.activate(Box::new(RawModule::new())).unwrap();
    wait_for_state(&handle, CaptureState::Processing);
    handle.cancel();

    // Past Capturing the capture runs to completion and still delivers
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Done);
    match output.try_recv().unwrap() {
        CaptureOutput::Encoded(image) => assert_eq!(image.format, "dng"),
        other => panic!("unexpected output: {:?}", other),
    }
    camera.close().unwrap();
}

#[test]
fn raw_capture_encodes_through_codec() {
    let (camera, _) = open_camera("cam-front");
    let (controller, mut output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller.activate(Box::new(RawModule::new())).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Done);

    match output.try_recv().unwrap() {
        CaptureOutput::Encoded(image) => {
            assert_eq!(image.format, "dng");
            assert!(!image.bytes.is_empty());
        }
        other => panic!("unexpected output: {:?}", other),
    }
    camera.close().unwrap();
}

#[test]
fn raw_capture_fails_on_incapable_sensor() {
    let (camera, _) = open_camera("cam-rear");
    let (controller, _output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller.activate(Box::new(RawModule::new())).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Error);
    assert!(matches!(
        handle.error(),
        Some(CameraError::UnsupportedConfiguration(_))
    ));
    camera.close().unwrap();
}

#[test]
fn codec_failure_drives_error_state() {
    let (camera, _) = open_camera("cam-front");
    let (controller, _output) = controller_with(&camera, Arc::new(FailingCodec));

    let handle = controller.activate(Box::new(RawModule::new())).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Error);
    assert!(matches!(
        handle.error(),
        Some(CameraError::CodecFailure(_))
    ));
    camera.close().unwrap();
}

#[test]
fn error_slot_requires_reset_before_reactivation() {
    let (camera, _) = open_camera("cam-rear");
    let (controller, _output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller.activate(Box::new(RawModule::new())).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Error);

    // The failed activation holds the slot until explicitly reset
    let err = controller.activate(Box::new(PhotoModule)).unwrap_err();
    assert!(matches!(err, CameraError::InvalidState(_)));

    controller.reset().unwrap();
    let retry = controller.activate(Box::new(PhotoModule)).unwrap();
    assert_eq!(retry.wait(WAIT).unwrap(), CaptureState::Done);
    camera.close().unwrap();
}

#[test]
fn disconnect_during_capture_faults_module_and_device() {
    let (camera, driver) = open_camera("cam-front");
    let mut events = camera.subscribe("test").unwrap();
    driver.disconnect_after(2);

    let (controller, _output) = controller_with(&camera, Arc::new(PassthroughCodec));
    let handle = controller.activate(Box::new(BurstModule::new(10))).unwrap();

    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Error);
    assert!(matches!(
        handle.error(),
        Some(CameraError::HardwareFault(_))
    ));

    // The wrapper runs Open -> Error -> Closed with exactly one closed event
    let deadline = Instant::now() + WAIT;
    while camera.state() != WrapperState::Closed {
        assert!(Instant::now() < deadline, "wrapper never closed");
        std::thread::sleep(Duration::from_millis(2));
    }
    let mut saw_error = false;
    let mut closed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            CameraEvent::DeviceError { error, .. } => {
                assert!(matches!(error, CameraError::HardwareFault(_)));
                saw_error = true;
            }
            CameraEvent::DeviceClosed { .. } => closed += 1,
            _ => {}
        }
    }
    assert!(saw_error);
    assert_eq!(closed, 1);
}

#[test]
fn stalled_frame_delivery_ends_in_timeout_error() {
    // A sensor whose readout interval far exceeds the frame deadline never
    // delivers in time; the module must fail with a timeout instead of
    // hanging its waiter.
    let driver = VirtualCamera::new();
    driver.add_device(
        VirtualDevice::new(
            "cam-slow",
            DeviceIdentity::new("acme", "ax-9", "lumen-isp"),
            true,
        )
        .with_characteristics(vec![Characteristic {
            key: "iso".into(),
            default: ParameterValue::Int(100),
            range: ParameterRange::Int {
                min: 100,
                max: 3200,
                step: 1,
            },
        }])
        .with_frame_interval(Duration::from_secs(60)),
    );
    let backends = Backends {
        legacy: Box::new(Gen1Backend::new(Box::new(driver.clone()))),
        modern: Box::new(Gen2Backend::new(Box::new(driver))),
    };
    let camera = Camera::new(
        backends,
        QuirkRegistry::builtin_profiles(),
        Arc::new(AllowAll),
        Arc::new(MemorySettingsStore::new()),
    );
    camera.open(DeviceSelector::by_id("cam-slow")).unwrap();
    let (controller, _output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller.activate(Box::new(PhotoModule)).unwrap();
    assert_eq!(
        handle.wait(Duration::from_secs(20)).unwrap(),
        CaptureState::Error
    );
    assert!(matches!(handle.error(), Some(CameraError::Timeout(_))));
    // The stalled readout thread holds the device context until the sensor
    // wakes, so the device is left to process teardown rather than closed.
}

#[test]
fn capture_state_transitions_are_broadcast() {
    let (camera, _) = open_camera("cam-front");
    let mut events = camera.subscribe("test").unwrap();
    let (controller, _output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller.activate(Box::new(PhotoModule)).unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Done);

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CameraEvent::CaptureStateChanged { module, new, .. } = event {
            assert_eq!(module, "photo");
            transitions.push(new);
        }
    }
    assert_eq!(
        transitions,
        vec![
            CaptureState::Preparing,
            CaptureState::Capturing,
            CaptureState::Processing,
            CaptureState::Done,
        ]
    );
    camera.close().unwrap();
}

#[test]
fn video_stop_signal_finalizes_clip() {
    let (camera, _) = open_camera("cam-front");
    let (controller, mut output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let (module, stop) = VideoModule::until_stopped(Duration::from_secs(60));
    let handle = controller.activate(Box::new(module)).unwrap();
    wait_for_state(&handle, CaptureState::Capturing);
    std::thread::sleep(Duration::from_millis(30));
    stop.store(true, std::sync::atomic::Ordering::SeqCst);

    // Stopping finalizes the clip, unlike cancellation which discards it
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Done);
    match output.try_recv().unwrap() {
        CaptureOutput::Clip { frames, .. } => assert!(!frames.is_empty()),
        other => panic!("unexpected output: {:?}", other),
    }
    camera.close().unwrap();
}

#[test]
fn video_records_a_clip() {
    let (camera, _) = open_camera("cam-front");
    let (controller, mut output) = controller_with(&camera, Arc::new(PassthroughCodec));

    let handle = controller
        .activate(Box::new(VideoModule::new(Duration::from_millis(100))))
        .unwrap();
    assert_eq!(handle.wait(WAIT).unwrap(), CaptureState::Done);

    match output.try_recv().unwrap() {
        CaptureOutput::Clip { frames, duration } => {
            assert!(!frames.is_empty());
            assert_eq!(duration, Duration::from_millis(100));
        }
        other => panic!("unexpected output: {:?}", other),
    }
    camera.close().unwrap();
}
