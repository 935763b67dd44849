// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for exercising the abstraction layer against the virtual
//! camera: listing devices, probing capabilities, and running the capture
//! modules end to end.

use camhal::capture::modules::{BurstModule, PhotoModule, RawModule, VideoModule};
use camhal::capture::CaptureController;
use camhal::device::{AllowAll, Backends, Camera};
use camhal::hal::gen1::Gen1Backend;
use camhal::hal::gen2::Gen2Backend;
use camhal::hal::virtual_device::VirtualCamera;
use camhal::hal::DeviceSelector;
use camhal::pipeline::{CaptureOutput, ChannelSink, PassthroughCodec};
use camhal::quirks::QuirkRegistry;
use camhal::settings::JsonSettingsStore;
use camhal::{CameraError, CaptureState, ParameterValue};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Deadline for a whole CLI capture run, generously above the frame deadline
const CAPTURE_WAIT: Duration = Duration::from_secs(30);

/// A camera over the built-in virtual devices, with persisted settings and
/// the standard quirk profiles.
fn virtual_camera() -> Camera {
    let driver = VirtualCamera::with_default_devices();
    let backends = Backends {
        legacy: Box::new(Gen1Backend::new(Box::new(driver.clone()))),
        modern: Box::new(Gen2Backend::new(Box::new(driver))),
    };
    Camera::new(
        backends,
        QuirkRegistry::builtin_profiles(),
        Arc::new(AllowAll),
        Arc::new(JsonSettingsStore::default_location()),
    )
}

fn selector_for(device: Option<String>) -> DeviceSelector {
    match device {
        Some(id) => DeviceSelector::by_id(&id),
        None => DeviceSelector::first(),
    }
}

/// List the virtual devices and which API generation serves them
pub fn list_devices() -> CliResult {
    let driver = VirtualCamera::with_default_devices();
    let devices = camhal::hal::driver::LegacyDriver::enumerate(&driver);

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }
    println!("Available devices:");
    for info in devices {
        let generations = if info.supports_modern {
            "generation-1, generation-2"
        } else {
            "generation-1"
        };
        println!("  {}  {}  [{}]", info.device_id, info.identity, generations);
    }
    Ok(())
}

/// Open a device and print its effective capability surface
pub fn probe_device(device: Option<String>) -> CliResult {
    let camera = virtual_camera();
    let opened = camera.open(selector_for(device))?;
    println!(
        "{} ({}) via {}",
        opened.device_id, opened.identity, opened.generation
    );

    let mut parameters: Vec<_> = opened.capabilities.iter().collect();
    parameters.sort_by(|a, b| a.key.cmp(&b.key));
    for parameter in parameters {
        let marker = if parameter.supported { " " } else { "!" };
        println!(
            "  {}{:<16} {:<10} {}",
            marker,
            parameter.key,
            parameter.default.to_wire(),
            parameter.range
        );
    }
    camera.close()?;
    Ok(())
}

/// Take a single photo and write it out
pub fn take_photo(device: Option<String>, iso: Option<i64>, output: Option<PathBuf>) -> CliResult {
    let camera = virtual_camera();
    camera.open(selector_for(device))?;
    if let Some(iso) = iso {
        camera.set_parameter("iso", ParameterValue::Int(iso))?;
    }

    let (sink, receiver) = ChannelSink::pair();
    let controller = CaptureController::new(
        camera.clone(),
        Arc::new(PassthroughCodec),
        Arc::new(sink),
    );
    let handle = controller.activate(Box::new(PhotoModule))?;
    finish_capture(&handle, receiver, output, "photo", "gray")?;
    camera.close()?;
    Ok(())
}

/// Capture a rapid frame sequence
pub fn take_burst(device: Option<String>, count: u32, output: Option<PathBuf>) -> CliResult {
    let camera = virtual_camera();
    camera.open(selector_for(device))?;

    let (sink, receiver) = ChannelSink::pair();
    let controller = CaptureController::new(
        camera.clone(),
        Arc::new(PassthroughCodec),
        Arc::new(sink),
    );
    let handle = controller.activate(Box::new(BurstModule::new(count)))?;
    finish_capture(&handle, receiver, output, "burst", "gray")?;
    camera.close()?;
    Ok(())
}

/// Capture unprocessed sensor output through the RAW codec
pub fn take_raw(device: Option<String>, output: Option<PathBuf>) -> CliResult {
    let camera = virtual_camera();
    camera.open(selector_for(device))?;

    let (sink, receiver) = ChannelSink::pair();
    let controller = CaptureController::new(
        camera.clone(),
        Arc::new(PassthroughCodec),
        Arc::new(sink),
    );
    let handle = controller.activate(Box::new(RawModule::new()))?;
    finish_capture(&handle, receiver, output, "raw", "dng")?;
    camera.close()?;
    Ok(())
}

/// Record a clip of the given duration
pub fn record_clip(device: Option<String>, seconds: u64, output: Option<PathBuf>) -> CliResult {
    let camera = virtual_camera();
    camera.open(selector_for(device))?;

    let (sink, receiver) = ChannelSink::pair();
    let controller = CaptureController::new(
        camera.clone(),
        Arc::new(PassthroughCodec),
        Arc::new(sink),
    );
    let handle =
        controller.activate(Box::new(VideoModule::new(Duration::from_secs(seconds))))?;
    finish_capture(&handle, receiver, output, "clip", "gray")?;
    camera.close()?;
    Ok(())
}

/// Wait for the module to finish, then drain the sink into files
fn finish_capture(
    handle: &camhal::CaptureHandle,
    mut receiver: futures::channel::mpsc::UnboundedReceiver<CaptureOutput>,
    output: Option<PathBuf>,
    stem: &str,
    extension: &str,
) -> CliResult {
    match handle.wait(CAPTURE_WAIT)? {
        CaptureState::Done => {}
        CaptureState::Idle => {
            println!("Capture cancelled.");
            return Ok(());
        }
        _ => {
            let err = handle
                .error()
                .unwrap_or_else(|| CameraError::InvalidState("capture failed".into()));
            return Err(Box::new(err));
        }
    }

    while let Ok(item) = receiver.try_recv() {
        match item {
            CaptureOutput::Frames(frames) => {
                for frame in frames {
                    let path = output_path(&output, stem, extension);
                    std::fs::write(&path, frame.data.as_ref())?;
                    println!("Wrote {} ({}x{})", path.display(), frame.width, frame.height);
                }
            }
            CaptureOutput::Encoded(image) => {
                let path = output_path(&output, stem, image.format);
                std::fs::write(&path, image.bytes.as_ref())?;
                println!("Wrote {} ({} bytes)", path.display(), image.bytes.len());
            }
            CaptureOutput::Clip { frames, duration } => {
                let path = output_path(&output, stem, extension);
                let joined: Vec<u8> = frames
                    .iter()
                    .flat_map(|f| f.data.iter().copied())
                    .collect();
                std::fs::write(&path, joined)?;
                println!(
                    "Wrote {} ({} frames over {:?})",
                    path.display(),
                    frames.len(),
                    duration
                );
            }
        }
    }
    Ok(())
}

fn output_path(output: &Option<PathBuf>, stem: &str, extension: &str) -> PathBuf {
    match output {
        Some(path) if !path.is_dir() => path.clone(),
        other => {
            let dir = other.clone().unwrap_or_else(|| PathBuf::from("."));
            let timestamp = Local::now().format("%Y%m%d_%H%M%S%.3f");
            dir.join(format!("{}_{}.{}", stem, timestamp, extension))
        }
    }
}
